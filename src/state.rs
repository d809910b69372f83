use crate::{
    config::EngineConfig,
    exchange::Exchange,
    store::{Persistence, Store},
};
use std::{path::Path, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<Exchange>,
}

impl AppState {
    /// Opens a ParityDB store at `data_dir` and recovers the default symbols.
    pub async fn new(data_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let store = Store::open(data_dir.as_ref())?;
        Self::open(Arc::new(store), EngineConfig::default()).await
    }

    /// Recovery scans the whole store, so it runs on the blocking pool.
    pub async fn open(store: Arc<dyn Persistence>, config: EngineConfig) -> anyhow::Result<Self> {
        let exchange = tokio::task::spawn_blocking(move || Exchange::open(store, &config)).await??;
        Ok(Self {
            exchange: Arc::new(exchange),
        })
    }
}
