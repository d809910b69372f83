use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Args;

use crate::{
    store::{MemoryStore, Persistence, Store, StoreResult},
    symbol::Symbol,
};

pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Settings for the exchange core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Symbols that get an engine at start-up, in addition to any found in storage.
    pub symbols: Vec<Symbol>,
    /// Maximum queued operations per symbol sequencer.
    pub queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: Symbol::supported(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Where orders and trades are persisted.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// ParityDB directory
    #[arg(long, env = "OME_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Keep everything in memory; nothing survives a restart
    #[arg(long, env = "OME_IN_MEMORY", default_value_t = false)]
    pub in_memory: bool,
}

impl StorageArgs {
    pub fn open(&self) -> StoreResult<Arc<dyn Persistence>> {
        if self.in_memory {
            return Ok(Arc::new(MemoryStore::new()));
        }
        Ok(Arc::new(Store::open(&self.data_dir)?))
    }
}

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Comma-separated symbols to open at start-up
    #[arg(
        long,
        env = "OME_SYMBOLS",
        value_delimiter = ',',
        default_value = "BTC-USD,ETH-USD"
    )]
    pub symbols: Vec<Symbol>,

    /// Bound on queued operations per symbol
    #[arg(long, env = "OME_QUEUE_DEPTH", default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,
}

impl From<EngineArgs> for EngineConfig {
    fn from(args: EngineArgs) -> Self {
        Self {
            symbols: args.symbols,
            queue_depth: args.queue_depth,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address for the HTTP/WebSocket listener
    #[arg(long, env = "OME_LISTEN", default_value = "127.0.0.1:6080")]
    pub listen: SocketAddr,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub engine: EngineArgs,
}
