use clap::{Parser, Subcommand, builder::PossibleValuesParser};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    api::router,
    config::{EngineConfig, ServeArgs, StorageArgs},
    engine::Execution,
    exchange::Exchange,
    orders::{NewOrder, Order, OrderType, Side},
    state::AppState,
    symbol::Symbol,
    utils::shutdown_token,
};

/// Price-time priority order matching engine
#[derive(Parser)]
#[command(name = "order-matching-engine")]
#[command(version, about = "A price-time priority limit order book and matching engine")]
struct Cli {
    /// Fallback log filter when RUST_LOG is unset
    #[arg(long, global = true, env = "OME_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket server
    Serve(ServeArgs),

    /// Submit one order against the stored books
    Submit {
        #[command(flatten)]
        storage: StorageArgs,

        symbol: Symbol,

        ///BUY or SELL
        #[arg(value_parser = PossibleValuesParser::new(["buy", "sell"]))]
        side: String,

        ///LIMIT or MARKET
        #[arg(value_parser = PossibleValuesParser::new(["limit", "market"]))]
        order_type: String,

        /// Quantity (must be > 0)
        quantity: u64,

        /// Price (only used for limit orders)
        price: Option<u64>,
    },

    /// Cancel a resting order
    Cancel {
        #[command(flatten)]
        storage: StorageArgs,
        id: u64,
    },

    /// Show the stored state of one order
    Order {
        #[command(flatten)]
        storage: StorageArgs,
        id: u64,
    },

    /// Display the book for a symbol
    Book {
        #[command(flatten)]
        storage: StorageArgs,
        symbol: Symbol,
        #[arg(long, default_value_t = 5)]
        depth: usize,
    },

    /// List recent trades for a symbol, newest first
    Trades {
        #[command(flatten)]
        storage: StorageArgs,
        symbol: Symbol,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_offline(storage: &StorageArgs, symbol: Option<&Symbol>) -> anyhow::Result<AppState> {
    let store = storage.open()?;
    let mut config = EngineConfig::default();
    if let Some(symbol) = symbol {
        config.symbols.push(symbol.clone());
    }
    AppState::open(store, config).await
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let store = args.storage.open()?;
    let state = AppState::open(store, args.engine.into()).await?;
    info!(symbols = ?state.exchange.symbols(), "exchange ready");

    let listener = TcpListener::bind(args.listen).await?;
    info!("listening on {}", listener.local_addr()?);
    let token = shutdown_token();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    info!("server stopped");
    Ok(())
}

fn print_order(order: &Order) {
    println!(
        "#{} {} {} {} price={} qty={}/{} status={}",
        order.id,
        order.symbol,
        order.side,
        order.order_type,
        order
            .price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into()),
        order.remaining_quantity,
        order.initial_quantity,
        order.status
    );
}

fn print_execution(execution: &Execution) {
    print_order(&execution.order);
    if execution.trades.is_empty() {
        println!("No trades occurred.");
    } else {
        println!("Trades generated:");
        for t in &execution.trades {
            println!(
                "  trade #{} price={} qty={} buy=#{} sell=#{}",
                t.id, t.price, t.quantity, t.buy_order_id, t.sell_order_id
            );
        }
    }
}

fn print_order_book(exchange: &Exchange, symbol: &Symbol, depth: usize) -> anyhow::Result<()> {
    println!("------ Order Book {} ------", symbol);
    println!("Bids (highest first):");
    for (price, qty) in exchange.book_depth(symbol.as_str(), Side::Buy, depth)? {
        println!("Price: {}, Total Qty: {}", price, qty);
    }
    println!("Asks (lowest first):");
    for (price, qty) in exchange.book_depth(symbol.as_str(), Side::Sell, depth)? {
        println!("Price: {}, Total Qty: {}", price, qty);
    }
    println!("--------------------------");
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Commands::Serve(args) => serve(args).await?,
        Commands::Submit {
            storage,
            symbol,
            side,
            order_type,
            quantity,
            price,
        } => {
            let state = open_offline(&storage, Some(&symbol)).await?;
            let side: Side = side.parse().map_err(anyhow::Error::msg)?;
            let order_type: OrderType = order_type.parse().map_err(anyhow::Error::msg)?;
            let request = NewOrder {
                symbol: symbol.to_string(),
                side,
                order_type,
                price,
                quantity,
            };
            let execution = state.exchange.submit(request).await?;
            print_execution(&execution);
        }
        Commands::Cancel { storage, id } => {
            let state = open_offline(&storage, None).await?;
            print_order(&state.exchange.cancel(id).await?);
        }
        Commands::Order { storage, id } => {
            let state = open_offline(&storage, None).await?;
            print_order(&state.exchange.order(id)?);
        }
        Commands::Book {
            storage,
            symbol,
            depth,
        } => {
            let state = open_offline(&storage, Some(&symbol)).await?;
            print_order_book(&state.exchange, &symbol, depth)?;
        }
        Commands::Trades {
            storage,
            symbol,
            limit,
        } => {
            let state = open_offline(&storage, Some(&symbol)).await?;
            for t in state.exchange.recent_trades(symbol.as_str(), limit)? {
                println!(
                    "#{} {} price={} qty={} buy=#{} sell=#{}",
                    t.id, t.symbol, t.price, t.quantity, t.buy_order_id, t.sell_order_id
                );
            }
        }
    }
    Ok(())
}
