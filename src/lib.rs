pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod ledger;
pub mod orderbook;
pub mod orders;
pub mod sequencer;
pub mod state;
pub mod store;
pub mod symbol;
pub mod trade;
pub mod utils;
