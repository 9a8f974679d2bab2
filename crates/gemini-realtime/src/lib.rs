mod client;
pub mod types;

pub use client::config::{Config, ConfigBuilder};
pub use client::stats::Stats;
pub use client::{Client, ClientTx, ServerRx, open, open_with_config};
