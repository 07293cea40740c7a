//! meme-sentinel
//!
//! Automated on-chain trading controller for Solana meme tokens.
//!
//! Each user-declared monitor owns a background worker that samples a token's
//! price and market cap from Birdeye, compares the observation against the
//! configured thresholds and, on a crossing, executes a Jupiter swap from the
//! monitor's wallet, pushes a webhook notification, appends a monitor log row
//! and either completes or keeps watching depending on the execution policy.
//!
//! The library provides:
//! - Per-monitor worker scheduling with cooperative cancellation and
//!   crash/restart recovery (`MonitorEngine`)
//! - Wallet-scoped trade execution with bounded retries and on-chain log
//!   extraction (`SolanaTrader`)
//! - Market data access with a permanent token-metadata cache
//! - A cross-monitor market-cap change filter for notification throttling
//! - SQLite-backed persistence for monitors, keys, logs and configuration

#![allow(clippy::all)]
#![allow(dead_code)]

pub mod config;
pub mod modules;

// Re-export commonly used items
pub use config::{ConfigRegistry, ConfigSubscriber};
pub use modules::change_filter::ChangeFilter;
pub use modules::market_data::MarketDataClient;
pub use modules::monitor_engine::MonitorEngine;
pub use modules::monitor_service::MonitorService;
pub use modules::notifier::Notifier;
pub use modules::store::Store;
pub use modules::trader::SolanaTrader;
