// meme-sentinel
// Automated on-chain monitor & trade executor for Solana meme tokens.
// Main entry point: opens the store, seeds configuration, brings the engine
// up (recovering persisted monitors) and parks until shutdown.

use anyhow::Result;
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

use meme_sentinel::{ConfigRegistry, MarketDataClient, MonitorEngine, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://sentinel.db".to_string());
    info!("🗄️ 打开数据库: {database_url}");
    let store = Store::connect(&database_url).await?;

    let config = ConfigRegistry::new(store.clone());
    config.seed_defaults().await?;

    let market = MarketDataClient::new(store.clone(), config.clone()).await;

    let engine = MonitorEngine::initialize(store, market, config).await;
    info!("🚀 监控引擎已启动，当前运行 {} 个监控任务", engine.running_count());

    tokio::signal::ctrl_c().await?;
    info!("⏹️ 收到退出信号，正在停止所有监控任务...");
    engine.stop_all().await;
    info!("👋 监控引擎已退出");

    Ok(())
}
