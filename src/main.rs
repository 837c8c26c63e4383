mod config;
mod dashboard;
mod error;
mod event;
mod media;
mod output;
mod timers;
mod weather;

use anyhow::Result;
use config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::parse();

    // stdout carries frames, logs go to stderr
    let default_level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    dashboard::run(config).await
}
