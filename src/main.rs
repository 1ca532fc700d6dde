use coinflip_client::{
    config,
    controller,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const LOG_FILE_PREFIX: &str = "coinflip.log";

/// Logs go to a daily file so the terminal stays with the UI.
fn init_tracing(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(appender)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {e}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let Some(config) = config::parse_args(std::env::args().skip(1))? else {
        println!("{}", config::usage());
        return Ok(());
    };
    init_tracing(&config.log_dir)?;
    tracing::info!(
        chain_id = config.game.chain.chain_id,
        contract = %config.game.contract,
        "starting coin flip client"
    );
    controller::run_app(config).await
}
