use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod core;
pub mod storage;

const DEFAULT_FILTER: &str = "info,reelqueue=debug,reelqueue_core=debug";

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn run() -> anyhow::Result<()> {
    init_logging();

    let cli = commands::Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(commands::dispatch(cli))
}
