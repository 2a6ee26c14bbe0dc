pub mod serial;
pub mod device;
pub mod config;
pub mod cli;

use clap::Parser;

use cli::Cli;
use config::AppConfig;

/// Parse the command line, set up logging and run the console.
/// Returns the process exit code.
pub fn run() -> anyhow::Result<i32> {
  let cli = Cli::parse();
  let config = AppConfig::load_or_default(cli.config.as_deref())?;

  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
    .init();

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()?;

  log::info!("configver {} started", env!("CARGO_PKG_VERSION"));
  runtime.block_on(cli::execute(cli, config))
}
