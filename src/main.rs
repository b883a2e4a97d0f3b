use std::path::PathBuf;

use clap::Parser;

use centinela::cli::Driver;
use centinela::{Config, bootstrap, init_tracing};

/// Interactive identity and access-control core.
#[derive(Parser)]
#[command(name = "centinela")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a config file (defaults to the usual lookup locations)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(&path)?,
        None => Config::load()?,
    };
    config.validate()?;

    init_tracing(&config.general.log_level);

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();

    if config.general.worker_threads > 0 {
        builder.worker_threads(config.general.worker_threads);
    }

    let runtime = builder.build()?;
    let service = runtime.block_on(bootstrap(&config))?;

    Driver::new(&runtime, &service).run()
}
