//! Главный исполняемый файл granlock

use anyhow::Context;
use clap::Parser;
use granlock::cli::{init_logging, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("не удалось загрузить конфигурацию")?;
    init_logging(&cli, &config);

    cli.execute(&config)?;
    Ok(())
}
