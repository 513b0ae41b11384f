use super::args::*;

pub mod inspect;
pub mod update;

use anyhow::Context;
use imitate_store::{Storage, StorageConfig};

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli)?;
    match cli.cmd {
        Command::Check => inspect::check(config).await,
        Command::Messages(args) => inspect::messages(config, args).await,
        Command::Stats(args) => inspect::stats(config, args).await,
        Command::Append(args) => update::append(config, args).await,
        Command::Alias(args) => update::alias(config, args).await,
    }
}

/// Config file if given, else the environment; `--data-dir` wins over both.
pub(crate) fn load_config(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let config = match &cli.config {
        Some(path) => StorageConfig::from_yaml_file(path)?,
        None => StorageConfig::from_env(),
    };
    Ok(match &cli.data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    })
}

pub(crate) async fn open(config: StorageConfig) -> anyhow::Result<Storage> {
    let data_dir = config.data_dir.clone();
    Storage::open(config)
        .await
        .with_context(|| format!("failed to open {}", data_dir.display()))
}
