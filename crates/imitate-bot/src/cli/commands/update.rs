use tracing::info;

use super::open;
use crate::cli::args::{AliasArgs, AppendArgs};
use crate::exit_codes::SUCCESS;
use imitate_store::StorageConfig;

pub async fn append(config: StorageConfig, args: AppendArgs) -> anyhow::Result<i32> {
    let storage = open(config).await?;
    storage.append_message(&args.identity, &args.text).await?;
    let count = storage.get_messages(&args.identity).await?.len();
    storage.close().await?;

    info!(identity = %args.identity, messages = count, "appended message");
    Ok(SUCCESS)
}

pub async fn alias(config: StorageConfig, args: AliasArgs) -> anyhow::Result<i32> {
    let storage = open(config).await?;
    let result = storage.add_alias(&args.alias, &args.canonical).await;
    // Close even when the alias was rejected.
    storage.close().await?;
    result?;

    println!("{} -> {}", args.alias, args.canonical);
    Ok(SUCCESS)
}
