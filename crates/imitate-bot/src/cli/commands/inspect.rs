use serde::Serialize;

use super::open;
use crate::cli::args::{MessagesArgs, StatsArgs};
use crate::exit_codes::SUCCESS;
use imitate_store::StorageConfig;

pub async fn check(config: StorageConfig) -> anyhow::Result<i32> {
    let storage = open(config).await?;
    let index = storage.index().await;
    println!("data dir:   {}", storage.config().data_dir.display());
    println!("schema:     {}", index.version);
    println!("identities: {}", index.names.len());
    println!("aliases:    {}", index.aliases.len());
    println!("integrity:  okay");
    storage.close().await?;
    Ok(SUCCESS)
}

pub async fn messages(config: StorageConfig, args: MessagesArgs) -> anyhow::Result<i32> {
    let storage = open(config).await?;

    // Reading an unknown identity would register it.
    if !storage.index().await.contains(&args.identity) {
        eprintln!("no history for {}", args.identity);
        storage.close().await?;
        return Ok(SUCCESS);
    }

    if args.joined {
        println!("{}", storage.get_messages_joined(&args.identity).await?);
    } else {
        for message in storage.get_messages(&args.identity).await? {
            println!("{message}");
        }
    }
    storage.close().await?;
    Ok(SUCCESS)
}

#[derive(Debug, Serialize)]
struct StatsReport {
    data_dir: String,
    identities: usize,
    aliases: usize,
    base_capacity: usize,
    capacity: usize,
    flex_index: f64,
    resident: usize,
}

pub async fn stats(config: StorageConfig, args: StatsArgs) -> anyhow::Result<i32> {
    let storage = open(config).await?;
    let index = storage.index().await;
    let cache = storage.stats();
    let report = StatsReport {
        data_dir: storage.config().data_dir.display().to_string(),
        identities: index.names.len(),
        aliases: index.aliases.len(),
        base_capacity: storage.config().cache.base_capacity,
        capacity: cache.capacity,
        flex_index: cache.flex_index,
        resident: cache.resident,
    };
    storage.close().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("data dir:      {}", report.data_dir);
        println!("identities:    {}", report.identities);
        println!("aliases:       {}", report.aliases);
        println!(
            "cache:         {} resident, capacity {} (base {}, flex {:.1})",
            report.resident, report.capacity, report.base_capacity, report.flex_index
        );
    }
    Ok(SUCCESS)
}
