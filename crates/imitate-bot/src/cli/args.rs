use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "imitate",
    version,
    about = "Inspect and maintain the imitate bot's message store"
)]
pub struct Cli {
    /// Data directory holding meta.json and the record files
    #[arg(long, global = true, env = "IMITATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// YAML storage config (default: read IMITATE_* environment variables)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the store, running the schema and integrity checks
    Check,
    /// Print the message history of an identity
    Messages(MessagesArgs),
    /// Append a message to an identity's history
    Append(AppendArgs),
    /// Make one identity resolve to another's history
    Alias(AliasArgs),
    /// Show index and cache statistics
    Stats(StatsArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct MessagesArgs {
    pub identity: String,

    /// Print the history as one newline-joined block
    #[arg(long)]
    pub joined: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AppendArgs {
    pub identity: String,
    pub text: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AliasArgs {
    pub alias: String,
    pub canonical: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StatsArgs {
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "imitate",
            "append",
            "alice",
            "hello there",
            "--data-dir",
            "/tmp/imitate",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/imitate")));
        match cli.cmd {
            Command::Append(args) => {
                assert_eq!(args.identity, "alice");
                assert_eq!(args.text, "hello there");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_alias_requires_both_identities() {
        assert!(Cli::try_parse_from(["imitate", "alias", "ally"]).is_err());
        let cli = Cli::try_parse_from(["imitate", "alias", "ally", "alice"]).unwrap();
        assert!(matches!(
            cli.cmd,
            Command::Alias(AliasArgs { ref alias, ref canonical })
                if alias == "ally" && canonical == "alice"
        ));
    }

    #[test]
    fn test_stats_json_flag() {
        let cli = Cli::try_parse_from(["imitate", "stats", "--json"]).unwrap();
        assert!(matches!(cli.cmd, Command::Stats(StatsArgs { json: true })));
    }
}
