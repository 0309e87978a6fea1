//! Command line for the ledger indexer

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ERC20 balance ledger
///
/// Follows `Transfer` logs of every configured token and keeps a per-address
/// balance history in SQLite or Postgres.
#[derive(Parser, Debug)]
#[command(name = "erc20-ledger")]
#[command(about = "Index ERC20 Transfer logs into a balance ledger", long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Database URL (`sqlite://...`, `postgres://...` or a plain SQLite path)
    ///
    /// Overrides `database_url` from the configuration file.
    #[arg(long, env = "LEDGER_DATABASE_URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run one worker per configured token until interrupted (default)
    Run,

    /// Print the current ledger balance of an address
    Balance {
        /// Token name as configured
        #[arg(long)]
        token: String,

        /// Holder address, `0x`-prefixed
        #[arg(long)]
        address: String,
    },
}

/// Used when neither the CLI nor the config file names a database.
pub const DEFAULT_DATABASE_URL: &str = "./erc20-ledger.db";

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// CLI flag, then config file, then the default path.
    pub fn resolve_database_url(&self, from_file: Option<&str>) -> String {
        self.database_url
            .as_deref()
            .or(from_file)
            .unwrap_or(DEFAULT_DATABASE_URL)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["erc20-ledger"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert_eq!(cli.command(), Command::Run);
    }

    #[test]
    fn test_balance_subcommand() {
        let cli = Cli::try_parse_from([
            "erc20-ledger",
            "-c",
            "tokens.yaml",
            "balance",
            "--token",
            "USDT",
            "--address",
            "0x5041ed759dd4afc3a72b8192c143f72f4724081a",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("tokens.yaml"));
        assert!(matches!(cli.command(), Command::Balance { ref token, .. } if token == "USDT"));
    }

    #[test]
    fn test_database_url_precedence() {
        let cli = Cli::try_parse_from(["erc20-ledger", "--database-url", "postgres://db/ledger"])
            .unwrap();
        assert_eq!(
            cli.resolve_database_url(Some("sqlite://file.db")),
            "postgres://db/ledger"
        );

        let cli = Cli {
            database_url: None,
            ..cli
        };
        assert_eq!(cli.resolve_database_url(Some("sqlite://file.db")), "sqlite://file.db");
        assert_eq!(cli.resolve_database_url(None), DEFAULT_DATABASE_URL);
    }
}
