use clap::{Parser, Subcommand};
use provenance_ledger::config::LedgerConfig;
use provenance_ledger::ledger::{Ledger, LedgerSnapshot};
use provenance_ledger::monitoring::{init_tracing, LogConfig};
use provenance_ledger::store::{ChainStore, JsonFileStore};
use provenance_ledger::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Verify and inspect a persisted provenance ledger.
#[derive(Parser, Debug)]
#[command(name = "verify-ledger", version, about)]
struct Cli {
    /// Ledger configuration file (JSON)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay full verification over a ledger file
    Verify {
        /// Ledger snapshot file (defaults to the configured store path)
        file: Option<PathBuf>,
        /// Expected genesis seed (hex), overrides the configuration
        #[arg(long, value_name = "HASH")]
        genesis_hash: Option<String>,
    },
    /// Print chain statistics as JSON
    Info {
        /// Ledger snapshot file (defaults to the configured store path)
        file: Option<PathBuf>,
    },
    /// Print a provider's sealed history as JSON
    History {
        /// Provider identifier
        provider: String,
        /// Ledger snapshot file (defaults to the configured store path)
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&log_config(cli.verbose, &config)) {
        eprintln!("{}", e);
    }

    if let Err(e) = run(cli.command, config).await {
        error!(error = %e, "verify-ledger failed");
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<LedgerConfig> {
    match path {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    }
    .with_env_overrides()
}

/// `-v` overrides the configured logging; without it `config.log` applies.
fn log_config(verbose: u8, config: &LedgerConfig) -> LogConfig {
    if verbose > 0 {
        LogConfig::for_verbosity(verbose)
    } else {
        config.log.clone()
    }
}

async fn run(command: Command, config: LedgerConfig) -> Result<()> {
    match command {
        Command::Verify { file, genesis_hash } => {
            let mut config = config;
            if let Some(hash) = genesis_hash {
                config.genesis_hash = hash;
                config.validate()?;
            }
            let ledger = load(file, config).await?;
            println!(
                "✓ {} blocks verified ({} transactions)",
                ledger.len(),
                ledger.blocks().iter().map(|b| b.transaction_count()).sum::<usize>()
            );
        }
        Command::Info { file } => {
            let ledger = load(file, config).await?;
            println!("{}", serde_json::to_string_pretty(&ledger.chain_info()?)?);
        }
        Command::History { provider, file } => {
            let ledger = load(file, config).await?;
            let history = ledger.history(&provider);
            info!(provider = %provider, entries = history.len(), "History loaded");
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
    }
    Ok(())
}

async fn load(file: Option<PathBuf>, config: LedgerConfig) -> Result<Ledger> {
    let file = file
        .or_else(|| config.store_path.clone())
        .ok_or_else(|| Error::InvalidConfig("no ledger file given and no store_path configured".into()))?;
    info!(path = %file.display(), "Verifying ledger");
    let snapshot: LedgerSnapshot = JsonFileStore::new(&file)
        .load()
        .await?
        .ok_or_else(|| Error::Validation(format!("no ledger at {}", file.display())))?;
    Ledger::from_snapshot(snapshot, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use provenance_ledger::monitoring::LogLevel;

    #[test]
    fn test_configured_log_applies_without_verbose_flag() {
        let mut config = LedgerConfig::default();
        config.log.level = LogLevel::Debug;

        assert_eq!(log_config(0, &config).level, LogLevel::Debug);
        assert_eq!(log_config(3, &config).level, LogLevel::Trace);
    }

    #[tokio::test]
    async fn test_load_falls_back_to_store_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let config = LedgerConfig {
            store_path: Some(path.clone()),
            ..LedgerConfig::for_testing(0)
        };
        let ledger = Ledger::new(config.clone()).unwrap();
        JsonFileStore::new(&path).save(&ledger.snapshot()).await.unwrap();

        let loaded = load(None, config).await.unwrap();
        assert_eq!(loaded.len(), 1);

        let err = load(None, LedgerConfig::for_testing(0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
