//! Docvault - command line entry point
//!
//! Drives identifier allocation, backups, restores and erasure against the
//! configured SQLite document store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docvault::backup::{RestoreMode, RestoreRequest, SnapshotOptions};
use docvault::{utils, Config, Vault, VaultError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "DOCVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration
    Config,

    /// Count documents per collection
    Stats {
        /// Comma-separated collections (default: all configured)
        #[arg(long, value_delimiter = ',')]
        collections: Vec<String>,
    },

    /// Compute the next free identifier of a namespace
    NextId { namespace: String },

    /// Check whether a candidate identifier is unused
    CheckId { namespace: String, candidate: String },

    /// Snapshot collections into files under --out
    Backup {
        #[arg(long, value_delimiter = ',', required = true)]
        collections: Vec<String>,

        #[arg(long, value_name = "DIR")]
        out: PathBuf,

        /// Encrypt the payload with the password read from --password-env
        #[arg(long, requires = "password_env")]
        encrypt: bool,

        /// Environment variable holding the password
        #[arg(long, value_name = "VAR")]
        password_env: Option<String>,

        /// Also write one CSV per collection
        #[arg(long)]
        tables: bool,

        /// Also write a compressed archive bundling everything
        #[arg(long)]
        archive: bool,

        /// Upload artifacts to the configured blob storage
        #[arg(long)]
        upload: bool,

        /// Leave unreadable collections out instead of failing
        #[arg(long)]
        skip_failed: bool,
    },

    /// List cataloged backups, newest first
    Backups,

    /// Restore a payload or archive file
    Restore {
        file: PathBuf,

        #[arg(long, default_value = "merge")]
        mode: RestoreMode,

        #[arg(long, value_name = "VAR")]
        password_env: Option<String>,

        #[arg(long, value_delimiter = ',')]
        collections: Vec<String>,

        /// Verify against this cataloged manifest
        #[arg(long)]
        backup_id: Option<String>,

        /// Proceed past merge conflicts
        #[arg(long)]
        yes: bool,

        /// Proceed past a checksum mismatch
        #[arg(long)]
        force_integrity: bool,
    },

    /// Delete every document of the given collections
    Erase {
        #[arg(long, value_delimiter = ',', required = true)]
        collections: Vec<String>,

        #[arg(long)]
        yes: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_password(var: Option<&str>) -> Result<Option<Zeroizing<String>>> {
    match var {
        None => Ok(None),
        Some(var) => {
            let value = std::env::var(var).with_context(|| format!("password variable {var} is not set"))?;
            Ok(Some(Zeroizing::new(value)))
        }
    }
}

/// Stop flag raised by Ctrl-C; running batches finish first.
fn stop_on_ctrl_c() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current batch");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    if let Command::Config = args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    tracing::info!("Starting docvault v{}", env!("CARGO_PKG_VERSION"));
    let vault = Vault::open(config)?;

    match args.command {
        Command::Config => {}

        Command::Stats { collections } => {
            let names = if collections.is_empty() {
                vault.collection_names()
            } else {
                collections
            };
            let stats = vault.stats(&names).await;
            print_json(&stats)?;
            if !stats.failed().is_empty() {
                bail!("could not count: {}", stats.failed().join(", "));
            }
        }

        Command::NextId { namespace } => {
            println!("{}", vault.next_id(&namespace).await?);
        }

        Command::CheckId { namespace, candidate } => {
            let available = vault.check_id(&namespace, &candidate).await?;
            println!("{}", if available { "available" } else { "taken" });
        }

        Command::Backup {
            collections,
            out,
            encrypt,
            password_env,
            tables,
            archive,
            upload,
            skip_failed,
        } => {
            let options = SnapshotOptions {
                encrypt,
                password: read_password(password_env.as_deref())?,
                tabular: tables,
                archive,
                upload,
                skip_failed,
            };
            let outcome = vault.builder().build(&collections, &options).await?;
            tokio::fs::create_dir_all(&out).await?;
            for artifact in &outcome.artifacts {
                let path = out.join(&artifact.file_name);
                tokio::fs::write(&path, &artifact.bytes)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                tracing::info!("Wrote {} ({} bytes)", path.display(), artifact.bytes.len());
            }
            print_json(&outcome.manifest)?;
            for failure in &outcome.failures {
                eprintln!("skipped {}: {}", failure.collection, failure.cause);
            }
        }

        Command::Backups => {
            print_json(&vault.catalog().list().await?)?;
        }

        Command::Restore {
            file,
            mode,
            password_env,
            collections,
            backup_id,
            yes,
            force_integrity,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let password = read_password(password_env.as_deref())?;
            let manifest = match &backup_id {
                Some(id) => Some(
                    vault
                        .catalog()
                        .get(id)
                        .await?
                        .with_context(|| format!("backup {id} is not in the catalog"))?,
                ),
                None => None,
            };
            let loaded = vault
                .restorer()
                .load_with_manifest(&bytes, password.as_deref().map(String::as_str), manifest)
                .await?;

            let request = RestoreRequest {
                mode,
                collections: (!collections.is_empty()).then_some(collections),
                confirm_integrity: force_integrity,
                confirm_conflicts: yes,
                stop: Some(stop_on_ctrl_c()),
            };
            match vault.restorer().restore(&loaded, &request).await {
                Ok(report) => {
                    print_json(&report)?;
                    if !report.is_complete() {
                        bail!("restore finished with {} failed collection(s)", report.failures.len());
                    }
                }
                Err(VaultError::Conflict(report)) => {
                    print_json(&report)?;
                    bail!("{} document(s) already exist; re-run with --yes to skip them", report.total());
                }
                Err(e @ VaultError::Integrity { .. }) => {
                    bail!("{e}; re-run with --force-integrity to restore anyway");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Command::Erase { collections, yes } => {
            if !yes {
                let stats = vault.stats(&collections).await;
                print_json(&stats)?;
                bail!("erasing {} document(s) requires --yes", stats.total());
            }
            let stop = stop_on_ctrl_c();
            let report = vault.eraser().erase(&collections, Some(&*stop)).await;
            print_json(&report)?;
            if !report.is_complete() {
                bail!("erase finished with {} failed collection(s)", report.failures.len());
            }
        }
    }

    Ok(())
}
