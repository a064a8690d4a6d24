//! modhost - runtime module host
//!
//! Usage:
//!   modhost run [--config host.toml]
//!   modhost scan <dir>
//!   modhost validate <unit.wasm> [--tenant]
//!   modhost deps <unit.wasm>
//!   modhost pack <unit.wasm> <manifest.toml> -o <out.wasm>

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use modhost::admin::AdminCommand;
use modhost::config::HostConfig;
use modhost::module::loader::build_engine;
use modhost::module::registry::manifest::{embed_manifest, UnitManifest};
use modhost::module::registry::CandidateScanner;
use modhost::module::{Capability, ModuleManager, ModuleValidator, Scope, ValidationResult};
use modhost::utils::{init_logging_from_config, wait_for_shutdown_signal};

/// Runtime module host
#[derive(Parser, Debug)]
#[command(name = "modhost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load global modules and serve admin commands on stdin
    Run,
    /// List candidate units in a directory
    Scan {
        dir: PathBuf,
    },
    /// Validate a unit against the global or tenant module contract
    Validate {
        path: PathBuf,
        /// Check the tenant module contract
        #[arg(long)]
        tenant: bool,
    },
    /// Report restricted dependencies of a unit
    Deps {
        path: PathBuf,
    },
    /// Embed a manifest into a unit
    Pack {
        unit: PathBuf,
        manifest: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    let config = match path {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_logging_from_config(&config.logging);

    match args.command {
        Command::Run => run(config).await,
        Command::Scan { dir } => {
            let scanner = CandidateScanner::new(config.modules.extension.clone());
            for candidate in scanner.scan(&dir)? {
                let version = candidate
                    .manifest
                    .as_ref()
                    .and_then(|m| m.version.as_deref())
                    .unwrap_or("-");
                println!("{}\t{}\t{}", candidate.name, version, candidate.path.display());
            }
            Ok(())
        }
        Command::Validate { path, tenant } => {
            let engine = build_engine(config.modules.hook_fuel)?;
            let validator = ModuleValidator::new(&engine, &config.modules);
            let capability = if tenant {
                Capability::TenantScoped
            } else {
                Capability::Global
            };
            match validator.validate(&path, capability) {
                ValidationResult::Valid {
                    name, type_name, ..
                } => {
                    println!(
                        "{}: valid {} `{}` (type {})",
                        path.display(),
                        capability,
                        name,
                        type_name
                    );
                    Ok(())
                }
                ValidationResult::Invalid(reason) => bail!("{}: {}", path.display(), reason),
            }
        }
        Command::Deps { path } => {
            let manager = ModuleManager::new(&config)?;
            let report = manager.check_dependencies(&path)?;
            if report.is_clean() {
                println!("{}: no restricted dependencies", path.display());
            } else {
                for violation in report.violations {
                    println!("{}", violation);
                }
            }
            Ok(())
        }
        Command::Pack {
            unit,
            manifest,
            output,
        } => {
            let bytes = std::fs::read(&unit)
                .with_context(|| format!("Failed to read {}", unit.display()))?;
            let manifest = UnitManifest::from_file(&manifest)?;
            let packed = embed_manifest(&bytes, &manifest)?;
            std::fs::write(&output, packed)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "packed {} as `{}` into {}",
                unit.display(),
                manifest.name,
                output.display()
            );
            Ok(())
        }
    }
}

async fn run(config: HostConfig) -> Result<()> {
    let manager = ModuleManager::new(&config)?;

    let (loaded, total) = manager.load_all(Scope::Global).await;
    info!("Loaded {}/{} global modules", loaded, total);
    manager.set_connected().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line.context("Failed to read admin command")?,
        };
        let Some(line) = line else {
            break;
        };

        match AdminCommand::parse(&line) {
            Ok(Some(AdminCommand::Quit)) => break,
            Ok(Some(command)) => println!("{}", command.execute(&manager).await),
            Ok(None) => {}
            Err(e) => {
                warn!("Rejected admin command `{}`: {}", line.trim(), e);
                println!("error: {}", e);
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
