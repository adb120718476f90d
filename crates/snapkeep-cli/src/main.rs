//! Snapkeep CLI - operator interface for backups
//!
//! Provides `snapkeep create`, `snapkeep list`, `snapkeep restore`, and the
//! other archive management commands. Results go to stdout as JSON, logs
//! to stderr.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use serde_json::json;
use snapkeep_core::{BackupService, EngineConfig, RestoreSelection};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "config.json";

#[derive(Parser)]
#[command(name = "snapkeep")]
#[command(about = "Snapkeep - snapshot backups and group restore")]
#[command(version)]
struct Cli {
    /// Engine config file (defaults to <data-dir>/config.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Application data directory (defaults to ~/.snapkeep)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List restore groups
    Groups,
    /// List backups, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a new backup
    Create,
    /// Show the manifest of a backup
    Manifest {
        /// Backup filename
        file: String,
    },
    /// Restore a backup, fully or by group
    #[command(group(ArgGroup::new("selection").required(true).args(["full", "group"])))]
    Restore {
        /// Backup filename
        file: String,
        /// Restore every group
        #[arg(long)]
        full: bool,
        /// Group key to restore (can specify multiple times)
        #[arg(long = "group", value_name = "KEY")]
        group: Vec<String>,
    },
    /// Delete a backup
    Delete {
        /// Backup filename
        file: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Copy a backup out of the backup directory
    Download {
        /// Backup filename
        file: String,
        /// Destination directory
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Add an archive to the backup directory
    Upload {
        /// Path of the archive to upload
        path: PathBuf,
    },
    /// Delete all but the newest backups
    Prune {
        /// Number of backups to keep
        #[arg(long)]
        keep: usize,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snapkeep=info")),
        )
        .with_writer(io::stderr)
        .init();
}

fn get_data_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".snapkeep"))
}

fn load_config(cli_config: Option<&Path>, data_dir: &Path) -> Result<EngineConfig> {
    if let Some(path) = cli_config {
        return EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    let default_path = data_dir.join(CONFIG_FILE);
    if default_path.is_file() {
        return EngineConfig::load(&default_path)
            .with_context(|| format!("Failed to load config {}", default_path.display()));
    }

    debug!(data_dir = %data_dir.display(), "No config file, using defaults");
    Ok(EngineConfig::for_data_root(data_dir))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = get_data_dir(cli.data_dir)?;
    let config = load_config(cli.config.as_deref(), &data_dir)?;

    // Groups need no database connection, so the service opens per command
    let open = || BackupService::from_config(config.clone());

    match cli.command {
        Commands::Groups => print_json(&config.catalog().groups().collect::<Vec<_>>()),
        Commands::List { json } => run_list(&open()?, json),
        Commands::Create => print_json(&open()?.create_backup()?),
        Commands::Manifest { file } => print_json(&open()?.read_manifest(&file)?),
        Commands::Restore { file, full, group } => {
            let selection = if full {
                RestoreSelection::Full
            } else {
                RestoreSelection::from_keys(group)
            };
            let report = open()?.restore(&file, &selection)?;
            print_json(&report)?;
            if !report.success {
                bail!(
                    "Restore finished with failures: {}",
                    report.failed_tables().join(", ")
                );
            }
            Ok(())
        }
        Commands::Delete { file, force } => run_delete(&open()?, &file, force),
        Commands::Download { file, output } => {
            let source = open()?.archive_path(&file)?;
            if !output.is_dir() {
                bail!("Output directory does not exist: {}", output.display());
            }
            let dest = output.join(&file);
            let size = fs::copy(&source, &dest)
                .with_context(|| format!("Failed to copy to {}", dest.display()))?;
            print_json(&json!({ "filename": file, "path": dest, "size": size }))
        }
        Commands::Upload { path } => {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Not a file path: {}", path.display()))?
                .to_string();
            let file =
                File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            print_json(&open()?.upload_backup(&filename, file)?)
        }
        Commands::Prune { keep } => {
            let deleted = open()?.prune_backups(keep)?;
            print_json(&json!({ "deleted": deleted }))
        }
    }
}

fn run_list(service: &BackupService, json: bool) -> Result<()> {
    let listings = service.list_backups()?;
    if json {
        return print_json(&listings);
    }

    if listings.is_empty() {
        println!("No backups found.");
        return Ok(());
    }

    println!("Backups:");
    for listing in listings {
        let tables = listing
            .manifest
            .as_ref()
            .map_or_else(|| "manifest unreadable".to_string(), |m| {
                format!("{} tables", m.tables.len())
            });
        println!("  {} - {} bytes ({tables})", listing.filename, listing.size);
    }
    Ok(())
}

fn run_delete(service: &BackupService, file: &str, force: bool) -> Result<()> {
    // Surface bad names and missing files before prompting
    service.archive_path(file)?;

    if !force {
        print!("Delete backup '{file}'? [y/N] ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    service.delete_backup(file)?;
    print_json(&json!({ "deleted": file }))
}
