//! Binary entrypoint for the armory CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and the data directories
//! - `load` - bulk load every record and print a per-file report
//! - `list` / `status` - inspect the registry
//! - `create` / `create-group` / `clone` / `delete` / `import` - manage records
//! - `unlock` / `reload-record` / `clean-backups` - the external-edit workflow
//!
//! See the library crate docs for module-level details: `armory::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use armory::config::Config;
use armory::{RecordStore, ReloadOutcome};

#[derive(Parser)]
#[command(name = "armory")]
#[command(about = "File-backed registry for user-editable game items and groups")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration and data directory
    Init,
    /// Load every record from disk and report per-file results
    Load,
    /// List all records, marking any that are unlocked for editing
    List,
    /// Create a new item and save it
    Create {
        /// Item name (also the filename stem)
        name: String,
    },
    /// Create a new item group and save it
    CreateGroup {
        name: String,
        /// Regex over item names selecting the members
        #[arg(long)]
        regex: Option<String>,
    },
    /// Clone an item under a new name with a fresh uid
    Clone {
        source: String,
        name: String,
    },
    /// Remove a record; its file is backed up and deleted unless kept
    Delete {
        name: String,
        /// Leave the backing file on disk
        #[arg(long)]
        keep_file: bool,
    },
    /// Load a record document from anywhere on disk (copied into records/)
    Import {
        path: String,
    },
    /// Release a record's file lock and back it up for external editing
    Unlock {
        name: String,
    },
    /// Reload a record from its possibly hand-edited backing file
    ReloadRecord {
        name: String,
    },
    /// Delete all .bak files (refused while any record is unlocked)
    CleanBackups,
    /// Show registry status and statistics
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).ok(),
    };
    init_logging(&pre_config, cli.verbose);

    if let Commands::Init = cli.command {
        Config::create_default(&cli.config)?;
        let config = Config::load(&cli.config)?;
        RecordStore::open(&config.registry)?;
        println!(
            "Created {} and data directories under {}",
            cli.config, config.registry.data_dir
        );
        return Ok(());
    }

    let config = pre_config
        .ok_or_else(|| anyhow!("no readable config at {}; run `armory init` first", cli.config))?;
    let mut store = RecordStore::open(&config.registry)?;
    let report = store.load_all();
    for (path, err) in &report.failures {
        eprintln!("failed to load {}: {}", path.display(), err);
    }

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Load => {
            println!(
                "Loaded {} records ({} failures)",
                report.loaded.len(),
                report.failures.len()
            );
        }
        Commands::List => {
            if store.record_count() == 0 {
                println!("No records.");
            }
            for name in store.names() {
                let marker = if store.is_unlocked(&name) {
                    " (unlocked for editing)"
                } else {
                    ""
                };
                println!("{}{}", name, marker);
            }
        }
        Commands::Create { name } => {
            store.new_item(&name)?;
            store.save(&name)?;
            println!("Created item '{}'", name);
        }
        Commands::CreateGroup { name, regex } => {
            store.new_group(&name, regex)?;
            store.save(&name)?;
            println!("Created group '{}'", name);
        }
        Commands::Clone { source, name } => {
            store.clone_item(&source, &name)?;
            store.save(&name)?;
            println!("Cloned '{}' as '{}'", source, name);
        }
        Commands::Delete { name, keep_file } => {
            let removed = store.delete(&name, !keep_file)?;
            println!("Deleted '{}'", removed);
        }
        Commands::Import { path } => {
            let loaded = store.load_file(std::path::Path::new(&path))?;
            println!(
                "Imported {} '{}' (uid {})",
                loaded.kind.as_str(),
                loaded.name,
                loaded.uid
            );
        }
        Commands::Unlock { name } => {
            let backup = store.unlock_and_backup(&name)?;
            let record = store
                .lookup(&name)
                .ok_or_else(|| anyhow!("record vanished: {}", name))?;
            println!(
                "Unlocked {} for editing; backup at {}",
                record
                    .backing_file()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| name.clone()),
                backup.display()
            );
        }
        Commands::ReloadRecord { name } => match store.reload(&name)? {
            ReloadOutcome::Reloaded => println!("Reloaded '{}'", name),
            ReloadOutcome::RecoveredFromBackup => {
                println!("'{}' failed to parse; recovered from backup", name)
            }
            ReloadOutcome::FileDeleted => {
                println!("File for '{}' is gone; record removed", name)
            }
        },
        Commands::CleanBackups => {
            let removed = store.clean_backups()?;
            println!("Removed {} backup files", removed);
        }
        Commands::Status => {
            println!("Data dir:  {}", store.data_dir().display());
            println!("Lock mode: {:?}", store.lock_mode());
            println!(
                "Records:   {} ({} items, {} groups)",
                store.record_count(),
                store.items().count(),
                store.groups().count()
            );
            let unlocked = store.unlocked_names();
            if !unlocked.is_empty() {
                println!("Unlocked:  {}", unlocked.join(", "));
            }
            if !report.failures.is_empty() {
                println!("Load failures: {}", report.failures.len());
            }
        }
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    // Plain output when stdout is not a terminal (pipes, cron, service).
    if !atty::is(atty::Stream::Stdout) {
        builder.write_style(env_logger::WriteStyle::Never);
    }

    if let Some(cfg) = config {
        if let Some(ref file) = cfg.logging.file {
            if let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(file) {
                builder.target(env_logger::Target::Pipe(Box::new(f)));
            }
        }
    }

    let _ = builder.try_init();
}
