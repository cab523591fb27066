// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use homelab_console::download::{
    DownloadEntry, DownloadKind, DownloadStore, DownloadType, EntryId, StoreError,
};
use homelab_console::error::{format_error, store_error_report};
use homelab_console::logs::{self, LogSource};
use homelab_console::paths;
use homelab_console::Config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Data error - the submitted entry or path is invalid
    pub const DATA_ERR: i32 = 65;
    /// I/O error - the document could not be saved
    pub const IO_ERR: i32 = 74;
    /// Temporary failure - locked or changed underneath us, try again later
    pub const TEMP_FAIL: i32 = 75;
    /// Configuration error - config or downloads document missing or invalid
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

/// homelab - Admin console for the homelab downloader.
#[derive(Parser)]
#[command(name = "homelab")]
#[command(version = VERSION)]
#[command(about = "Manage scheduled downloads and browse homelab logs.")]
#[command(long_about = "homelab - Admin console for the homelab downloader\n\n\
    List downloads:      homelab downloads list\n\
    Add a docker image:  homelab downloads add docker nginx\n\
    Reorder:             homelab downloads move 3 0\n\
    Check a path:        homelab path check files/os/\n\
    Read logs:           homelab logs nginx access.log")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.homelab/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Quiet mode: only errors are logged
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode: detailed output for debugging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the scheduled downloads list
    #[command(alias = "dl")]
    Downloads {
        #[command(subcommand)]
        command: DownloadCommands,
    },

    /// Validate or clean a destination path
    Path {
        #[command(subcommand)]
        command: PathCommands,
    },

    /// Browse downloader and nginx logs
    ///
    /// Examples:
    ///   homelab logs nginx
    ///   homelab logs downloader download-2024-01-02.log
    Logs {
        /// Which logs: downloader or nginx
        source: LogSource,
        /// Log file to print (lists the directory if omitted)
        name: Option<String>,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DownloadCommands {
    /// Show scheduled downloads in stored order
    #[command(alias = "ls")]
    List {
        /// Only show one type: direct, pattern, or docker
        #[arg(long = "type")]
        download_type: Option<DownloadType>,
        /// Print entries as stored, as JSON
        #[arg(long)]
        json: bool,
    },

    /// Append a download
    ///
    /// Examples:
    ///   homelab downloads add direct https://example.org/os.iso files/os/
    ///   homelab downloads add pattern https://example.org/zim/ wiki/ --pattern 'wikipedia_en_all_maxi_.*\.zim' --latest
    ///   homelab downloads add docker nginx
    Add {
        #[command(subcommand)]
        kind: KindArgs,
    },

    /// Replace a download, addressed by position or id
    Update {
        /// Position (0-based) or id
        target: Target,
        #[command(subcommand)]
        kind: KindArgs,
    },

    /// Remove a download, addressed by position or id
    #[command(alias = "rm")]
    Delete {
        /// Position (0-based) or id
        target: Target,
    },

    /// Move a download to a new position
    #[command(alias = "mv")]
    Move {
        /// Position (0-based) or id
        from: Target,
        /// Position after the entry is taken out
        to: usize,
    },
}

#[derive(Subcommand)]
enum KindArgs {
    /// A single file
    Direct {
        url: String,
        /// Destination under the data root
        dest: String,
    },
    /// Files matching a regex under a directory listing
    Pattern {
        url: String,
        /// Destination under the data root
        dest: String,
        /// Regex the file names must match
        #[arg(long)]
        pattern: String,
        /// Keep only the latest match
        #[arg(long)]
        latest: bool,
    },
    /// A container image
    Docker {
        /// Image name without tag, e.g. nginx or bitnami/redis
        image: String,
        /// Registry namespace (default: library)
        #[arg(long, default_value = "")]
        namespace: String,
    },
}

impl KindArgs {
    fn into_kind(self) -> DownloadKind {
        match self {
            KindArgs::Direct { url, dest } => DownloadKind::Direct { url, dest },
            KindArgs::Pattern {
                url,
                dest,
                pattern,
                latest,
            } => DownloadKind::Pattern {
                url,
                dest,
                pattern,
                latest_only: latest,
            },
            KindArgs::Docker { image, namespace } => DownloadKind::Docker { image, namespace },
        }
    }
}

#[derive(Subcommand)]
enum PathCommands {
    /// Report whether a path is acceptable as a destination
    Check { path: String },
    /// Print the sanitized form of a path
    Clean { path: String },
}

/// A download addressed by position or by id.
#[derive(Debug, Clone)]
enum Target {
    Index(usize),
    Id(EntryId),
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<usize>() {
            Ok(index) => Ok(Target::Index(index)),
            Err(_) if s.is_empty() => Err("expected a position or an id".to_string()),
            Err(_) => Ok(Target::Id(EntryId::from(s))),
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::ERROR
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let causes = error_chain(&e);
            let causes: Vec<&str> = causes.iter().map(|s| s.as_str()).collect();
            eprint!(
                "{}",
                format_error(
                    &e.to_string(),
                    &causes,
                    &["Check that config.json is valid JSON", "Omit --config to use defaults"],
                )
            );
            std::process::exit(CONFIG);
        }
    };

    match cli.command {
        Commands::Downloads { command } => {
            let store = DownloadStore::from_config(&config);
            if let Err(e) = run_downloads(&store, command) {
                eprint!("{}", store_error_report(&e));
                std::process::exit(exit_code_for(&e));
            }
            Ok(())
        }
        Commands::Path { command } => run_path(command),
        Commands::Logs { source, name, json } => {
            run_logs(config.logs_dir(source).to_path_buf(), source, name, json)
        }
    }
}

fn exit_code_for(error: &StoreError) -> i32 {
    match error {
        e if e.is_validation() => DATA_ERR,
        StoreError::ConfigUnavailable(_) => CONFIG,
        StoreError::Locked(_) | StoreError::ConcurrentModification => TEMP_FAIL,
        StoreError::PersistFailure(_) => IO_ERR,
        _ => ERROR,
    }
}

fn error_chain(error: &dyn std::error::Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    causes
}

fn run_downloads(store: &DownloadStore, command: DownloadCommands) -> Result<(), StoreError> {
    match command {
        DownloadCommands::List {
            download_type,
            json,
        } => {
            let rows: Vec<(usize, DownloadEntry)> = store
                .list()
                .into_iter()
                .enumerate()
                .filter(|(_, entry)| download_type.map_or(true, |t| entry.download_type() == t))
                .collect();

            if json {
                let entries: Vec<&DownloadEntry> = rows.iter().map(|(_, entry)| entry).collect();
                match serde_json::to_string_pretty(&entries) {
                    Ok(text) => println!("{}", text),
                    Err(e) => tracing::error!(error = %e, "could not encode downloads"),
                }
                return Ok(());
            }

            if rows.is_empty() {
                println!("{}", "No scheduled downloads.".dimmed());
                return Ok(());
            }
            for (index, entry) in &rows {
                println!("{}", format_row(store, *index, entry));
            }
        }

        DownloadCommands::Add { kind } => {
            let entry = store.add(DownloadEntry::new(kind.into_kind()))?;
            println!("{} Added {} ({})", "[+]".green(), entry.id, entry.download_type());
        }

        DownloadCommands::Update { target, kind } => {
            let kind = kind.into_kind();
            // Fields the console does not edit stay with the entry.
            let stored = match target {
                Target::Index(index) => store.update_kind(index, kind)?,
                Target::Id(id) => store.update_kind_by_id(&id, kind)?,
            };
            println!("{} Updated {}", "[+]".green(), stored.id);
        }

        DownloadCommands::Delete { target } => {
            let removed = match target {
                Target::Index(index) => store.delete(index)?,
                Target::Id(id) => store.delete_by_id(&id)?,
            };
            println!("{} Deleted {} ({})", "[+]".green(), removed.id, removed.download_type());
        }

        DownloadCommands::Move { from, to } => {
            let from = match from {
                Target::Index(index) => {
                    store.move_entry(index, to)?;
                    index
                }
                Target::Id(id) => store.move_by_id(&id, to)?,
            };
            println!("{} Moved {} -> {}", "[+]".green(), from, to);
        }
    }
    Ok(())
}

fn format_row(store: &DownloadStore, index: usize, entry: &DownloadEntry) -> String {
    let root = store.data_root();
    let details = match &entry.kind {
        DownloadKind::Direct { url, dest } => {
            format!("{} -> {}", url, root.normalize(dest))
        }
        DownloadKind::Pattern {
            url,
            dest,
            pattern,
            latest_only,
        } => {
            let latest = if *latest_only { " (latest)" } else { "" };
            format!("{} /{}/{} -> {}", url, pattern, latest, root.normalize(dest))
        }
        DownloadKind::Docker { image, namespace } => format!("{}/{}", namespace, image),
    };
    format!(
        "{:>3}  {}  {:<7}  {}",
        index,
        entry.id.as_str().dimmed(),
        entry.download_type().as_str().cyan(),
        details
    )
}

fn run_path(command: PathCommands) -> Result<()> {
    match command {
        PathCommands::Check { path } => match paths::validation_error(&path) {
            None => println!("{} {} is a valid path", "[+]".green(), path),
            Some(reason) => {
                eprintln!("{} {}", "[✗]".red(), reason);
                let cleaned = paths::clean_path(&path);
                if !cleaned.is_empty() {
                    eprintln!("{} Suggested: {}", "[!]".yellow(), cleaned);
                }
                std::process::exit(DATA_ERR);
            }
        },
        PathCommands::Clean { path } => println!("{}", paths::clean_path(&path)),
    }
    Ok(())
}

fn run_logs(dir: PathBuf, source: LogSource, name: Option<String>, json: bool) -> Result<()> {
    if let Some(name) = name {
        let content = logs::read_log(&dir, &name)
            .with_context(|| format!("failed to read {} log `{}`", source, name))?;
        print!("{}", content);
        return Ok(());
    }

    let files = logs::list_logs(&dir)
        .with_context(|| format!("failed to list {} logs", source))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }

    println!("{}", source.title().bold());
    if files.is_empty() {
        println!("{}", "No log files.".dimmed());
    }
    for file in &files {
        let modified = file
            .modified
            .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("  {:<40} {:>10}  {}", file.name, file.size, modified.dimmed());
    }
    Ok(())
}
