use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docscope::scope::{Scope, ScopeSelector};

#[derive(Debug, Parser)]
#[command(
    name = "docscope",
    about = "Scoped semantic search over your documentation"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the document sources of each scope
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
    /// Search one scope or all of them
    Search(SearchArgs),
    /// Re-ingest and re-embed sources into fresh collections
    Rebuild(RebuildArgs),
    /// Show collection states and configuration
    Status(StatusArgs),
    /// Copy every collection file into a directory
    Backup(BackupArgs),
    /// Replace collections with files from a backup directory
    Restore(RestoreArgs),
    /// Manage persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Source subcommands --

#[derive(Debug, Subcommand)]
pub enum SourceAction {
    /// Register a file or directory as a source of a scope
    Add {
        /// Path to the file or directory
        path: PathBuf,
        /// Scope the documents belong to
        #[arg(short, long)]
        scope: Scope,
    },
    /// Unregister a source
    Remove {
        /// Path the source was registered with
        path: PathBuf,
    },
    /// List registered sources
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Settings subcommands --

#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Show the effective settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting
    Set {
        /// Setting name (e.g. provider, endpoint, max_distance)
        key: String,
        value: String,
    },
    /// Remove a stored setting (revert to default)
    Clear {
        /// Setting name
        key: String,
    },
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Scope to search, or "all"
    #[arg(short, long, default_value = "all")]
    pub scope: ScopeSelector,

    /// Number of results to return (1-100)
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Rebuild --

#[derive(Debug, Parser)]
pub struct RebuildArgs {
    /// Scope to rebuild, or "all"
    #[arg(short, long, default_value = "all")]
    pub scope: ScopeSelector,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Backup / restore --

#[derive(Debug, Parser)]
pub struct BackupArgs {
    /// Destination directory (defaults to <data-dir>/backups/<timestamp>)
    pub dest: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct RestoreArgs {
    /// Directory holding collection files written by `backup`
    pub src: PathBuf,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docscope",
            &mut std::io::stdout(),
        );
    }
}
