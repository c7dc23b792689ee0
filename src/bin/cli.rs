//! dedupstore CLI
//!
//! Command-line interface for inspecting and editing a store on local disk.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dedupstore::{ContentKey, DataStore, StoreError};
use tracing_subscriber::{fmt, EnvFilter};

/// dedupstore CLI
#[derive(Parser, Debug)]
#[command(name = "dedupstore")]
#[command(about = "Content-addressable, deduplicating blob store")]
#[command(version)]
struct Args {
    /// Root directory holding the stores
    #[arg(short, long, default_value = "./dedupstore_data")]
    root: PathBuf,

    /// Qualified store name; dots descend into substores (e.g. main.pfps)
    #[arg(short, long, default_value = "main")]
    store: String,

    /// Log store activity to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a file ("-" for stdin) and print its key
    Put {
        /// File to store
        path: PathBuf,
    },

    /// Write a blob to stdout or a file
    Get {
        /// Content key
        key: ContentKey,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Drop one reference to a key
    Release {
        /// Content key
        key: ContentKey,
    },

    /// Print the reference count of a key
    Refs {
        /// Content key
        key: ContentKey,

        /// Report 0 instead of 1 when the blob does not exist
        #[arg(long)]
        check_exists: bool,
    },

    /// Check whether a key has a blob (exit code 1 when absent)
    Exists {
        /// Content key
        key: ContentKey,
    },

    /// List every key in the store
    List,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; stdout carries blob bytes and command output
    let default_filter = if args.verbose { "info,dedupstore=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, CliError> {
    let store = open_store(&args.root, &args.store)?;
    let mut stdout = io::stdout().lock();

    match args.command {
        Commands::Put { path } => {
            let data = if path.as_os_str() == "-" {
                let mut buf = Vec::new();
                io::stdin().read_to_end(&mut buf)?;
                buf
            } else {
                fs::read(&path)?
            };
            let key = store.store(&data)?;
            writeln!(stdout, "{}", key)?;
        }
        Commands::Get { key, output } => {
            let data = store.retrieve(key)?;
            match output {
                Some(path) => fs::write(path, data)?,
                None => stdout.write_all(&data)?,
            }
        }
        Commands::Release { key } => {
            let reclaimed = store.release(key)?;
            writeln!(stdout, "{}", if reclaimed { "reclaimed" } else { "retained" })?;
        }
        Commands::Refs { key, check_exists } => {
            let count = store.get_key_references(key, check_exists)?;
            writeln!(stdout, "{}", count)?;
        }
        Commands::Exists { key } => {
            let exists = store.key_exists(key);
            writeln!(stdout, "{}", exists)?;
            if !exists {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::List => {
            for key in store.keys()? {
                writeln!(stdout, "{}", key)?;
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Resolve "main.pfps.large" to root "main" → substore "pfps" → "large"
fn open_store(root: &Path, qualified_name: &str) -> Result<Arc<DataStore>, StoreError> {
    let mut segments = qualified_name.split('.');
    let root_name = segments.next().unwrap_or_default();

    let mut store = DataStore::from_root(root, root_name)?;
    for segment in segments {
        store = store.get_substore(segment)?;
    }
    Ok(store)
}

/// Errors surfaced by the CLI
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
