pub mod categorize;
pub mod init;
pub mod list;
pub mod status;
pub mod sync;

use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand};

use crate::db::open_ledger;
use crate::error::{LedgrError, Result};
use crate::settings::Settings;

/// Open the ledger named by the current settings, refusing to create one outside `init`.
pub(crate) fn open_configured_ledger(settings: &Settings) -> Result<rusqlite::Connection> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(LedgrError::Settings(format!(
            "No database found at {}\nRun `ledgr init` to set up.",
            db_path.display()
        )));
    }
    open_ledger(&db_path)
}

#[derive(Parser)]
#[command(name = "ledgr", about = "Turn emailed bank statements into a deduplicated ledger.")]
pub struct Cli {
    /// More log output (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the ledger database.
    Init {
        /// Path for ledgr data (default: ~/Documents/ledgr)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Ingest statements from a directory of exported mail and PDFs.
    Sync {
        /// Directory to read (default: statements_dir from settings)
        dir: Option<String>,
        /// Only messages whose From header contains this text
        #[arg(long)]
        sender: Option<String>,
        /// Only messages whose Subject contains this text
        #[arg(long)]
        subject: Option<String>,
        /// Only statements received on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Only the N most recently received statements
        #[arg(long)]
        last: Option<usize>,
    },
    /// List ledger transactions.
    List {
        /// First date to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last date to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Set the category of one transaction.
    Categorize {
        /// Transaction ID as shown by `ledgr list`
        id: i64,
        /// Category name to assign
        category: String,
    },
    /// Show data directory, database and ledger counts.
    Status,
}
