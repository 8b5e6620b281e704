use std::path::PathBuf;

use crate::db::open_ledger;
use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;
    open_ledger(&settings.db_path())?;

    println!("Initialized ledgr at {}", resolved.display());
    if settings.statements_dir.is_none() {
        println!("Set statements_dir in settings.json or pass a directory to `ledgr sync`.");
    }
    Ok(())
}
