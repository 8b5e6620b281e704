use crate::error::Result;
use crate::ledger::set_category;
use crate::settings::load_settings;

use super::open_configured_ledger;

pub fn run(id: i64, category: &str) -> Result<()> {
    let conn = open_configured_ledger(&load_settings())?;
    set_category(&conn, id, category)?;
    println!("Transaction {id} -> {category}");
    Ok(())
}
