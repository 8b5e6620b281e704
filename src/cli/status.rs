use crate::error::Result;
use crate::fmt::format_bytes;
use crate::ledger::count_transactions;
use crate::settings::load_settings;

use super::open_configured_ledger;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("Data dir:    {}", settings.data_dir);
    println!("Database:    {}", db_path.display());
    println!(
        "Statements:  {}",
        settings.statements_dir.as_deref().unwrap_or("(not set)")
    );

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `ledgr init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:     {}", format_bytes(size));

    let conn = open_configured_ledger(&settings)?;
    let transactions = count_transactions(&conn)?;
    let uncategorized: i64 = conn.query_row(
        "SELECT count(*) FROM transactions WHERE category = 'Uncategorized'",
        [],
        |r| r.get(0),
    )?;
    let imports: i64 = conn.query_row("SELECT count(*) FROM imports", [], |r| r.get(0))?;
    let failed: i64 = conn.query_row(
        "SELECT count(*) FROM imports WHERE status != 'processed'",
        [],
        |r| r.get(0),
    )?;

    println!();
    println!("Transactions:   {transactions}");
    println!("Uncategorized:  {uncategorized}");
    println!("Imports:        {imports}");
    println!("Failed imports: {failed}");
    Ok(())
}
