use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::error::Result;
use crate::fmt::amount;
use crate::ledger::{list, DateRange};
use crate::models::TxnType;
use crate::settings::load_settings;

use super::open_configured_ledger;

pub fn run(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<()> {
    let conn = open_configured_ledger(&load_settings())?;
    let txns = list(&conn, DateRange { from, to })?;

    if txns.is_empty() {
        println!("No transactions.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Description", "Debit", "Credit", "Category"]);
    let (mut debits, mut credits) = (0.0, 0.0);
    for t in &txns {
        let (debit, credit) = match t.txn_type {
            TxnType::Debit => {
                debits += t.amount;
                (amount(t.amount), String::new())
            }
            TxnType::Credit => {
                credits += t.amount;
                (String::new(), amount(t.amount))
            }
        };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(&t.date),
            Cell::new(&t.description),
            Cell::new(debit).set_alignment(CellAlignment::Right),
            Cell::new(credit).set_alignment(CellAlignment::Right),
            Cell::new(&t.category),
        ]);
    }
    println!("{table}");
    println!(
        "{} transactions, debits {}, credits {}",
        txns.len(),
        amount(debits).red(),
        amount(credits).green()
    );
    Ok(())
}
