use chrono::NaiveDate;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use crate::error::{LedgrError, Result};
use crate::models::{Candidate, StatementMeta, Transaction, TxnType};

/// Day-first formats seen on statements, plus ISO for hand-entered rows.
/// Two-digit years go first: `%Y` would read "25" as year 25.
const DATE_FORMATS: &[&str] = &[
    "%d/%m/%y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%Y-%m-%d",
];

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable dedup key for a (date, description, amount) triple.
///
/// Fields are joined with a unit separator so ("ab", "c") and ("a", "bc") differ.
/// The amount uses the shortest round-trip decimal form, so 150.0 and 150.00
/// parsed from different layouts give the same key.
pub fn identity_key(date: &str, description: &str, amount: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(date.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(description.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(amount.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Insert the candidate unless a row with the same identity key exists.
///
/// The check and the insert are one statement against the UNIQUE index, so two
/// racing runs can never commit the same key. Existing rows are never touched.
pub fn insert_if_absent(conn: &Connection, candidate: &Candidate) -> Result<bool> {
    let key = identity_key(&candidate.date, &candidate.description, candidate.amount);
    let changed = conn.execute(
        "INSERT INTO transactions (date, description, amount, type, category, unique_hash) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT(unique_hash) DO NOTHING",
        params![
            candidate.date,
            candidate.description,
            candidate.amount,
            candidate.txn_type.as_str(),
            candidate.category,
            key,
        ],
    )?;
    Ok(changed == 1)
}

/// Category edit made on behalf of a ledger consumer. The sync pipeline never calls this.
pub fn set_category(conn: &Connection, id: i64, category: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE transactions SET category = ?1 WHERE id = ?2",
        params![category, id],
    )?;
    if changed == 0 {
        return Err(LedgrError::UnknownTransaction(id));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Processed,
    DecryptFailed,
    Unreadable,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::DecryptFailed => "decrypt_failed",
            Self::Unreadable => "unreadable",
        }
    }
}

pub struct ImportLog<'a> {
    pub meta: &'a StatementMeta,
    pub checksum: &'a str,
    pub rows_seen: usize,
    pub inserted: usize,
    pub status: ImportStatus,
}

pub fn record_import(conn: &Connection, log: &ImportLog<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO imports (filename, subject, received_at, checksum, rows_seen, inserted, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            log.meta.filename,
            log.meta.envelope.as_ref().map(|e| e.subject.as_str()),
            log.meta.received_at.map(|t| t.to_rfc3339()),
            log.checksum,
            log.rows_seen as i64,
            log.inserted as i64,
            log.status.as_str(),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Parse a stored statement date, day first.
pub fn parse_statement_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Inclusive bounds; an open side is unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let txn_type: String = row.get(4)?;
    let txn_type = txn_type.parse::<TxnType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Transaction {
        id: row.get(0)?,
        date: row.get(1)?,
        description: row.get(2)?,
        amount: row.get(3)?,
        txn_type,
        category: row.get(5)?,
        unique_hash: row.get(6)?,
    })
}

/// Full scan in insertion order, or the rows whose date falls in `range`.
/// Rows with an unparseable date only show up in the full scan.
pub fn list(conn: &Connection, range: DateRange) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, description, amount, type, category, unique_hash \
         FROM transactions ORDER BY id",
    )?;
    let all = stmt
        .query_map([], row_to_transaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if range.is_open() {
        return Ok(all);
    }
    Ok(all
        .into_iter()
        .filter(|t| parse_statement_date(&t.date).is_some_and(|d| range.contains(d)))
        .collect())
}

pub fn count_transactions(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))?)
}
