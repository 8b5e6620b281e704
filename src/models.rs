use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Rows of text cells as they came off one table on one page. Row 0 is the header.
pub type RawGrid = Vec<Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    Debit,
    Credit,
}

impl TxnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "Debit",
            Self::Credit => "Credit",
        }
    }
}

impl fmt::Display for TxnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Debit" => Ok(Self::Debit),
            "Credit" => Ok(Self::Credit),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// A persisted ledger row.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: i64,
    pub date: String,
    pub description: String,
    pub amount: f64,
    pub txn_type: TxnType,
    pub category: String,
    pub unique_hash: String,
}

/// Output of the transaction builder, before the reconciler assigns an identity key.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub date: String,
    pub description: String,
    pub amount: f64,
    pub txn_type: TxnType,
    pub category: String,
}

/// A data row after header mapping: every field is trimmed, absent columns are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedRow {
    pub date: String,
    pub description: String,
    pub debit: String,
    pub credit: String,
}

/// Headers of the message a statement arrived in. Missing headers are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub subject: String,
    pub sender: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatementMeta {
    pub filename: String,
    /// `None` for a PDF found on disk rather than in a message.
    pub envelope: Option<Envelope>,
    pub received_at: Option<DateTime<Utc>>,
}

/// One attachment handed over by a statement source, still possibly encrypted.
#[derive(Debug, Clone)]
pub struct StatementDocument {
    pub bytes: Vec<u8>,
    pub meta: StatementMeta,
}
