//! Header-to-role mapping for statement tables.
//!
//! Statement revisions rename their columns freely, so recognising a new layout
//! is a matter of adding rows to [`DEFAULT_ALIASES`] (or `extra_aliases` in the
//! settings file). Header cells are trimmed and then matched exactly.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::models::{NormalizedRow, RawGrid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Date,
    Description,
    Debit,
    Credit,
    /// Single signed column: negative values are withdrawals.
    #[serde(rename = "amount")]
    SignedAmount,
}

pub const DEFAULT_ALIASES: &[(&str, ColumnRole)] = &[
    ("Txn Date", ColumnRole::Date),
    ("Date", ColumnRole::Date),
    ("Transaction Date", ColumnRole::Date),
    ("Tran Date", ColumnRole::Date),
    ("Posting Date", ColumnRole::Date),
    ("Transaction", ColumnRole::Description),
    ("Narration", ColumnRole::Description),
    ("Description", ColumnRole::Description),
    ("Particulars", ColumnRole::Description),
    ("Details", ColumnRole::Description),
    ("Withdrawals", ColumnRole::Debit),
    ("Debit", ColumnRole::Debit),
    ("Withdrawal Amt.", ColumnRole::Debit),
    ("Debit Amount", ColumnRole::Debit),
    ("Deposits", ColumnRole::Credit),
    ("Credit", ColumnRole::Credit),
    ("Deposit Amt.", ColumnRole::Credit),
    ("Credit Amount", ColumnRole::Credit),
    ("Amount", ColumnRole::SignedAmount),
];

#[derive(Debug, Clone)]
pub struct AliasTable {
    aliases: HashMap<String, ColumnRole>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self {
            aliases: DEFAULT_ALIASES
                .iter()
                .map(|(header, role)| (header.to_string(), *role))
                .collect(),
        }
    }
}

impl AliasTable {
    /// Built-in aliases overlaid with user-supplied ones. User entries win on conflict.
    pub fn with_extra(extra: &BTreeMap<String, ColumnRole>) -> Self {
        let mut table = Self::default();
        for (header, role) in extra {
            table.aliases.insert(header.trim().to_string(), *role);
        }
        table
    }

    pub fn role_of(&self, header: &str) -> Option<ColumnRole> {
        self.aliases.get(header.trim()).copied()
    }
}

/// Column index per role. The first header cell claiming a role keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub date: usize,
    pub description: Option<usize>,
    pub debit: Option<usize>,
    pub credit: Option<usize>,
    pub signed_amount: Option<usize>,
}

impl ColumnMapping {
    /// `None` when no header cell maps to the date role.
    pub fn from_header(header: &[String], aliases: &AliasTable) -> Option<Self> {
        let mut found: HashMap<ColumnRole, usize> = HashMap::new();
        for (idx, cell) in header.iter().enumerate() {
            if let Some(role) = aliases.role_of(cell) {
                found.entry(role).or_insert(idx);
            }
        }
        Some(Self {
            date: *found.get(&ColumnRole::Date)?,
            description: found.get(&ColumnRole::Description).copied(),
            debit: found.get(&ColumnRole::Debit).copied(),
            credit: found.get(&ColumnRole::Credit).copied(),
            signed_amount: found.get(&ColumnRole::SignedAmount).copied(),
        })
    }

    pub fn apply(&self, row: &[String]) -> NormalizedRow {
        let cell = |idx: Option<usize>| -> String {
            idx.and_then(|i| row.get(i))
                .map(|c| c.trim().to_string())
                .unwrap_or_default()
        };

        let mut normalized = NormalizedRow {
            date: cell(Some(self.date)),
            description: cell(self.description),
            debit: cell(self.debit),
            credit: cell(self.credit),
        };

        if normalized.debit.is_empty() && normalized.credit.is_empty() {
            let signed = cell(self.signed_amount);
            if is_negative(&signed) {
                normalized.debit = signed;
            } else {
                normalized.credit = signed;
            }
        }
        normalized
    }
}

fn is_negative(raw: &str) -> bool {
    raw.starts_with('-') || (raw.starts_with('(') && raw.ends_with(')'))
}

/// Why a whole grid was left out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridSkip {
    /// Header only, or nothing at all.
    TooFewRows,
    NoDateColumn,
}

/// Map a raw grid onto canonical rows. The header row is consumed, not returned.
pub fn normalize(grid: &RawGrid, aliases: &AliasTable) -> Result<Vec<NormalizedRow>, GridSkip> {
    let Some((header, data)) = grid.split_first() else {
        return Err(GridSkip::TooFewRows);
    };
    if data.is_empty() {
        return Err(GridSkip::TooFewRows);
    }
    let mapping = ColumnMapping::from_header(header, aliases).ok_or(GridSkip::NoDateColumn)?;
    Ok(data.iter().map(|row| mapping.apply(row)).collect())
}
