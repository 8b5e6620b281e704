use std::fmt;

use crate::models::{Candidate, NormalizedRow, TxnType, DEFAULT_CATEGORY};

/// Shortest date string worth keeping ("1/1/25" passes, "n/a" does not).
const MIN_DATE_LEN: usize = 5;

/// Characters used as thousands separators across statement locales.
const THOUSANDS_SEPARATORS: &[char] = &[',', '\'', '\u{a0}', '\u{202f}'];

/// Parse a statement amount cell into a non-negative magnitude.
///
/// Thousands separators, currency symbols and surrounding quotes are dropped,
/// and a leading sign or accounting parentheses are accepted. Anything left that
/// is not a plain decimal number (blank, `-`, `N/A`, stray text) yields `0.0`.
pub fn parse_magnitude(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .trim_matches('"')
        .chars()
        .filter(|c| !THOUSANDS_SEPARATORS.contains(c) && *c != '$' && *c != '₹')
        .collect();
    let mut s = cleaned.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        s = inner.trim();
    }
    let s = s.strip_prefix(['-', '+']).unwrap_or(s);

    let is_decimal = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_digit() || c == '.')
        && s.chars().filter(|c| *c == '.').count() <= 1
        && s.chars().any(|c| c.is_ascii_digit());
    if !is_decimal {
        return 0.0;
    }
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Why a normalized row did not become a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRejection {
    /// Empty or implausibly short date cell.
    InvalidDate,
    /// Opening/closing/running balance line.
    BalanceLine,
    /// Neither debit nor credit carried a positive amount.
    NoAmount,
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDate => write!(f, "invalid date"),
            Self::BalanceLine => write!(f, "balance line"),
            Self::NoAmount => write!(f, "no amount"),
        }
    }
}

/// Turn one normalized row into a transaction candidate.
///
/// When a row carries both a debit and a credit, the debit wins. Real statements
/// have not been checked for rows that legitimately carry both.
pub fn build(row: &NormalizedRow) -> Result<Candidate, RowRejection> {
    let date = row.date.trim();
    if date.chars().count() < MIN_DATE_LEN {
        return Err(RowRejection::InvalidDate);
    }

    let description = row.description.trim();
    if description.to_lowercase().contains("balance") {
        return Err(RowRejection::BalanceLine);
    }

    let debit = parse_magnitude(&row.debit);
    let credit = parse_magnitude(&row.credit);
    let (amount, txn_type) = if debit > 0.0 {
        (debit, TxnType::Debit)
    } else if credit > 0.0 {
        (credit, TxnType::Credit)
    } else {
        return Err(RowRejection::NoAmount);
    };

    Ok(Candidate {
        date: date.to_string(),
        description: description.to_string(),
        amount,
        txn_type,
        category: DEFAULT_CATEGORY.to_string(),
    })
}
