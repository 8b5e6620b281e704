//! Statement sync: source -> decrypt -> extract -> normalize -> build -> reconcile.
//!
//! Documents, grids and rows are processed strictly in order. Bad documents,
//! grids and rows are skipped and counted; only a failing statement source or
//! a failing ledger write ends the run early.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::builder::build;
use crate::decrypt::Decrypt;
use crate::error::Result;
use crate::extract::ExtractTables;
use crate::ledger::{compute_checksum, insert_if_absent, record_import, ImportLog, ImportStatus};
use crate::models::StatementDocument;
use crate::normalize::{normalize, AliasTable};
use crate::source::StatementSource;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub documents_seen: usize,
    pub documents_decrypt_failed: usize,
    pub documents_unreadable: usize,
    pub grids_skipped: usize,
    pub rows_seen: usize,
    pub rows_rejected: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub cancelled: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} documents ({} failed to decrypt, {} unreadable)",
            self.documents_seen, self.documents_decrypt_failed, self.documents_unreadable
        )?;
        write!(
            f,
            "{} rows seen, {} inserted, {} already in ledger, {} rejected, {} tables skipped",
            self.rows_seen, self.inserted, self.duplicates, self.rows_rejected, self.grids_skipped
        )?;
        if self.cancelled {
            write!(f, "\nrun cancelled before all documents were processed")?;
        }
        Ok(())
    }
}

/// Why a whole document contributed nothing to a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFailure {
    Decryption(String),
    /// Decrypted, but the extractor could not open it.
    Unreadable(String),
}

impl DocumentFailure {
    fn status(&self) -> ImportStatus {
        match self {
            Self::Decryption(_) => ImportStatus::DecryptFailed,
            Self::Unreadable(_) => ImportStatus::Unreadable,
        }
    }
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decryption(reason) => write!(f, "decryption failed: {reason}"),
            Self::Unreadable(reason) => write!(f, "unreadable: {reason}"),
        }
    }
}

#[derive(Debug, Default)]
struct DocumentTally {
    grids_skipped: usize,
    rows_seen: usize,
    rows_rejected: usize,
    inserted: usize,
    duplicates: usize,
}

pub struct Pipeline<'a, D, E> {
    conn: &'a Connection,
    decryptor: D,
    extractor: E,
    aliases: AliasTable,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, D: Decrypt, E: ExtractTables> Pipeline<'a, D, E> {
    pub fn new(conn: &'a Connection, decryptor: D, extractor: E, aliases: AliasTable) -> Self {
        Self {
            conn,
            decryptor,
            extractor,
            aliases,
            cancel: None,
        }
    }

    /// Stop before the next document once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Run one sync over everything the source yields.
    pub fn run(&self, source: &mut dyn StatementSource) -> Result<RunSummary> {
        let documents = source.fetch()?;
        info!(documents = documents.len(), "starting sync");

        let mut summary = RunSummary::default();
        for doc in &documents {
            if self.cancelled() {
                info!(remaining = documents.len() - summary.documents_seen, "sync cancelled");
                summary.cancelled = true;
                break;
            }
            summary.documents_seen += 1;
            self.process_document(doc, &mut summary)?;
        }
        info!(
            inserted = summary.inserted,
            rows = summary.rows_seen,
            rejected = summary.rows_rejected,
            "sync finished"
        );
        Ok(summary)
    }

    fn process_document(&self, doc: &StatementDocument, summary: &mut RunSummary) -> Result<()> {
        let file = doc.meta.filename.as_str();
        let checksum = compute_checksum(&doc.bytes);
        let mut log = ImportLog {
            meta: &doc.meta,
            checksum: &checksum,
            rows_seen: 0,
            inserted: 0,
            status: ImportStatus::Processed,
        };

        match self.reconcile_document(doc)? {
            Ok(tally) => {
                info!(file, rows = tally.rows_seen, inserted = tally.inserted, "processed statement");
                summary.grids_skipped += tally.grids_skipped;
                summary.rows_seen += tally.rows_seen;
                summary.rows_rejected += tally.rows_rejected;
                summary.inserted += tally.inserted;
                summary.duplicates += tally.duplicates;
                log.rows_seen = tally.rows_seen;
                log.inserted = tally.inserted;
            }
            Err(failure) => {
                warn!(file, %failure, "skipping statement");
                match failure {
                    DocumentFailure::Decryption(_) => summary.documents_decrypt_failed += 1,
                    DocumentFailure::Unreadable(_) => summary.documents_unreadable += 1,
                }
                log.status = failure.status();
            }
        }
        record_import(self.conn, &log)
    }

    /// The outer `Result` is a ledger failure and ends the run; the inner one
    /// only skips this document.
    fn reconcile_document(
        &self,
        doc: &StatementDocument,
    ) -> Result<std::result::Result<DocumentTally, DocumentFailure>> {
        let file = doc.meta.filename.as_str();
        let plaintext = match self.decryptor.decrypt(&doc.bytes) {
            Ok(plaintext) => plaintext,
            Err(e) => return Ok(Err(DocumentFailure::Decryption(e.to_string()))),
        };
        let grids = match self.extractor.grids(&plaintext) {
            Ok(grids) => grids,
            Err(e) => return Ok(Err(DocumentFailure::Unreadable(e.to_string()))),
        };

        let mut tally = DocumentTally::default();
        for (index, grid) in grids.enumerate() {
            let rows = match normalize(&grid, &self.aliases) {
                Ok(rows) => rows,
                Err(skip) => {
                    debug!(file, table = index, reason = ?skip, "skipping table");
                    tally.grids_skipped += 1;
                    continue;
                }
            };
            for row in &rows {
                tally.rows_seen += 1;
                match build(row) {
                    Ok(candidate) => {
                        if insert_if_absent(self.conn, &candidate)? {
                            tally.inserted += 1;
                        } else {
                            tally.duplicates += 1;
                        }
                    }
                    Err(reason) => {
                        debug!(file, date = %row.date, description = %row.description, %reason, "rejected row");
                        tally.rows_rejected += 1;
                    }
                }
            }
        }
        Ok(Ok(tally))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::error::LedgrError;
    use crate::ledger::{identity_key, list, set_category, DateRange};
    use crate::models::{RawGrid, StatementMeta, TxnType};

    /// Bytes starting with "LOCKED" fail to decrypt; anything else is already plain.
    struct FakeDecryptor;

    impl Decrypt for FakeDecryptor {
        fn decrypt(&self, raw: &[u8]) -> Result<Vec<u8>> {
            if raw.starts_with(b"LOCKED") {
                return Err(LedgrError::decryption("wrong password"));
            }
            Ok(raw.to_vec())
        }
    }

    /// Plaintext is the JSON encoding of the document's grids.
    struct JsonGrids;

    impl ExtractTables for JsonGrids {
        fn grids(&self, plaintext: &[u8]) -> Result<Box<dyn Iterator<Item = RawGrid>>> {
            let grids: Vec<RawGrid> = serde_json::from_slice(plaintext)?;
            Ok(Box::new(grids.into_iter()))
        }
    }

    struct MemorySource(Vec<StatementDocument>);

    impl StatementSource for MemorySource {
        fn fetch(&mut self) -> Result<Vec<StatementDocument>> {
            Ok(self.0.clone())
        }
    }

    struct OfflineSource;

    impl StatementSource for OfflineSource {
        fn fetch(&mut self) -> Result<Vec<StatementDocument>> {
            Err(LedgrError::Source("authentication failed".into()))
        }
    }

    fn grid(rows: &[&[&str]]) -> RawGrid {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn document(name: &str, grids: &[RawGrid]) -> StatementDocument {
        StatementDocument {
            bytes: serde_json::to_vec(grids).unwrap(),
            meta: StatementMeta {
                filename: name.into(),
                ..Default::default()
            },
        }
    }

    fn locked(name: &str) -> StatementDocument {
        StatementDocument {
            bytes: b"LOCKED%PDF".to_vec(),
            meta: StatementMeta {
                filename: name.into(),
                ..Default::default()
            },
        }
    }

    fn scenario_grid() -> RawGrid {
        grid(&[
            &["Txn Date", "Transaction", "Withdrawals", "Deposits"],
            &["01/01/2025", "Coffee Shop", "150.00", ""],
            &["02/01/2025", "Salary", "", "50000.00"],
        ])
    }

    fn pipeline(conn: &Connection) -> Pipeline<'_, FakeDecryptor, JsonGrids> {
        Pipeline::new(conn, FakeDecryptor, JsonGrids, AliasTable::default())
    }

    #[test]
    fn test_single_table_statement_yields_two_transactions() {
        let (_dir, conn) = test_db();
        let mut source = MemorySource(vec![document("jan.pdf", &[scenario_grid()])]);
        let summary = pipeline(&conn).run(&mut source).unwrap();
        assert_eq!(summary.documents_seen, 1);
        assert_eq!(summary.rows_seen, 2);
        assert_eq!(summary.inserted, 2);

        let txns = list(&conn, DateRange::default()).unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].date, "01/01/2025");
        assert_eq!(txns[0].description, "Coffee Shop");
        assert_eq!(txns[0].amount, 150.0);
        assert_eq!(txns[0].txn_type, TxnType::Debit);
        assert_eq!(txns[1].date, "02/01/2025");
        assert_eq!(txns[1].description, "Salary");
        assert_eq!(txns[1].amount, 50000.0);
        assert_eq!(txns[1].txn_type, TxnType::Credit);
        assert!(txns.iter().all(|t| t.category == "Uncategorized"));
    }

    #[test]
    fn test_second_run_inserts_nothing() {
        let (_dir, conn) = test_db();
        let mut source = MemorySource(vec![document("jan.pdf", &[scenario_grid()])]);
        pipeline(&conn).run(&mut source).unwrap();
        let before = list(&conn, DateRange::default()).unwrap();

        let summary = pipeline(&conn).run(&mut source).unwrap();
        assert_eq!(summary.rows_seen, 2);
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.duplicates, 2);

        let after = list(&conn, DateRange::default()).unwrap();
        assert_eq!(before.len(), after.len());
        let imports: i64 = conn
            .query_row("SELECT count(*) FROM imports", [], |r| r.get(0))
            .unwrap();
        assert_eq!(imports, 2);
    }

    #[test]
    fn test_decryption_failure_is_isolated() {
        let (_dir, conn) = test_db();
        let mut source = MemorySource(vec![
            locked("protected.pdf"),
            document("jan.pdf", &[scenario_grid()]),
        ]);
        let summary = pipeline(&conn).run(&mut source).unwrap();
        assert_eq!(summary.documents_seen, 2);
        assert_eq!(summary.documents_decrypt_failed, 1);
        assert_eq!(summary.inserted, 2);

        let status: String = conn
            .query_row(
                "SELECT status FROM imports WHERE filename = 'protected.pdf'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "decrypt_failed");
    }

    #[test]
    fn test_unreadable_document_is_isolated() {
        let (_dir, conn) = test_db();
        let garbled = StatementDocument {
            bytes: b"%PDF-1.5 garbled".to_vec(),
            meta: StatementMeta::default(),
        };
        let mut source = MemorySource(vec![garbled, document("jan.pdf", &[scenario_grid()])]);
        let summary = pipeline(&conn).run(&mut source).unwrap();
        assert_eq!(summary.documents_unreadable, 1);
        assert_eq!(summary.inserted, 2);
    }

    #[test]
    fn test_category_survives_reingestion() {
        let (_dir, conn) = test_db();
        let mut source = MemorySource(vec![document("jan.pdf", &[scenario_grid()])]);
        pipeline(&conn).run(&mut source).unwrap();

        let salary = list(&conn, DateRange::default())
            .unwrap()
            .into_iter()
            .find(|t| t.description == "Salary")
            .unwrap();
        set_category(&conn, salary.id, "Income").unwrap();

        pipeline(&conn).run(&mut source).unwrap();
        let again = list(&conn, DateRange::default())
            .unwrap()
            .into_iter()
            .find(|t| t.id == salary.id)
            .unwrap();
        assert_eq!(again.category, "Income");
    }

    #[test]
    fn test_header_revisions_produce_identical_transactions() {
        let (_dir_a, conn_a) = test_db();
        let (_dir_b, conn_b) = test_db();
        let v2 = grid(&[
            &["Date", "Narration", "Debit", "Credit"],
            &["01/01/2025", "Coffee Shop", "150.00", ""],
            &["02/01/2025", "Salary", "", "50000.00"],
        ]);
        pipeline(&conn_a)
            .run(&mut MemorySource(vec![document("v1.pdf", &[scenario_grid()])]))
            .unwrap();
        pipeline(&conn_b)
            .run(&mut MemorySource(vec![document("v2.pdf", &[v2])]))
            .unwrap();

        let key = |t: &crate::models::Transaction| {
            (t.date.clone(), t.description.clone(), t.amount.to_bits(), t.txn_type, t.unique_hash.clone())
        };
        let a: Vec<_> = list(&conn_a, DateRange::default()).unwrap().iter().map(key).collect();
        let b: Vec<_> = list(&conn_b, DateRange::default()).unwrap().iter().map(key).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_filtering_and_grid_skips_are_counted() {
        let (_dir, conn) = test_db();
        let statement = grid(&[
            &["Date", "Narration", "Debit", "Credit"],
            &["31/12/2024", "Opening Balance", "", "10,000.00"],
            &["01/01/2025", "Rent", "12,000.00", ""],
            &["", "continued narration", "", ""],
            &["02/01/2025", "Memo only", "-", "-"],
            &["31/01/2025", "Closing Balance", "", "8,000.00"],
        ]);
        let summary_table = grid(&[&["Opening Balance", "Closing Balance"], &["10,000.00", "8,000.00"]]);
        let header_only = grid(&[&["Date", "Narration"]]);
        let mut source = MemorySource(vec![document(
            "jan.pdf",
            &[summary_table, statement, header_only],
        )]);

        let summary = pipeline(&conn).run(&mut source).unwrap();
        assert_eq!(summary.grids_skipped, 2);
        assert_eq!(summary.rows_seen, 5);
        assert_eq!(summary.rows_rejected, 4);
        assert_eq!(summary.inserted, 1);

        let txns = list(&conn, DateRange::default()).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].unique_hash, identity_key("01/01/2025", "Rent", 12000.0));
    }

    #[test]
    fn test_duplicate_rows_across_documents_collapse() {
        let (_dir, conn) = test_db();
        let feb = grid(&[
            &["Date", "Narration", "Debit", "Credit"],
            &["02/01/2025", "Salary", "", "50,000.00"],
            &["03/02/2025", "Groceries", "1,200.00", ""],
        ]);
        let mut source = MemorySource(vec![
            document("jan.pdf", &[scenario_grid()]),
            document("feb.pdf", &[feb]),
        ]);
        let summary = pipeline(&conn).run(&mut source).unwrap();
        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.duplicates, 1);
    }

    #[test]
    fn test_source_failure_is_fatal() {
        let (_dir, conn) = test_db();
        let err = pipeline(&conn).run(&mut OfflineSource).unwrap_err();
        assert!(matches!(err, LedgrError::Source(_)));
    }

    #[test]
    fn test_cancel_stops_between_documents() {
        let (_dir, conn) = test_db();
        let flag = Arc::new(AtomicBool::new(true));
        let mut source = MemorySource(vec![document("jan.pdf", &[scenario_grid()])]);
        let summary = pipeline(&conn)
            .with_cancel(flag.clone())
            .run(&mut source)
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.documents_seen, 0);

        flag.store(false, Ordering::Relaxed);
        let summary = pipeline(&conn).with_cancel(flag).run(&mut source).unwrap();
        assert!(!summary.cancelled);
        assert_eq!(summary.inserted, 2);
    }

    #[test]
    fn test_real_pdf_stack_end_to_end() {
        use crate::decrypt::PdfDecryptor;
        use crate::extract::{sample_pdf, PdfTableExtractor};
        use zeroize::Zeroizing;

        let (_dir, conn) = test_db();
        let page: &[&str] = &[
            "Txn Date     Transaction        Withdrawals     Deposits",
            "01/01/2025   Coffee Shop             150.00",
            "02/01/2025   Salary                               50,000.00",
        ];
        let pdf = sample_pdf(&[page]);
        let mut source = MemorySource(vec![StatementDocument {
            bytes: pdf,
            meta: StatementMeta {
                filename: "jan.pdf".into(),
                ..Default::default()
            },
        }]);
        let pipeline = Pipeline::new(
            &conn,
            PdfDecryptor::new(Zeroizing::new(String::new())),
            PdfTableExtractor,
            AliasTable::default(),
        );
        let summary = pipeline.run(&mut source).unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(pipeline.run(&mut source).unwrap().inserted, 0);
    }

    #[test]
    fn test_protected_statements_open_only_with_the_right_password() {
        use crate::decrypt::{encrypt_pdf, PdfDecryptor};
        use crate::extract::{sample_pdf, PdfTableExtractor};
        use zeroize::Zeroizing;

        let (_dir, conn) = test_db();
        let page: &[&str] = &[
            "Txn Date     Transaction        Withdrawals     Deposits",
            "01/01/2025   Coffee Shop             150.00",
            "02/01/2025   Salary                               50,000.00",
        ];
        let plain = sample_pdf(&[page]);
        let statement = |name: &str, bytes: Vec<u8>| StatementDocument {
            bytes,
            meta: StatementMeta {
                filename: name.into(),
                ..Default::default()
            },
        };
        let mut source = MemorySource(vec![
            statement("jan.pdf", encrypt_pdf(&plain, "secret")),
            statement("other-bank.pdf", encrypt_pdf(&plain, "not-my-password")),
        ]);
        let pipeline = Pipeline::new(
            &conn,
            PdfDecryptor::new(Zeroizing::new("secret".to_string())),
            PdfTableExtractor,
            AliasTable::default(),
        );

        let summary = pipeline.run(&mut source).unwrap();
        assert_eq!(summary.documents_seen, 2);
        assert_eq!(summary.documents_decrypt_failed, 1);
        assert_eq!(summary.rows_seen, 2);
        assert_eq!(summary.inserted, 2);

        let txns = list(&conn, DateRange::default()).unwrap();
        let descriptions: Vec<&str> = txns.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Coffee Shop", "Salary"]);

        let status: String = conn
            .query_row(
                "SELECT status FROM imports WHERE filename = 'other-bank.pdf'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "decrypt_failed");
    }
}
