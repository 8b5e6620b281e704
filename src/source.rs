use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

use crate::error::{LedgrError, Result};
use crate::models::{Envelope, StatementDocument, StatementMeta};

/// Where statements come from. An `Err` from `fetch` aborts the whole run.
pub trait StatementSource {
    fn fetch(&mut self) -> Result<Vec<StatementDocument>>;
}

/// Which documents the caller wants ingested.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    /// Case-insensitive substring of the From header.
    pub sender: Option<String>,
    /// Case-sensitive substring of the Subject header.
    pub subject: Option<String>,
    pub since: Option<NaiveDate>,
    /// Keep only the N most recently received.
    pub last: Option<usize>,
}

impl SourceFilter {
    /// Loose PDFs carry no envelope, so sender and subject filters let them
    /// through. A message missing the header does not match.
    fn accepts(&self, meta: &StatementMeta) -> bool {
        if let Some(envelope) = &meta.envelope {
            if let Some(sender) = &self.sender {
                if !envelope.sender.to_lowercase().contains(&sender.to_lowercase()) {
                    return false;
                }
            }
            if let Some(subject) = &self.subject {
                if !envelope.subject.contains(subject.as_str()) {
                    return false;
                }
            }
        }
        if let (Some(since), Some(received)) = (self.since, meta.received_at) {
            if received.date_naive() < since {
                return false;
            }
        }
        true
    }

    /// Filter, then order oldest first and apply `last`.
    pub fn apply(&self, docs: Vec<StatementDocument>) -> Vec<StatementDocument> {
        let mut kept: Vec<StatementDocument> =
            docs.into_iter().filter(|d| self.accepts(&d.meta)).collect();
        kept.sort_by(|a, b| {
            a.meta
                .received_at
                .cmp(&b.meta.received_at)
                .then_with(|| a.meta.filename.cmp(&b.meta.filename))
        });
        if let Some(n) = self.last {
            let skip = kept.len().saturating_sub(n);
            kept.drain(..skip);
        }
        kept
    }
}

/// A folder of exported mail (`.eml`) and loose `.pdf` statements.
pub struct DirectorySource {
    dir: PathBuf,
    filter: SourceFilter,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, filter: SourceFilter) -> Self {
        Self {
            dir: dir.into(),
            filter,
        }
    }
}

impl StatementSource for DirectorySource {
    fn fetch(&mut self) -> Result<Vec<StatementDocument>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            LedgrError::Source(format!("cannot open {}: {e}", self.dir.display()))
        })?;

        let mut docs = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| LedgrError::Source(format!("cannot list {}: {e}", self.dir.display())))?
                .path();
            if !path.is_file() {
                continue;
            }
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            let found = match ext.as_deref() {
                Some("pdf") => read_loose_pdf(&path).map(|d| vec![d]),
                Some("eml") => std::fs::read(&path)
                    .map_err(LedgrError::from)
                    .and_then(|bytes| pdf_attachments(&bytes)),
                _ => continue,
            };
            match found {
                Ok(mut found) => {
                    debug!(path = %path.display(), statements = found.len(), "read source file");
                    docs.append(&mut found);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable source file"),
            }
        }
        Ok(self.filter.apply(docs))
    }
}

fn read_loose_pdf(path: &Path) -> Result<StatementDocument> {
    let bytes = std::fs::read(path)?;
    let received_at = std::fs::metadata(path)?
        .modified()
        .ok()
        .map(DateTime::<Utc>::from);
    Ok(StatementDocument {
        bytes,
        meta: StatementMeta {
            filename: file_name(path),
            envelope: None,
            received_at,
        },
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Every `.pdf` attachment of one RFC 822 message, tagged with the envelope.
pub fn pdf_attachments(raw: &[u8]) -> Result<Vec<StatementDocument>> {
    let mail = parse_mail(raw).map_err(|e| LedgrError::Mail(e.to_string()))?;
    let envelope = Envelope {
        subject: mail.headers.get_first_value("Subject").unwrap_or_default(),
        sender: mail.headers.get_first_value("From").unwrap_or_default(),
    };
    let received_at = mail
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

    let mut attachments = Vec::new();
    collect_pdfs(&mail, &mut attachments)?;

    Ok(attachments
        .into_iter()
        .map(|(filename, bytes)| StatementDocument {
            bytes,
            meta: StatementMeta {
                filename,
                envelope: Some(envelope.clone()),
                received_at,
            },
        })
        .collect())
}

fn attachment_name(part: &ParsedMail<'_>) -> Option<String> {
    part.get_content_disposition()
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned()
}

fn collect_pdfs(part: &ParsedMail<'_>, out: &mut Vec<(String, Vec<u8>)>) -> Result<()> {
    if let Some(name) = attachment_name(part) {
        if name.to_lowercase().ends_with(".pdf") {
            let body = part
                .get_body_raw()
                .map_err(|e| LedgrError::Mail(format!("{name}: {e}")))?;
            out.push((name, body));
        }
    }
    for sub in &part.subparts {
        collect_pdfs(sub, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eml(from: &str, subject: &str, date: &str, attachment: &str, body: &str) -> String {
        format!(
            "From: {from}\r\n\
             To: me@example.com\r\n\
             Subject: {subject}\r\n\
             Date: {date}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n\
             --XYZ\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             Statement attached.\r\n\
             --XYZ\r\n\
             Content-Type: application/pdf; name=\"{attachment}\"\r\n\
             Content-Disposition: attachment; filename=\"{attachment}\"\r\n\
             Content-Transfer-Encoding: 7bit\r\n\
             \r\n\
             {body}\r\n\
             --XYZ--\r\n"
        )
    }

    fn write_mailbox(dir: &Path) {
        std::fs::write(
            dir.join("jan.eml"),
            eml("Bank Alerts <alerts@bank.example>", "Your Account Statement", "Tue, 04 Feb 2025 10:00:00 +0000", "jan.pdf", "%PDF-fake-jan"),
        )
        .unwrap();
        std::fs::write(
            dir.join("feb.eml"),
            eml("Bank Alerts <alerts@bank.example>", "Your Account Statement", "Tue, 04 Mar 2025 10:00:00 +0000", "FEB.PDF", "%PDF-fake-feb"),
        )
        .unwrap();
        std::fs::write(
            dir.join("promo.eml"),
            eml("Offers <promo@shop.example>", "Big Sale", "Wed, 05 Mar 2025 10:00:00 +0000", "flyer.pdf", "%PDF-fake-flyer"),
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignore me").unwrap();
    }

    #[test]
    fn test_pdf_attachments_carry_envelope() {
        let raw = eml("alerts@bank.example", "Statement for Jan", "Tue, 04 Feb 2025 10:00:00 +0000", "jan.pdf", "%PDF-fake");
        let docs = pdf_attachments(raw.as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta.filename, "jan.pdf");
        assert_eq!(
            docs[0].meta.envelope,
            Some(Envelope {
                subject: "Statement for Jan".into(),
                sender: "alerts@bank.example".into(),
            })
        );
        assert_eq!(
            docs[0].meta.received_at.map(|t| t.date_naive()),
            NaiveDate::from_ymd_opt(2025, 2, 4)
        );
        assert!(docs[0].bytes.starts_with(b"%PDF-fake"));
    }

    #[test]
    fn test_non_pdf_attachments_are_ignored() {
        let raw = eml("a@b.example", "Statement", "Tue, 04 Feb 2025 10:00:00 +0000", "statement.csv", "a,b");
        assert!(pdf_attachments(raw.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_directory_source_filters_by_sender_and_subject() {
        let dir = tempfile::tempdir().unwrap();
        write_mailbox(dir.path());
        let filter = SourceFilter {
            sender: Some("ALERTS@bank.example".into()),
            subject: Some("Statement".into()),
            ..Default::default()
        };
        let docs = DirectorySource::new(dir.path(), filter).fetch().unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.meta.filename.as_str()).collect();
        assert_eq!(names, vec!["jan.pdf", "FEB.PDF"]);
    }

    #[test]
    fn test_directory_source_last_and_since() {
        let dir = tempfile::tempdir().unwrap();
        write_mailbox(dir.path());

        let last_one = SourceFilter {
            last: Some(1),
            ..Default::default()
        };
        let docs = DirectorySource::new(dir.path(), last_one).fetch().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta.filename, "flyer.pdf");

        let since_march = SourceFilter {
            since: NaiveDate::from_ymd_opt(2025, 3, 1),
            ..Default::default()
        };
        let docs = DirectorySource::new(dir.path(), since_march).fetch().unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_loose_pdfs_pass_envelope_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scan.pdf"), b"%PDF-loose").unwrap();
        let filter = SourceFilter {
            sender: Some("alerts@bank.example".into()),
            subject: Some("Statement".into()),
            ..Default::default()
        };
        let docs = DirectorySource::new(dir.path(), filter).fetch().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].bytes, b"%PDF-loose");
        assert!(docs[0].meta.received_at.is_some());
        assert!(docs[0].meta.envelope.is_none());
    }

    #[test]
    fn test_messages_without_headers_fail_envelope_filters() {
        let dir = tempfile::tempdir().unwrap();
        let headerless = "MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n\
             --XYZ\r\n\
             Content-Type: application/pdf; name=\"anon.pdf\"\r\n\
             Content-Disposition: attachment; filename=\"anon.pdf\"\r\n\
             \r\n\
             %PDF-anon\r\n\
             --XYZ--\r\n";
        std::fs::write(dir.path().join("anon.eml"), headerless).unwrap();

        let docs = DirectorySource::new(dir.path(), SourceFilter::default()).fetch().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta.envelope, Some(Envelope::default()));

        let by_sender = SourceFilter {
            sender: Some("alerts@bank.example".into()),
            ..Default::default()
        };
        assert!(DirectorySource::new(dir.path(), by_sender).fetch().unwrap().is_empty());

        let by_subject = SourceFilter {
            subject: Some("Statement".into()),
            ..Default::default()
        };
        assert!(DirectorySource::new(dir.path(), by_subject).fetch().unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DirectorySource::new(dir.path().join("nope"), SourceFilter::default());
        assert!(matches!(source.fetch(), Err(LedgrError::Source(_))));
    }
}
