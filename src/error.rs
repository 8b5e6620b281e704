use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgrError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    #[error("Statement source error: {0}")]
    Source(String),

    #[error("Mail parse error: {0}")]
    Mail(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(i64),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl LedgrError {
    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgrError>;
