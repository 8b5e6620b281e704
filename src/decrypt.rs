use lopdf::Document;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{LedgrError, Result};

/// Removes password protection from a raw statement.
pub trait Decrypt {
    /// Plaintext bytes, or [`LedgrError::Decryption`] for a wrong credential,
    /// a corrupt stream, or a protection scheme the backend cannot open.
    fn decrypt(&self, raw: &[u8]) -> Result<Vec<u8>>;
}

/// PDF standard-security-handler decryption with a single user password.
pub struct PdfDecryptor {
    password: Zeroizing<String>,
}

impl PdfDecryptor {
    pub fn new(password: Zeroizing<String>) -> Self {
        Self { password }
    }
}

impl Decrypt for PdfDecryptor {
    fn decrypt(&self, raw: &[u8]) -> Result<Vec<u8>> {
        // Objects are decrypted while loading; a wrong password fails here.
        let mut document = Document::load_mem_with_password(raw, self.password.as_str())
            .map_err(|e| LedgrError::decryption(format!("cannot open statement: {e}")))?;

        if !document.was_encrypted() {
            return Ok(raw.to_vec());
        }
        debug!(pages = document.get_pages().len(), "removed statement protection");
        document.trailer.remove(b"Encrypt");

        let mut plain = Vec::new();
        document
            .save_to(&mut plain)
            .map_err(|e| LedgrError::decryption(format!("cannot re-serialise PDF: {e}")))?;
        Ok(plain)
    }
}

/// Protect `plain` with RC4-128 under `user_password`, as banks do.
#[cfg(test)]
pub(crate) fn encrypt_pdf(plain: &[u8], user_password: &str) -> Vec<u8> {
    use lopdf::{EncryptionState, EncryptionVersion, Object, Permissions, StringFormat};

    let mut doc = Document::load_mem(plain).unwrap();
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(vec![7u8; 16], StringFormat::Literal),
            Object::String(vec![7u8; 16], StringFormat::Literal),
        ]),
    );
    let state = EncryptionState::try_from(EncryptionVersion::V2 {
        document: &doc,
        owner_password: "owner",
        user_password,
        key_length: 128,
        permissions: Permissions::all(),
    })
    .unwrap();
    doc.encrypt(&state).unwrap();

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}
