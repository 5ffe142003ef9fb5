//! Notification signature verification.
//!
//! The hash inputs and algorithm are gateway-specific, so the reconciler only
//! depends on `SignatureVerifier`.

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Signed fields of a notification, in gateway terms.
#[derive(Debug, Clone, Copy)]
pub struct SignatureFields<'a> {
    pub order_id: &'a str,
    pub status_code: &'a str,
    pub gross_amount: &'a str,
}

pub trait SignatureVerifier: Send + Sync {
    /// Signature the gateway should have sent for these fields.
    fn expected(&self, fields: &SignatureFields<'_>) -> String;

    /// Constant-time comparison against the provided signature.
    fn verify(&self, fields: &SignatureFields<'_>, provided: &str) -> bool {
        let expected = self.expected(fields);
        let provided = provided.trim().to_ascii_lowercase();
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

/// `hex(SHA-512(order_id + status_code + gross_amount + server_key))`
pub struct Sha512Signature {
    server_key: String,
}

impl Sha512Signature {
    pub fn new(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
        }
    }
}

impl SignatureVerifier for Sha512Signature {
    fn expected(&self, fields: &SignatureFields<'_>) -> String {
        let mut hasher = Sha512::new();
        hasher.update(fields.order_id.as_bytes());
        hasher.update(fields.status_code.as_bytes());
        hasher.update(fields.gross_amount.as_bytes());
        hasher.update(self.server_key.as_bytes());
        hex::encode(hasher.finalize())
    }
}
