//! Connection-credential cipher seam
//!
//! Credential encryption at rest is an external collaborator; the core only
//! sees this trait and the opaque ciphertext bytes stored on a System. The
//! passthrough implementation exists for tests and local development where
//! no key management is wired up.

use crate::domain::error::{CoreError, CoreResult};

/// Opaque encrypt/decrypt pair for connection details
pub trait ConnectionCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> CoreResult<Vec<u8>>;
}

/// Identity cipher for environments without key management
///
/// Refuses to pretend-decrypt data carrying the magic prefix of a real
/// cipher, so a database written with encryption never silently round-trips
/// through the passthrough.
pub struct PassthroughCipher;

const ENCRYPTED_PREFIX: &[u8] = b"dwenc:";

impl ConnectionCipher for PassthroughCipher {
    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
        if ciphertext.starts_with(ENCRYPTED_PREFIX) {
            return Err(CoreError::validation(
                "connection info was written with encryption; configure the encryption key",
            ));
        }
        Ok(ciphertext.to_vec())
    }
}
