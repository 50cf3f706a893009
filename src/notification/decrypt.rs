//! Decryption of receiver secure settings.

#[cfg(test)]
use mockall::automock;

use super::error::DecryptError;

/// Turns stored ciphertext into the plaintext secret.
#[cfg_attr(test, automock)]
pub trait Decrypter: Send + Sync {
    /// Decrypts `ciphertext`.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError>;
}

/// Treats the stored bytes as plaintext. For deployments where secure
/// settings are only base64 encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextDecrypter;

impl Decrypter for PlaintextDecrypter {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        Ok(ciphertext.to_vec())
    }
}
