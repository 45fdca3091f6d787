//! The decryption authority.
//!
//! The auditor is the only party that ever holds the private half of the
//! deployment's key pair. The coordinator and the participants work with
//! the public key alone: participants encrypt their insight contributions,
//! the coordinator folds the ciphertexts homomorphically, and only the
//! auditor can reveal the folded aggregate. No individual contribution is
//! ever decrypted.

use std::sync::Arc;

use crate::crypto::{Ciphertext, KeyPair, PaillierError, PublicKey};

/// Holds the deployment key pair and reveals aggregate insights.
pub struct Auditor {
    keys: KeyPair,
}

impl Auditor {
    /// Generates a fresh key pair for a deployment.
    ///
    /// # Errors
    /// Fails when `security_bits` is below the supported minimum or prime
    /// generation gives out.
    pub fn new(security_bits: usize) -> Result<Self, PaillierError> {
        info!("generating a {} bit deployment key pair", security_bits);
        let keys = KeyPair::generate(security_bits)?;
        Ok(Self { keys })
    }

    /// The public half of the deployment key pair, for distribution to the
    /// coordinator and the participants.
    pub fn public_key(&self) -> Arc<PublicKey> {
        Arc::new(self.keys.public.clone())
    }

    /// Decrypts an aggregate ciphertext.
    ///
    /// # Errors
    /// Fails with [`PaillierError::DecryptionKeyMismatch`] when the
    /// ciphertext was produced under a different public key.
    pub fn reveal(&self, ciphertext: &Ciphertext) -> Result<f64, PaillierError> {
        self.keys.secret.decrypt(ciphertext)
    }
}
