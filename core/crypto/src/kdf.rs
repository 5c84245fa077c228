//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! The salt is fixed for the whole application so that a vault code always
//! maps to the same key and previously written ciphertext stays readable.
//! Identical codes in different scopes therefore derive identical keys.

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::keys::{VaultKey, KEY_LENGTH};
use notevault_common::{Error, Result};

/// Lowest accepted iteration count.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Application-wide salt shared by every scope.
pub const APP_SALT: &str = "notevault.vault-code.v1";

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 rounds.
    pub iterations: u32,
    /// Salt mixed into every derivation.
    pub salt: String,
}

impl KdfParams {
    /// Check the parameters before use.
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::InvalidInput(format!(
                "KDF iterations must be at least {}, got {}",
                MIN_ITERATIONS, self.iterations
            )));
        }
        if self.salt.is_empty() {
            return Err(Error::InvalidInput("KDF salt cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
            salt: APP_SALT.to_string(),
        }
    }
}

/// Derive a vault key from a passphrase.
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `InvalidPassphrase` if the passphrase is empty
/// - `InvalidInput` if the parameters are below the minimum work factor
pub fn derive_key(passphrase: &[u8], params: &KdfParams) -> Result<VaultKey> {
    if passphrase.is_empty() {
        return Err(Error::InvalidPassphrase(
            "Passphrase cannot be empty".to_string(),
        ));
    }
    params.validate()?;

    let mut key_bytes = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(
        passphrase,
        params.salt.as_bytes(),
        params.iterations,
        &mut key_bytes,
    );

    Ok(VaultKey::from_bytes(key_bytes))
}

/// Derive a vault key with the default parameters.
pub fn derive(passphrase: &[u8]) -> Result<VaultKey> {
    derive_key(passphrase, &KdfParams::default())
}
