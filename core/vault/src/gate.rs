//! The vault code gate.
//!
//! Decrypting or re-encrypting anything needs an [`UnlockedKey`], and the
//! only way to get one is [`VaultCodeGate::unlock`]. That call asks the
//! verifier first and derives the key only after a positive answer.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::retry::{RetryConfig, RetryExecutor};
use crate::verifier::CodeVerifier;
use notevault_common::{Error, Result, ScopeId, VaultCode};
use notevault_crypto::{
    decode_file, decode_text, derive_key, encode_file, encode_text, EncryptedFile, Envelope,
    FileBlob, KdfParams, TextPayload, VaultKey,
};

/// A key derived from a code the verifier accepted for `scope`.
pub struct UnlockedKey {
    scope: ScopeId,
    key: VaultKey,
}

impl UnlockedKey {
    /// Scope whose code produced this key.
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Seal a note body under a fresh nonce.
    pub fn encode_text(&self, payload: &TextPayload) -> Result<Envelope> {
        encode_text(payload, &self.key)
    }

    /// Open a note body envelope.
    pub fn decode_text(&self, envelope: &Envelope) -> Result<TextPayload> {
        decode_text(envelope, &self.key)
    }

    /// Encrypt an attachment under a fresh nonce.
    pub fn encode_file(&self, blob: &FileBlob) -> Result<EncryptedFile> {
        encode_file(blob, &self.key)
    }

    /// Decrypt an attachment.
    pub fn decode_file(&self, file: &EncryptedFile) -> Result<FileBlob> {
        decode_file(file, &self.key)
    }
}

impl fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedKey")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Verifies vault codes and hands out keys for the accepted ones.
pub struct VaultCodeGate {
    verifier: Arc<dyn CodeVerifier>,
    kdf: KdfParams,
    retry: RetryExecutor,
}

impl VaultCodeGate {
    /// Create a gate with default KDF parameters and retry policy.
    pub fn new(verifier: Arc<dyn CodeVerifier>) -> Self {
        Self {
            verifier,
            kdf: KdfParams::default(),
            retry: RetryExecutor::default(),
        }
    }

    /// Use these key derivation parameters.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Retry transient verifier failures under this policy.
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(config);
        self
    }

    /// Ask the verifier whether `code` is correct for `scope`.
    ///
    /// Transient failures are retried. An empty code is rejected without a
    /// network call.
    ///
    /// # Errors
    /// - `InvalidPassphrase` if the code is empty
    /// - `Verification` if no answer could be obtained
    pub async fn verify(&self, scope: &ScopeId, code: &VaultCode) -> Result<bool> {
        if code.is_empty() {
            return Err(Error::InvalidPassphrase(
                "Vault code cannot be empty".to_string(),
            ));
        }

        let verifier = &self.verifier;
        self.retry
            .execute_with_condition(
                move || verifier.verify(scope, code),
                |e| matches!(e, Error::Verification(_)),
            )
            .await
            .map_err(|e| match e {
                Error::Verification(_) => e,
                other => Error::Verification(other.to_string()),
            })
    }

    /// Verify `code` and derive the scope key.
    ///
    /// # Errors
    /// - `IncorrectCode` if the verifier rejected the code
    /// - Any error from [`verify`](Self::verify)
    pub async fn unlock(&self, scope: &ScopeId, code: &VaultCode) -> Result<UnlockedKey> {
        if !self.verify(scope, code).await? {
            warn!(scope = %scope, "Vault code rejected");
            return Err(Error::IncorrectCode);
        }

        let key = derive_key(code.as_bytes(), &self.kdf)?;
        debug!(scope = %scope, "Vault unlocked");
        Ok(UnlockedKey { scope: *scope, key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SpyVerifier;
    use notevault_crypto::derive;
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn test_unlock_with_correct_code() {
        let scope = ScopeId::new();
        let gate = VaultCodeGate::new(Arc::new(SpyVerifier::accepting(scope, "correct-horse")));

        let key = gate
            .unlock(&scope, &"correct-horse".into())
            .await
            .unwrap();
        assert_eq!(key.scope(), &scope);

        // Same derivation as the free function.
        let envelope = key
            .encode_text(&TextPayload::Text("hello vault".to_string()))
            .unwrap();
        let opened = decode_text(&envelope, &derive(b"correct-horse").unwrap()).unwrap();
        assert_eq!(opened, TextPayload::Text("hello vault".to_string()));
    }

    #[tokio::test]
    async fn test_unlock_with_wrong_code() {
        let scope = ScopeId::new();
        let gate = VaultCodeGate::new(Arc::new(SpyVerifier::accepting(scope, "correct-horse")));

        let result = gate.unlock(&scope, &"wrong-horse".into()).await;
        assert!(matches!(result, Err(Error::IncorrectCode)));
    }

    #[tokio::test]
    async fn test_empty_code_skips_verifier() {
        let scope = ScopeId::new();
        let spy = Arc::new(SpyVerifier::accepting(scope, "correct-horse"));
        let gate = VaultCodeGate::new(spy.clone());

        let result = gate.verify(&scope, &"".into()).await;
        assert!(matches!(result, Err(Error::InvalidPassphrase(_))));
        assert_eq!(spy.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let scope = ScopeId::new();
        let spy = Arc::new(SpyVerifier::accepting(scope, "correct-horse").failing_first(1));
        let gate = VaultCodeGate::new(spy.clone()).with_retry(fast_retry());

        assert!(gate.verify(&scope, &"correct-horse".into()).await.unwrap());
        assert_eq!(spy.calls(), 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_surfaces() {
        let scope = ScopeId::new();
        let spy = Arc::new(SpyVerifier::accepting(scope, "correct-horse").failing_first(10));
        let gate = VaultCodeGate::new(spy.clone()).with_retry(fast_retry());

        let result = gate.unlock(&scope, &"correct-horse".into()).await;
        assert!(matches!(result, Err(Error::Verification(_))));
        assert_eq!(spy.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let scope = ScopeId::new();
        let spy = Arc::new(SpyVerifier::accepting(scope, "correct-horse"));
        let gate = VaultCodeGate::new(spy.clone()).with_retry(fast_retry());

        assert!(!gate.verify(&scope, &"nope".into()).await.unwrap());
        assert_eq!(spy.calls(), 1);
    }
}
