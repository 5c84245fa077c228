//! Vault code verification backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use notevault_common::{Error, Result, ScopeId, VaultCode};

/// Remote check of a vault code against the scope's stored hash.
///
/// `Ok(false)` means the code is wrong. `Err(Error::Verification(_))` means
/// no answer was obtained.
#[async_trait]
pub trait CodeVerifier: Send + Sync {
    async fn verify(&self, scope: &ScopeId, code: &VaultCode) -> Result<bool>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    scope_id: &'a ScopeId,
    code: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// Verifier backed by `POST <base_url>/vault-codes/verify`.
pub struct HttpCodeVerifier {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpCodeVerifier {
    /// Create a verifier for the service at `base_url`.
    ///
    /// # Errors
    /// - `InvalidInput` if `base_url` is not an absolute URL
    /// - `Verification` if the HTTP client cannot be built
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join("vault-codes/verify"))
            .map_err(|e| Error::InvalidInput(format!("Invalid verifier URL '{}': {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Verification(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl CodeVerifier for HttpCodeVerifier {
    async fn verify(&self, scope: &ScopeId, code: &VaultCode) -> Result<bool> {
        let body = VerifyRequest {
            scope_id: scope,
            code: code.expose(),
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Verification(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Verification(format!(
                "Verifier returned status {}",
                status
            )));
        }

        let parsed: VerifyResponse = response
            .json()
            .await
            .map_err(|e| Error::Verification(format!("Malformed verifier response: {}", e)))?;

        debug!(scope = %scope, valid = parsed.valid, "Vault code checked");
        Ok(parsed.valid)
    }
}

/// Fixed table of scope codes.
#[derive(Default)]
pub struct StaticCodeVerifier {
    codes: HashMap<ScopeId, VaultCode>,
}

impl StaticCodeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, scope: ScopeId, code: impl Into<VaultCode>) -> Self {
        self.codes.insert(scope, code.into());
        self
    }
}

#[async_trait]
impl CodeVerifier for StaticCodeVerifier {
    async fn verify(&self, scope: &ScopeId, code: &VaultCode) -> Result<bool> {
        Ok(self
            .codes
            .get(scope)
            .map(|expected| expected.as_bytes() == code.as_bytes())
            .unwrap_or(false))
    }
}
