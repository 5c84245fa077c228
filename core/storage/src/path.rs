//! Storage domains and object keys.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use notevault_common::{Error, Result, ScopeId};

/// Which of a scope's two buckets an object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Raw AEAD ciphertext.
    Vaulted,
    /// Raw plaintext with its true MIME type.
    Public,
}

impl Domain {
    /// Bucket name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Vaulted => "vaulted",
            Domain::Public => "public",
        }
    }

    /// The domain a migration moves objects into.
    pub fn opposite(&self) -> Self {
        match self {
            Domain::Vaulted => Domain::Public,
            Domain::Public => Domain::Vaulted,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object key of the form `{scope_id}/{timestamp}-{sanitized_name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectPath {
    scope: ScopeId,
    object: String,
}

impl ObjectPath {
    /// Build a key from its parts.
    ///
    /// `timestamp_millis` is a Unix timestamp in milliseconds.
    pub fn new(scope: ScopeId, timestamp_millis: i64, name: &str) -> Self {
        Self {
            scope,
            object: format!("{}-{}", timestamp_millis, sanitize_name(name)),
        }
    }

    /// Build a key stamped with the current time.
    pub fn for_upload(scope: ScopeId, name: &str) -> Self {
        Self::new(scope, Utc::now().timestamp_millis(), name)
    }

    /// Parse a stored key.
    ///
    /// # Errors
    /// - Missing or invalid scope component
    /// - Empty, nested or dot-prefixed object component
    pub fn parse(path: &str) -> Result<Self> {
        let (scope, object) = path
            .split_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("Object path has no scope: {}", path)))?;

        let scope: ScopeId = scope.parse()?;
        if object.is_empty() || object.contains('/') || object.contains('\\') {
            return Err(Error::InvalidInput(format!(
                "Invalid object name in path: {}",
                path
            )));
        }
        if object.starts_with('.') {
            return Err(Error::InvalidInput(format!(
                "Object name cannot start with '.': {}",
                path
            )));
        }

        Ok(Self {
            scope,
            object: object.to_string(),
        })
    }

    /// Owning scope.
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Object component, without the scope prefix.
    pub fn object_name(&self) -> &str {
        &self.object
    }

    /// Upload time encoded in the object component, if it has one.
    pub fn timestamp_millis(&self) -> Option<i64> {
        let (stamp, _) = self.object.split_once('-')?;
        stamp.parse().ok()
    }

    /// Full key string.
    pub fn as_key(&self) -> String {
        format!("{}/{}", self.scope, self.object)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.object)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ObjectPath> for String {
    fn from(path: ObjectPath) -> Self {
        path.as_key()
    }
}

/// Restrict a display name to `[A-Za-z0-9._-]`, replacing everything else with `_`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
