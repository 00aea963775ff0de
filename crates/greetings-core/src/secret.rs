//! Credentials and the vault abstraction.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::Result;

/// An opaque secret bound to the vault coordinates it was resolved from.
///
/// `Debug` and `Display` never print the value and the type is not
/// serializable. Reading the plaintext requires [`Credential::reveal`],
/// which leaves an audit record.
#[derive(Clone)]
pub struct Credential {
    name: String,
    environment: String,
    path: String,
    value: Arc<str>,
}

impl Credential {
    pub fn new(
        name: impl Into<String>,
        environment: impl Into<String>,
        path: impl Into<String>,
        value: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            path: path.into(),
            value: value.into(),
        }
    }

    /// A credential supplied directly by the caller rather than a vault.
    pub fn from_plaintext(name: impl Into<String>, value: impl Into<Arc<str>>) -> Self {
        Self::new(name, "", "", value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Expose the plaintext value for `purpose`.
    pub fn reveal(&self, purpose: &str) -> &str {
        tracing::info!(
            target: "audit",
            credential = %self.name,
            environment = %self.environment,
            purpose,
            "credential revealed"
        );
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("environment", &self.environment)
            .field("path", &self.path)
            .field("value", &"***")
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=***", self.name)
    }
}

/// Vault coordinates of a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRequest {
    pub name: String,
    pub environment: String,
    pub path: String,
}

impl SecretRequest {
    pub fn new(
        name: impl Into<String>,
        environment: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            path: path.into(),
        }
    }
}

/// Trait for secret vault backends.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Resolve a named secret using `vault_token` for access.
    async fn resolve(&self, request: &SecretRequest, vault_token: &Credential)
    -> Result<Credential>;
}
