//! Credential reference resolution.
//!
//! Volume configs store *references* to credentials. They are resolved at the
//! moment a helper is invoked and the plaintext only ever lives inside a
//! [`SecretString`], which redacts itself in `Debug` output.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{Error, Result};

/// Resolves an opaque credential reference to its plaintext value.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<SecretString>;
}

/// Resolves `env:NAME` and `file:/path` references; anything else is taken
/// as the literal secret value.
#[derive(Debug, Clone, Default)]
pub struct DefaultSecretResolver;

#[async_trait]
impl SecretResolver for DefaultSecretResolver {
    async fn resolve(&self, reference: &str) -> Result<SecretString> {
        if let Some(name) = reference.strip_prefix("env:") {
            return std::env::var(name)
                .map(SecretString::from)
                .map_err(|e| Error::SecretResolution {
                    reference: reference.to_string(),
                    message: e.to_string(),
                });
        }

        if let Some(path) = reference.strip_prefix("file:") {
            let content =
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| Error::SecretResolution {
                        reference: reference.to_string(),
                        message: e.to_string(),
                    })?;
            return Ok(SecretString::from(
                content.trim_end_matches(['\r', '\n']).to_string(),
            ));
        }

        Ok(SecretString::from(reference.to_string()))
    }
}
