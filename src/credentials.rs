//! Process-wide default API key used by model capabilities.

use std::fmt;
use std::sync::OnceLock;

use crate::error::{RelayError, Result};

static DEFAULT_API_KEY: OnceLock<ApiKey> = OnceLock::new();

/// An API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Empty or whitespace-only keys count as missing.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(RelayError::MissingCredential);
        }
        Ok(Self(key))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Set the key every [`Runner`](crate::Runner) falls back to. May be called
/// once per process, before any run.
pub fn set_default_api_key(key: impl Into<String>) -> Result<()> {
    let key = ApiKey::new(key)?;
    DEFAULT_API_KEY
        .set(key)
        .map_err(|_| RelayError::Config("default API key is already set".into()))
}

pub fn default_api_key() -> Option<&'static ApiKey> {
    DEFAULT_API_KEY.get()
}
