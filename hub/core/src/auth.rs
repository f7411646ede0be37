//! Shared-Secret Authentication for the HTTP Bridge
//!
//! Every HTTP request must carry an `X-API-KEY` header equal to the secret
//! configured through `X_API_KEY` (or `[auth] api_key`). Checks are performed
//! in a fixed order so callers can map each failure to a status code:
//!
//! 1. No secret configured: [`AuthError::NotConfigured`] (server error)
//! 2. Header absent or empty: [`AuthError::MissingKey`]
//! 3. Header differs from the secret: [`AuthError::InvalidKey`]
//!
//! Comparison is constant-time in the key contents.

use std::fmt;

use thiserror::Error;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Why a request failed authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The server has no secret to compare against
    #[error("Server configuration error")]
    NotConfigured,

    /// The request carried no key
    #[error("Missing X-API-KEY header")]
    MissingKey,

    /// The request carried the wrong key
    #[error("Invalid API key")]
    InvalidKey,
}

impl AuthError {
    /// Whether the failure is the server's fault rather than the caller's
    #[must_use]
    pub fn is_server_error(self) -> bool {
        matches!(self, Self::NotConfigured)
    }
}

/// The configured shared secret (possibly absent)
#[derive(Clone, Default)]
pub struct SharedSecret {
    key: Option<String>,
}

impl SharedSecret {
    /// Wrap an optional key; an empty key counts as unset
    #[must_use]
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
        }
    }

    /// Whether a secret is configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Check a presented key
    ///
    /// # Errors
    ///
    /// Returns the first failing check, in the order listed in the module docs.
    pub fn verify(&self, provided: Option<&str>) -> Result<(), AuthError> {
        let Some(expected) = self.key.as_deref() else {
            return Err(AuthError::NotConfigured);
        };
        let provided = match provided {
            Some(p) if !p.is_empty() => p,
            _ => return Err(AuthError::MissingKey),
        };
        if constant_time_compare(expected.as_bytes(), provided.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::InvalidKey)
        }
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_some() {
            write!(f, "SharedSecret([REDACTED])")
        } else {
            write!(f, "SharedSecret(<unset>)")
        }
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
