//! Bearer-token authentication for the control socket
//!
//! Tokens are configured as SHA-256 hashes so the configuration file never
//! holds a usable secret. Incoming tokens are hashed and compared against the
//! configured list.

use hex::encode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Authentication configuration for the control socket
///
/// ```ron
/// auth: (
///     enabled: true,
///     token_hashes: [
///         // SHA-256 of "test-token"
///         "4c5dc9b7708905f77f5e5d16316b5dfb425e68cb326dcd55a860e90a7707031e",
///     ],
/// )
/// ```
///
/// A hash can be produced with `courierctl hash-token <token>` or
/// `echo -n "<token>" | sha256sum`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAuthConfig {
    /// When disabled, access is governed by the socket's file permissions
    /// alone
    #[serde(default)]
    pub enabled: bool,

    /// Lowercase hex SHA-256 hashes of the accepted tokens
    #[serde(default)]
    pub token_hashes: Vec<String>,
}

/// Lowercase hex SHA-256 of `token`
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    encode(hasher.finalize())
}

impl ControlAuthConfig {
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        self.enabled
    }

    /// Whether `token` is accepted. Always true when authentication is
    /// disabled.
    #[must_use]
    pub fn validate_token(&self, token: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let hash = hash_token(token);
        self.token_hashes
            .iter()
            .any(|configured| configured.eq_ignore_ascii_case(&hash))
    }

    /// Check a request's optional token
    ///
    /// # Errors
    /// If authentication is enabled and the token is missing or not accepted
    pub fn validate_token_option(&self, token: Option<&str>) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }

        match token {
            None => Err("Authentication required but no token provided".to_string()),
            Some(token) if self.validate_token(token) => Ok(()),
            Some(_) => Err("Invalid authentication token".to_string()),
        }
    }
}
