//! Request authentication.
//!
//! Two credential kinds reach the gate:
//! - an opaque access key token, checked against the key store
//! - a Basic-Auth username/password pair, checked against the static admin
//!   credential from configuration
//!
//! A key check has one side effect: a best-effort `last_used_at` stamp that
//! runs detached from the request.

pub mod tokens;

use std::fmt;

use dockward_id::KeyId;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{DbError, KeyStore};

/// Why a credential was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing, unknown or revoked access key")]
    InvalidKey,

    #[error("invalid admin credentials")]
    InvalidAdmin,

    /// No `Authorization` header on an admin request.
    #[error("no admin credentials supplied")]
    MissingCredentials,
}

impl AuthError {
    /// Stable code for error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidKey => "invalid_key",
            AuthError::InvalidAdmin => "invalid_admin",
            AuthError::MissingCredentials => "missing_credentials",
        }
    }
}

/// A credential extracted from a request.
pub enum Credential {
    ApiKey(String),
    Basic { username: String, password: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(..)"),
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Who a request is acting as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Key(KeyId),
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized(Principal),
    Rejected(AuthError),
}

/// The statically configured admin login.
///
/// Only SHA-256 digests are kept so comparisons run over fixed-length input.
#[derive(Clone)]
pub struct AdminCredential {
    username: [u8; 32],
    password: [u8; 32],
}

impl AdminCredential {
    pub fn new(username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        Self {
            username: digest(username.as_ref()),
            password: digest(password.as_ref()),
        }
    }

    /// Constant-time check of both fields.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username.ct_eq(&digest(username));
        let pass_ok = self.password.ct_eq(&digest(password));
        (user_ok & pass_ok).into()
    }
}

impl fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminCredential(..)")
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(value.as_bytes()));
    out
}

/// Validates request credentials.
#[derive(Clone)]
pub struct AuthGate {
    keys: KeyStore,
    admin: AdminCredential,
}

impl AuthGate {
    pub fn new(keys: KeyStore, admin: AdminCredential) -> Self {
        Self { keys, admin }
    }

    /// Check a credential.
    ///
    /// Storage failures are returned as errors, not as rejections, so callers
    /// can tell "bad key" apart from "could not check".
    pub async fn authenticate(&self, credential: Credential) -> Result<AuthOutcome, DbError> {
        match credential {
            Credential::ApiKey(token) => {
                // Absent and unknown keys are indistinguishable to the caller.
                if token.is_empty() {
                    debug!("Rejected empty access key");
                    return Ok(AuthOutcome::Rejected(AuthError::InvalidKey));
                }
                match self.keys.find_active_by_token(&token).await? {
                    Some(key) => {
                        self.record_use(key.id.clone());
                        Ok(AuthOutcome::Authorized(Principal::Key(key.id)))
                    }
                    None => {
                        debug!("Rejected access key");
                        Ok(AuthOutcome::Rejected(AuthError::InvalidKey))
                    }
                }
            }
            Credential::Basic { username, password } => {
                if self.admin.verify(&username, &password) {
                    Ok(AuthOutcome::Authorized(Principal::Admin))
                } else {
                    debug!("Rejected admin credentials");
                    Ok(AuthOutcome::Rejected(AuthError::InvalidAdmin))
                }
            }
        }
    }

    fn record_use(&self, id: KeyId) {
        let keys = self.keys.clone();
        tokio::spawn(async move {
            if let Err(e) = keys.touch_last_used(&id).await {
                warn!(error = %e, key_id = %id, "Failed to record key use");
            }
        });
    }
}
