//! Connection admission: validate the claimed identity before a socket is
//! registered.
//!
//! The claimed id is parsed before anything else is touched, so a malformed
//! claim costs no identity lookup. Only [`Admission::admit`] returning `Ok`
//! lets a session register.

use std::sync::Arc;

use herald_core::{InvalidUserId, UserId};
use thiserror::Error;
use tracing::debug;

use crate::identity::{IdentityError, IdentityStore};

/// WebSocket close code for a policy violation.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// WebSocket close code for an unexpected server condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Why a connection was refused.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Missing or malformed `userId`.
    #[error("invalid user id")]
    InvalidIdentity(#[from] InvalidUserId),
    /// Well-formed id with no matching user.
    #[error("user {0} does not exist")]
    UnknownUser(UserId),
    /// The identity store could not answer.
    #[error("identity lookup failed: {0}")]
    Lookup(#[source] IdentityError),
}

impl AdmissionError {
    /// Close code sent to the client.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidIdentity(_) | Self::UnknownUser(_) => CLOSE_POLICY_VIOLATION,
            Self::Lookup(_) => CLOSE_INTERNAL_ERROR,
        }
    }

    /// Close reason sent to the client.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidIdentity(_) => "Invalid userId",
            Self::UnknownUser(_) => "User does not exist",
            Self::Lookup(_) => "Identity lookup failed",
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::UnknownUser(_) => "unknown_user",
            Self::Lookup(_) => "lookup_failed",
        }
    }

    /// Whether the client should not retry with the same claim.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Lookup(_))
    }
}

/// Gate between an upgraded socket and the registry.
#[derive(Clone)]
pub struct Admission {
    identity: Arc<dyn IdentityStore>,
}

impl Admission {
    /// Create an admission gate over `identity`.
    pub fn new(identity: Arc<dyn IdentityStore>) -> Self {
        Self { identity }
    }

    /// Validate a claimed `userId` query value.
    pub async fn admit(&self, claimed: Option<&str>) -> Result<UserId, AdmissionError> {
        let raw = claimed.unwrap_or_default();
        let user_id = UserId::parse(raw)?;

        match self.identity.find_user_by_id(user_id).await {
            Ok(Some(user)) => {
                debug!(%user_id, "admitted");
                Ok(user.id)
            }
            Ok(None) => Err(AdmissionError::UnknownUser(user_id)),
            Err(e) => Err(AdmissionError::Lookup(e)),
        }
    }
}
