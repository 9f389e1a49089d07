//! Identifier newtypes.
//!
//! [`UserId`] is the numeric primary key of a user in the identity store and
//! is what clients claim on the `userId` query parameter. [`ConnectionId`]
//! names one live socket on this process and is never shared across
//! processes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A claimed user identifier could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid user id: {raw:?}")]
pub struct InvalidUserId {
    /// The raw value that was rejected.
    pub raw: String,
}

/// Primary key of a user.
///
/// Always strictly positive; `0`, negative numbers and anything that is not
/// a plain base-10 integer are rejected by [`UserId::parse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UserId(i64);

impl UserId {
    /// Build from a raw integer, rejecting non-positive values.
    pub fn new(raw: i64) -> Result<Self, InvalidUserId> {
        if raw > 0 {
            Ok(Self(raw))
        } else {
            Err(InvalidUserId {
                raw: raw.to_string(),
            })
        }
    }

    /// Parse a claimed identifier as supplied by a client.
    ///
    /// Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, InvalidUserId> {
        let trimmed = raw.trim();
        let value: i64 = trimmed.parse().map_err(|_| InvalidUserId {
            raw: raw.to_owned(),
        })?;
        Self::new(value).map_err(|_| InvalidUserId {
            raw: raw.to_owned(),
        })
    }

    /// The raw integer value.
    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for UserId {
    type Error = InvalidUserId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for i64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl FromStr for UserId {
    type Err = InvalidUserId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one live connection on this process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new random ID (`conn_` + UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
