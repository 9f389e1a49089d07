//! Wire record carried on the broadcast channel.

use herald_core::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "userId": <int>, "message": <json> }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    /// Target user.
    pub user_id: UserId,
    /// Payload delivered verbatim to the user's connections.
    pub message: Value,
}

impl ChannelMessage {
    /// Build a record for `user_id`.
    pub fn new(user_id: UserId, message: Value) -> Self {
        Self { user_id, message }
    }
}
