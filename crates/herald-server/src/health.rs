//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` while the relay is unsubscribed.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live connections on this process.
    pub connections: usize,
    /// Users with at least one live connection on this process.
    pub users: usize,
    /// Whether this process currently receives cross-process notifications.
    pub relay_subscribed: bool,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    users: usize,
    relay_subscribed: bool,
) -> HealthResponse {
    HealthResponse {
        status: if relay_subscribed { "ok" } else { "degraded" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        users,
        relay_subscribed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribed_is_ok() {
        let resp = health_check(Instant::now(), 0, 0, true);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn unsubscribed_is_degraded() {
        let resp = health_check(Instant::now(), 3, 2, false);
        assert_eq!(resp.status, "degraded");
        assert_eq!(resp.connections, 3);
        assert_eq!(resp.users, 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, 0, true).uptime_secs >= 59);
    }

    #[test]
    fn serialization_is_camel_case() {
        let resp = health_check(Instant::now(), 2, 1, true);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["users"], 1);
        assert_eq!(parsed["relaySubscribed"], true);
        assert!(parsed["uptimeSecs"].is_number());
    }
}
