//! Server configuration.

use std::time::Duration;

use herald_settings::HeraldSettings;

/// Configuration for [`crate::server::HeraldServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Liveness probe period.
    pub probe_interval: Duration,
    /// How long shutdown waits for background tasks.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
            probe_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&HeraldSettings> for ServerConfig {
    fn from(settings: &HeraldSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            send_queue_capacity: settings.server.send_queue_capacity.max(1),
            max_message_size: settings.server.max_message_size,
            probe_interval: Duration::from_secs(settings.liveness.probe_interval_secs.max(1)),
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
        }
    }
}

impl ServerConfig {
    /// `host:port` bind string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
        assert_eq!(cfg.probe_interval, Duration::from_secs(30));
    }

    #[test]
    fn from_settings() {
        let mut settings = HeraldSettings::default();
        settings.server.port = 9100;
        settings.liveness.probe_interval_secs = 5;
        settings.server.send_queue_capacity = 0;

        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9100");
        assert_eq!(cfg.probe_interval, Duration::from_secs(5));
        assert_eq!(cfg.send_queue_capacity, 1);
    }
}
