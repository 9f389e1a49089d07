//! # herald-gateway
//!
//! Notification gateway binary. Loads settings, picks the identity store,
//! cache and broadcast channel backends, and runs the server until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use herald_server::cache::{CacheService, MemoryCacheBackend, RedisCacheBackend};
use herald_server::identity::PoolConfig;
use herald_server::{
    BroadcastChannel, CachedIdentityStore, HeraldServer, IdentityStore, InMemoryIdentityStore,
    MemoryChannel, PgIdentityStore, RedisChannel, RelayConfig, ServerConfig,
};
use herald_settings::HeraldSettings;

/// Herald notification gateway.
#[derive(Parser, Debug)]
#[command(name = "herald-gateway", about = "Real-time notification gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$HERALD_SETTINGS` or `~/.herald/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut HeraldSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

fn redis_client(url: &str) -> Result<redis::Client> {
    redis::Client::open(url).with_context(|| format!("Invalid Redis URL: {url}"))
}

async fn build_cache(settings: &HeraldSettings) -> Result<CacheService> {
    let ttl = Duration::from_secs(settings.cache.default_ttl_secs);
    match &settings.relay.redis_url {
        Some(url) => {
            let backend = RedisCacheBackend::connect(redis_client(url)?)
                .await
                .context("Failed to connect cache to Redis")?;
            tracing::info!("cache backed by Redis");
            Ok(CacheService::new(Arc::new(backend), ttl))
        }
        None => Ok(CacheService::new(Arc::new(MemoryCacheBackend::new()), ttl)),
    }
}

/// The identity store to serve from, plus the Postgres store when one was
/// opened so its pool can be closed on shutdown.
async fn build_identity(
    settings: &HeraldSettings,
) -> Result<(Arc<dyn IdentityStore>, Option<PgIdentityStore>)> {
    let (store, pg) = match &settings.database.url {
        Some(url) => {
            let pool = PoolConfig {
                min_connections: settings.database.pool_size,
                max_connections: settings.database.max_connections,
                acquire_timeout: Duration::from_secs(settings.database.acquire_timeout_secs),
            };
            let store = PgIdentityStore::connect(url, &pool)
                .await
                .context("Failed to connect to the users database")?;
            tracing::info!(max_connections = pool.max_connections, "users database connected");
            (Arc::new(store.clone()) as Arc<dyn IdentityStore>, Some(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using an empty in-memory user set");
            (Arc::new(InMemoryIdentityStore::new()) as Arc<dyn IdentityStore>, None)
        }
    };

    if !settings.cache.enabled {
        return Ok((store, pg));
    }
    let cache = build_cache(settings).await?;
    let cached = CachedIdentityStore::new(
        store,
        cache,
        Duration::from_secs(settings.cache.user_ttl_secs),
    );
    Ok((Arc::new(cached), pg))
}

async fn build_channel(settings: &HeraldSettings) -> Result<Arc<dyn BroadcastChannel>> {
    match &settings.relay.redis_url {
        Some(url) => {
            let channel = RedisChannel::connect(redis_client(url)?)
                .await
                .context("Failed to connect relay to Redis")?;
            tracing::info!(channel = %settings.relay.channel, "relay backed by Redis pub/sub");
            Ok(Arc::new(channel))
        }
        None => {
            tracing::warn!("REDIS_URL not set, relay is limited to this process");
            Ok(Arc::new(MemoryChannel::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(herald_settings::settings_path);
    let mut settings = herald_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    herald_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);
    tracing::info!(path = %settings_path.display(), "settings loaded");

    let metrics = herald_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let (identity, users_db) = build_identity(&settings).await?;
    let channel = build_channel(&settings).await?;

    let config = ServerConfig::from(&settings);
    let shutdown_timeout = config.shutdown_timeout;
    let server = HeraldServer::new(
        config,
        identity,
        channel,
        RelayConfig::from(&settings.relay),
        metrics,
    );
    server.start_background();
    let (addr, server_task) = server.listen().await.context("Failed to bind listener")?;
    tracing::info!(%addr, "Herald gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    tracing::info!("Shutting down");

    server.shutdown().graceful_shutdown(shutdown_timeout).await;
    if tokio::time::timeout(shutdown_timeout, server_task).await.is_err() {
        tracing::warn!("HTTP server did not stop in time");
    }
    if let Some(db) = users_db {
        db.close().await;
        tracing::info!("users database pool closed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["herald-gateway"]);
        let mut settings = HeraldSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert!(cli.settings.is_none());
    }

    #[test]
    fn cli_overrides_host_and_port() {
        let cli = Cli::parse_from(["herald-gateway", "--host", "127.0.0.1", "--port", "0"]);
        let mut settings = HeraldSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["herald-gateway", "--settings", "/tmp/herald.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/herald.json")));
    }

    #[test]
    fn cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["herald-gateway", "--port", "99999"]).is_err());
    }

    #[test]
    fn redis_client_rejects_garbage_url() {
        assert!(redis_client("not a url").is_err());
    }

    #[tokio::test]
    async fn identity_without_database_is_in_memory() {
        let mut settings = HeraldSettings::default();
        settings.cache.enabled = false;
        let (store, users_db) = build_identity(&settings).await.unwrap();
        assert!(users_db.is_none());
        let id = herald_core::UserId::new(1).unwrap();
        assert!(store.find_user_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn channel_without_redis_is_in_memory() {
        let settings = HeraldSettings::default();
        assert!(build_channel(&settings).await.is_ok());
    }
}
