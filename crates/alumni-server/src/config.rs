//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use alumni_shared::constants::{DEFAULT_HTTP_PORT, MAX_MEDIA_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./alumni.db`
    pub database_path: PathBuf,

    /// Directory where uploaded chat attachments are stored.
    /// Env: `MEDIA_STORAGE_PATH`
    /// Default: `./media`
    pub media_storage_path: PathBuf,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_MEDIA_SIZE`
    /// Default: 50 MiB
    pub max_media_size: usize,

    /// Ed25519 public key of the auth server (hex-encoded, 64 chars).
    /// Env: `AUTH_SERVER_PUBKEY`
    /// Default: all-zeros (development only, rejects every token).
    pub auth_server_pubkey: [u8; 32],

    /// Human-readable name for this instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Bearer secret the posts service presents on `/feed/events`.
    /// Env: `FEED_INGEST_TOKEN`
    /// Default: unset (feed ingestion disabled).
    pub feed_ingest_token: Option<String>,

    /// Per-IP HTTP rate limit.
    /// Env: `RATE_LIMIT_PER_SEC`, `RATE_LIMIT_BURST`
    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: f64,

    /// Per-user limit on socket `sendMessage`.
    /// Env: `MESSAGE_RATE_PER_SEC`, `MESSAGE_RATE_BURST`
    pub message_rate_per_sec: f64,
    pub message_rate_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./alumni.db"),
            media_storage_path: PathBuf::from("./media"),
            max_media_size: MAX_MEDIA_SIZE,
            auth_server_pubkey: [0u8; 32],
            instance_name: "Alumni Portal".to_string(),
            feed_ingest_token: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            message_rate_per_sec: 5.0,
            message_rate_burst: 20.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = var("MEDIA_STORAGE_PATH") {
            config.media_storage_path = PathBuf::from(path);
        }

        if let Some(val) = var("MAX_MEDIA_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_media_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_MEDIA_SIZE, using default"),
            }
        }

        if let Some(hex_key) = var("AUTH_SERVER_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_server_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SERVER_PUBKEY, using default (dev-only)"
                    );
                }
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = var("FEED_INGEST_TOKEN") {
            if !token.is_empty() {
                config.feed_ingest_token = Some(token);
            }
        }

        parse_rate(&var, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_rate(&var, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);
        parse_rate(&var, "MESSAGE_RATE_PER_SEC", &mut config.message_rate_per_sec);
        parse_rate(&var, "MESSAGE_RATE_BURST", &mut config.message_rate_burst);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_rate(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut f64) {
    let Some(val) = var(key) else { return };
    match val.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => *slot = n,
        _ => tracing::warn!(key, value = %val, "Invalid rate setting, using default"),
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(raw: &str) -> Result<[u8; 32], String> {
    let raw = raw.trim();
    if raw.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", raw.len()));
    }
    let bytes = hex::decode(raw).map_err(|e| e.to_string())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.auth_server_pubkey, [0u8; 32]);
        assert!(config.feed_ingest_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let key = "ab".repeat(32);
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/chat.db"),
            ("AUTH_SERVER_PUBKEY", key.as_str()),
            ("FEED_INGEST_TOKEN", "s3cret"),
            ("RATE_LIMIT_BURST", "5"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.auth_server_pubkey, [0xab; 32]);
        assert_eq!(config.feed_ingest_token.as_deref(), Some("s3cret"));
        assert_eq!(config.rate_limit_burst, 5.0);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("AUTH_SERVER_PUBKEY", "abcd"),
            ("MAX_MEDIA_SIZE", "-1"),
            ("RATE_LIMIT_PER_SEC", "0"),
            ("FEED_INGEST_TOKEN", ""),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.auth_server_pubkey, [0u8; 32]);
        assert_eq!(config.max_media_size, defaults.max_media_size);
        assert_eq!(config.rate_limit_per_sec, defaults.rate_limit_per_sec);
        assert!(config.feed_ingest_token.is_none());
    }

    #[test]
    fn test_parse_hex_pubkey() {
        assert_eq!(parse_hex_pubkey(&"0f".repeat(32)).unwrap(), [0x0f; 32]);
        assert!(parse_hex_pubkey(&"zz".repeat(32)).is_err());
    }
}
