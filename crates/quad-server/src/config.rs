//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use quad_shared::constants::{
    DEFAULT_EMAIL_DOMAIN, DEFAULT_HTTP_PORT, DEFAULT_MAX_ACTIVE_CHATS, DEFAULT_MAX_REQUEST_WORDS,
    TOKEN_TTL_SECS,
};
use quad_shared::gate::ConnectionGate;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./quad.db`
    pub database_path: PathBuf,

    /// Maximum simultaneous active chats per user (K).
    /// Env: `MAX_ACTIVE_CHATS`
    /// Default: `3`
    pub max_active_chats: usize,

    /// Maximum words in a connection request message.
    /// Env: `MAX_REQUEST_WORDS`
    /// Default: `30`
    pub max_request_words: usize,

    /// Institutional email domain required at registration.
    /// Env: `EMAIL_DOMAIN`
    /// Default: `kiet.edu`
    pub email_domain: String,

    /// Lifetime of a bearer token issued by `/auth/login`.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: `3600`
    pub token_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./quad.db"),
            max_active_chats: DEFAULT_MAX_ACTIVE_CHATS,
            max_request_words: DEFAULT_MAX_REQUEST_WORDS,
            email_domain: DEFAULT_EMAIL_DOMAIN.to_string(),
            token_ttl: Duration::from_secs(TOKEN_TTL_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(n) = parse_positive(&lookup, "MAX_ACTIVE_CHATS") {
            config.max_active_chats = n;
        }

        if let Some(n) = parse_positive(&lookup, "MAX_REQUEST_WORDS") {
            config.max_request_words = n;
        }

        if let Some(domain) = lookup("EMAIL_DOMAIN") {
            let domain = domain.trim().trim_start_matches('@');
            if !domain.is_empty() {
                config.email_domain = domain.to_string();
            }
        }

        if let Some(secs) = parse_positive(&lookup, "TOKEN_TTL_SECS") {
            config.token_ttl = Duration::from_secs(secs as u64);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn gate(&self) -> ConnectionGate {
        ConnectionGate::new(self.max_active_chats, self.max_request_words)
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let value = lookup(key)?;
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %value, "Invalid positive integer, using default");
            None
        }
    }
}
