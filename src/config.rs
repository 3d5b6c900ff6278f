use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::lookup_host;

pub const ADDR_ENV: &str = "SMTP_SINK_ADDR";
pub const HOSTNAME_ENV: &str = "SMTP_SINK_HOSTNAME";

const DEFAULT_ADDR: &str = "localhost:1025";
const DEFAULT_HOSTNAME: &str = "localhost";

/// Process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the listener binds to, in `host:port` form.
    pub addr: String,
    /// Name announced in the HELO/EHLO reply.
    pub hostname: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            hostname: DEFAULT_HOSTNAME.to_string(),
        }
    }
}

impl Config {
    /// Read the configuration from the environment.
    ///
    /// Unset variables fall back to their defaults with a warning.
    pub fn from_env() -> Self {
        Self {
            addr: env_or(ADDR_ENV, DEFAULT_ADDR),
            hostname: env_or(HOSTNAME_ENV, DEFAULT_HOSTNAME),
        }
    }

    /// Resolve the bind address.
    pub async fn socket_addr(&self) -> Result<SocketAddr> {
        lookup_host(&self.addr)
            .await
            .with_context(|| format!("invalid bind address {}", self.addr))?
            .next()
            .with_context(|| format!("{} did not resolve to any address", self.addr))
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => {
            tracing::warn!("{} not set, using default {}", key, default);
            default.to_string()
        }
    }
}
