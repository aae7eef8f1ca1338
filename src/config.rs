use std::{env, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};

/// Toggles consumed by the rewrite pipeline. Immutable after startup and
/// passed explicitly; there is no ambient configuration lookup.
#[derive(Clone, Copy, Debug)]
pub struct RewriteConfig {
    pub music: bool,
    pub books: bool,
    pub audiobooks: bool,
    pub best_effort: bool,
    pub debug_attrs: bool,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Optional second proxy hop (`host:port`), e.g. an UmlautAdaptarr
    /// instance sitting between this proxy and the indexer.
    pub upstream_proxy: Option<String>,
    pub upstream_timeout: Duration,
    pub rewrite: RewriteConfig,
    pub log_level: String,
}

impl AppConfig {
    /// Loads configuration from the environment. Every variable has a
    /// default; only unparseable values are errors, and those abort startup
    /// before the listener binds.
    pub fn from_env() -> Result<Self> {
        let host = env::var("PROXY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PROXY_PORT").unwrap_or_else(|_| "5008".to_string());
        let port = port
            .parse::<u16>()
            .context("PROXY_PORT must be a valid u16 integer")?;
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .context("failed to parse socket address from PROXY_HOST and PROXY_PORT")?;

        let upstream_proxy = env::var("UPSTREAM_PROXY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let timeout_secs = parse_timeout_secs(env::var("UPSTREAM_TIMEOUT_SECS").ok())?;
        let upstream_timeout = Duration::from_secs(timeout_secs);

        let rewrite = RewriteConfig {
            music: env_flag("REWRITE_MUSIC", true),
            books: env_flag("REWRITE_BOOKS", true),
            audiobooks: env_flag("REWRITE_AUDIOBOOKS", true),
            best_effort: env_flag("BEST_EFFORT", true),
            debug_attrs: env_flag("DEBUG_ATTRS", false),
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            upstream_proxy,
            upstream_timeout,
            rewrite,
            log_level,
        })
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => value.trim().eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn parse_timeout_secs(value: Option<String>) -> Result<u64> {
    match value {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .context("UPSTREAM_TIMEOUT_SECS must be a positive number of seconds"),
        None => Ok(60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_when_unset() {
        assert_eq!(parse_timeout_secs(None).unwrap(), 60);
        assert_eq!(parse_timeout_secs(Some("30".to_string())).unwrap(), 30);
    }

    #[test]
    fn invalid_timeout_aborts_startup() {
        assert!(parse_timeout_secs(Some("abc".to_string())).is_err());
        assert!(parse_timeout_secs(Some("0".to_string())).is_err());
        assert!(parse_timeout_secs(Some("-5".to_string())).is_err());
    }
}
