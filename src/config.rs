//! Process settings read from the environment (after `.env` is loaded).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CACHE_FILE: &str = "analysis_result.json";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_STATIC_DIR: &str = "frontend";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub cache_file: PathBuf,
    pub bind_addr: SocketAddr,
    /// Overrides the automatic worker count.
    pub workers: Option<usize>,
    pub static_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let bind = var("BIND_ADDR", DEFAULT_BIND_ADDR);
        let bind_addr = bind
            .parse()
            .with_context(|| format!("BIND_ADDR {bind:?} is not a socket address"))?;

        Ok(Self {
            data_dir: var("DATA_DIR", DEFAULT_DATA_DIR).into(),
            cache_file: var("CACHE_FILE", DEFAULT_CACHE_FILE).into(),
            bind_addr,
            workers: lookup("ANALYSIS_WORKERS").and_then(|raw| parse_workers(&raw)),
            static_dir: var("STATIC_DIR", DEFAULT_STATIC_DIR).into(),
        })
    }
}

/// A positive integer, or `None` (with a warning) for anything else.
pub fn parse_workers(raw: &str) -> Option<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!("Ignoring invalid worker count {:?}", raw);
            None
        }
    }
}
