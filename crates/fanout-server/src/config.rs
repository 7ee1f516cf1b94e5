//! Configuration loading and parsing.
//!
//! Defines the server config schema (TOML) and resolves defaults. CLI flags
//! override file values; everything has a usable default so the server runs
//! without any config at all.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Cap on simultaneous device sessions.
    pub max_sessions: Option<usize>,
    /// Directory for spooled upload files.
    pub spool_dir: Option<String>,
    /// Seconds between temp-file sweep passes.
    pub sweep_interval_secs: Option<u64>,
    /// Age in seconds after which a batch is force-ended by the sweep.
    pub batch_max_age_secs: Option<u64>,
    /// Maximum accepted upload payload in bytes.
    pub max_upload_bytes: Option<usize>,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Fully-resolved runtime settings.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub max_sessions: usize,
    pub spool_dir: PathBuf,
    pub sweep_interval: Duration,
    pub batch_max_age: Duration,
    pub max_upload_bytes: usize,
}

impl ServerSettings {
    /// Resolve settings from an optional config file and an optional
    /// `--bind` override.
    pub fn resolve(cfg: &ServerConfig, bind_override: Option<SocketAddr>) -> Result<Self> {
        let bind = match bind_override {
            Some(addr) => addr,
            None => cfg
                .bind
                .as_deref()
                .unwrap_or("0.0.0.0:5000")
                .parse()
                .with_context(|| format!("parse bind address {:?}", cfg.bind))?,
        };

        let spool_dir = cfg
            .spool_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("fanout-spool"));

        Ok(Self {
            bind,
            max_sessions: cfg
                .max_sessions
                .unwrap_or(fanout_engine::engine::DEFAULT_MAX_SESSIONS),
            spool_dir,
            sweep_interval: Duration::from_secs(cfg.sweep_interval_secs.unwrap_or(300)),
            batch_max_age: Duration::from_secs(cfg.batch_max_age_secs.unwrap_or(600)),
            max_upload_bytes: cfg.max_upload_bytes.unwrap_or(100 * 1024 * 1024),
        })
    }
}
