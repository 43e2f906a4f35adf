//! Client and server settings: JSON file first, then environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::protocol::{Framing, DEFAULT_CHUNK};

pub const DEFAULT_PORT: u16 = 12345;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address; prompted for when absent.
    pub host: Option<String>,
    pub port: u16,
    /// Nickname; prompted for when absent.
    pub nickname: Option<String>,
    pub recv_chunk: usize,
    pub framing: Framing,
    pub connect_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            nickname: None,
            recv_chunk: DEFAULT_CHUNK,
            framing: Framing::Raw,
            connect_timeout_ms: None,
            handshake_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Load `path` if given (defaults otherwise), then apply `LANCHAT_*`
    /// environment overrides and validate.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(host) = env_string("LANCHAT_HOST") {
            self.host = Some(host);
        }
        if let Some(nickname) = env_string("LANCHAT_NICKNAME") {
            self.nickname = Some(nickname);
        }
        if let Some(port) = env_parse("LANCHAT_PORT")? {
            self.port = port;
        }
        if let Some(chunk) = env_parse("LANCHAT_RECV_CHUNK")? {
            self.recv_chunk = chunk;
        }
        if let Some(framing) = env_parse("LANCHAT_FRAMING")? {
            self.framing = framing;
        }
        if let Some(ms) = env_parse("LANCHAT_CONNECT_TIMEOUT_MS")? {
            self.connect_timeout_ms = Some(ms);
        }
        if let Some(ms) = env_parse("LANCHAT_HANDSHAKE_TIMEOUT_MS")? {
            self.handshake_timeout_ms = Some(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ChatError::Config("port must be non-zero".to_string()));
        }
        if self.recv_chunk == 0 {
            return Err(ChatError::Config("recv_chunk must be non-zero".to_string()));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(ChatError::Config("connect_timeout_ms must be non-zero".to_string()));
        }
        if self.handshake_timeout_ms == Some(0) {
            return Err(ChatError::Config("handshake_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub recv_chunk: usize,
    pub framing: Framing,
    /// Seconds between stats log lines; 0 disables the monitor.
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            recv_chunk: DEFAULT_CHUNK,
            framing: Framing::Raw,
            stats_interval_secs: 120,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(bind) = env_string("LANCHAT_BIND") {
            self.bind = bind;
        }
        if let Some(port) = env_parse("LANCHAT_PORT")? {
            self.port = port;
        }
        if let Some(chunk) = env_parse("LANCHAT_RECV_CHUNK")? {
            self.recv_chunk = chunk;
        }
        if let Some(framing) = env_parse("LANCHAT_FRAMING")? {
            self.framing = framing;
        }
        if let Some(secs) = env_parse("LANCHAT_STATS_INTERVAL_SECS")? {
            self.stats_interval_secs = secs;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.recv_chunk == 0 {
            return Err(ChatError::Config("recv_chunk must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| ChatError::Config(format!("{}: {}", path.display(), e)))
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ChatError::Config(format!("{}={}: {}", key, value, e))),
        None => Ok(None),
    }
}
