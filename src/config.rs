//! Configuration management for the tunnel endpoint.
//!
//! Handles loading the TOML file (by default
//! `<config dir>/connect-tunnel/config.toml`) and turning it into the
//! immutable [`TunnelConfig`] the handler is built with.

use anyhow::{Context, Result};
use base64::Engine;
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Port used for the upstream proxy when none (or an unparsable one) is configured.
pub const DEFAULT_UPSTREAM_PORT: u16 = 80;

/// Log prefix used when the config does not name one.
pub const DEFAULT_PREFIX: &str = "tunnel";

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tunnel: TunnelSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    pub listen: Option<SocketAddr>,
}

/// `[tunnel]` table as written in the file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TunnelSettings {
    pub prefix: Option<String>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<PortValue>,
    pub auth: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// A port may be written as a TOML integer or as text such as `"0x1F90"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

impl PortValue {
    fn decode(&self) -> u16 {
        match self {
            PortValue::Number(n) => u16::try_from(*n).unwrap_or(DEFAULT_UPSTREAM_PORT),
            PortValue::Text(s) => decode_port(s),
        }
    }
}

/// Settings the tunnel handler runs with. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Upstream proxy to chain through. `None` dials destinations directly.
    pub upstream_host: Option<String>,
    pub upstream_port: u16,
    /// Sent verbatim as `Proxy-Authorization` to the upstream proxy.
    pub auth: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            upstream_host: None,
            upstream_port: DEFAULT_UPSTREAM_PORT,
            auth: None,
        }
    }
}

impl TunnelConfig {
    /// Direct tunnels only.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Chain every tunnel through `host:port`.
    pub fn upstream(host: impl Into<String>, port: u16) -> Self {
        Self {
            upstream_host: Some(host.into()),
            upstream_port: port,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }
}

impl TunnelSettings {
    /// Resolve the file settings into the handler configuration.
    ///
    /// An explicit `auth` wins over `username`/`password`, which are turned
    /// into a `Basic` credential.
    pub fn resolve(&self) -> TunnelConfig {
        let upstream_port = self
            .proxy_port
            .as_ref()
            .map(PortValue::decode)
            .unwrap_or(DEFAULT_UPSTREAM_PORT);

        let auth = self.auth.clone().or_else(|| {
            self.username.as_ref().map(|user| {
                basic_auth(user, self.password.as_deref().unwrap_or(""))
            })
        });

        TunnelConfig {
            upstream_host: self.proxy_host.clone().filter(|h| !h.is_empty()),
            upstream_port,
            auth,
        }
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }
}

impl Config {
    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::config_path()?;
                if !path.exists() {
                    return Ok(Self::default());
                }
                Self::load_from(&path)
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "connect-tunnel")
            .context("Could not determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

/// Decode a port the way Java's `Integer.decode` reads numbers: optional
/// sign, then `0x`/`0X`/`#` hex, leading-`0` octal, or decimal.
///
/// No whitespace is trimmed and no second sign is allowed after the radix
/// prefix. Anything unparsable or outside the port range yields
/// [`DEFAULT_UPSTREAM_PORT`].
pub fn decode_port(value: &str) -> u16 {
    let (negative, s) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };

    let (digits, radix) = if let Some(hex) = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('#'))
    {
        (hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };

    if digits.starts_with(['+', '-']) {
        return DEFAULT_UPSTREAM_PORT;
    }

    match u16::from_str_radix(digits, radix) {
        Ok(0) => 0,
        Ok(port) if !negative => port,
        _ => DEFAULT_UPSTREAM_PORT,
    }
}

/// `Basic` credential for the `Proxy-Authorization` header.
pub fn basic_auth(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}
