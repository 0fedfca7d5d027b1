use std::fmt;

use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::protocol::Headers;

pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";

/// How the tunnel is opened once the dial succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    /// Dial the requested destination and answer the client with `200`.
    Direct,
    /// Dial the upstream proxy and forward the CONNECT request to it.
    Forwarding,
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelMode::Direct => write!(f, "direct"),
            TunnelMode::Forwarding => write!(f, "forwarding"),
        }
    }
}

/// Where to dial, and how to open the tunnel there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub host: String,
    pub port: u16,
    pub mode: TunnelMode,
    /// Credential attached for the upstream proxy, if any.
    pub auth: Option<String>,
}

impl ResolvedTarget {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Decide the dial target for a CONNECT request.
///
/// With an upstream proxy configured, that proxy is dialed and the configured
/// credential (if any) is appended to `headers` as `Proxy-Authorization`.
/// Otherwise `target` is split on its first colon into host and port.
///
/// # Errors
/// * `TunnelError::MalformedTarget` - direct mode and `target` has no colon
///   or a port that is not a non-negative 16-bit integer.
pub fn resolve_target(
    target: &str,
    headers: &mut Headers,
    config: &TunnelConfig,
) -> Result<ResolvedTarget> {
    if let Some(upstream) = &config.upstream_host {
        if let Some(auth) = &config.auth {
            headers.add(PROXY_AUTHORIZATION, auth.clone());
        }
        return Ok(ResolvedTarget {
            host: upstream.clone(),
            port: config.upstream_port,
            mode: TunnelMode::Forwarding,
            auth: config.auth.clone(),
        });
    }

    let (host, port) = target
        .split_once(':')
        .ok_or_else(|| TunnelError::MalformedTarget(target.to_string()))?;

    let port: u16 = port
        .parse()
        .map_err(|_| TunnelError::MalformedTarget(target.to_string()))?;

    Ok(ResolvedTarget {
        host: host.to_string(),
        port,
        mode: TunnelMode::Direct,
        auth: None,
    })
}
