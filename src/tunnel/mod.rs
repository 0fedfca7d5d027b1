//! CONNECT tunnel core.
//!
//! This module provides the tunnel functionality:
//! - [`TunnelHandler`] - Entry point that runs one CONNECT session
//! - Target resolution (direct destination or upstream proxy)
//! - Dialing and the handshake that precedes relaying
//! - Bidirectional relay between client and destination

mod establish;
mod relay;
mod resolver;
mod session;

pub use establish::{acknowledge, establish, forward_request};
pub use relay::{Direction, DirectionState, RelayDirection, RelayOutcome, RELAY_BUFFER_SIZE};
pub use resolver::{resolve_target, ResolvedTarget, TunnelMode};
pub use session::{SessionState, SessionSummary, TunnelHandler, TunnelSession, FAILURE_MESSAGE};

use std::future::Future;

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::protocol::{error_response, Headers};

/// Client side of a proxied exchange, as handed over by the host server.
///
/// The host keeps ownership of the connection; the tunnel only borrows it
/// for the length of a session and never closes it.
pub trait ClientConnection: AsyncRead + AsyncWrite + Unpin + Send {
    /// Send a short error response to the client.
    fn send_error(
        &mut self,
        protocol: &str,
        status: StatusCode,
        message: &str,
    ) -> impl Future<Output = std::io::Result<()>> + Send {
        let response = error_response(protocol, status, message);
        async move {
            self.write_all(&response).await?;
            self.flush().await
        }
    }
}

impl ClientConnection for tokio::net::TcpStream {}

impl<S> ClientConnection for tokio::io::BufReader<S> where
    S: AsyncRead + AsyncWrite + Unpin + Send
{
}

/// A request handed to the tunnel by the host server.
#[derive(Debug)]
pub struct TunnelRequest<C> {
    pub method: String,
    /// `host:port` in direct mode, passed through opaquely when chaining.
    pub target: String,
    /// Protocol version from the request line, e.g. `HTTP/1.1`.
    pub protocol: String,
    pub headers: Headers,
    pub client: C,
}

impl<C> TunnelRequest<C> {
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        protocol: impl Into<String>,
        client: C,
    ) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            protocol: protocol.into(),
            headers: Headers::new(),
            client,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}
