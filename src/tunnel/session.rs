use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, info_span, warn, Instrument};

use super::establish::{acknowledge, establish, forward_request};
use super::relay::{Direction, RelayDirection, RelayOutcome};
use super::resolver::{resolve_target, ResolvedTarget, TunnelMode};
use super::{ClientConnection, TunnelRequest};
use crate::config::TunnelConfig;
use crate::error::Result;
use crate::protocol::CONNECT_METHOD;

/// Message sent with the error response when a tunnel cannot be opened.
pub const FAILURE_MESSAGE: &str = "Tunnel connection failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Handshaking,
    Relaying,
    Closed,
}

/// What happened to both halves of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub mode: TunnelMode,
    pub client_to_destination: RelayOutcome,
    pub destination_to_client: RelayOutcome,
}

/// Handles CONNECT requests for the host server.
///
/// Built once with an immutable [`TunnelConfig`] and shared by every
/// connection; `prefix` tags all log output of the handler.
#[derive(Debug, Clone)]
pub struct TunnelHandler {
    config: TunnelConfig,
    prefix: String,
}

impl TunnelHandler {
    pub fn new(config: TunnelConfig, prefix: impl Into<String>) -> Self {
        Self {
            config,
            prefix: prefix.into(),
        }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Run a CONNECT session to completion.
    ///
    /// Returns `false` without touching the request when its method is not
    /// `CONNECT`. Otherwise returns `true` once the session is over: either an
    /// error response was sent to the client, or both relay directions have
    /// finished and the destination connection was released.
    pub async fn handle<C: ClientConnection>(&self, request: &mut TunnelRequest<C>) -> bool {
        if request.method != CONNECT_METHOD {
            return false;
        }

        let span = info_span!("tunnel", prefix = %self.prefix, target = %request.target);
        self.run(request).instrument(span).await;
        true
    }

    async fn run<C: ClientConnection>(&self, request: &mut TunnelRequest<C>) {
        info!("Tunnel connection to {}", request.target);

        match self.open(request).await {
            Ok(session) => {
                let summary = session.relay().await;
                info!(
                    sent = summary.client_to_destination.bytes,
                    received = summary.destination_to_client.bytes,
                    "Tunnel connection closed"
                );
            }
            Err(err) => {
                warn!("Tunnel connection failure: {}", err);
                if let Err(e) = request
                    .client
                    .send_error(&request.protocol, err.status(), FAILURE_MESSAGE)
                    .await
                {
                    debug!("Failed to send error response: {}", e);
                }
            }
        }
    }

    /// Resolve the target, dial it and perform the handshake.
    ///
    /// # Errors
    /// * `TunnelError::MalformedTarget` - direct mode and the target is not `host:port`.
    /// * `TunnelError::DialFailure` - the destination or upstream proxy is unreachable.
    /// * `TunnelError::HandshakeWriteFailure` - the handshake could not be written.
    pub async fn open<'r, C: ClientConnection>(
        &self,
        request: &'r mut TunnelRequest<C>,
    ) -> Result<TunnelSession<'r, C>> {
        let target = resolve_target(&request.target, &mut request.headers, &self.config)?;
        debug!(mode = %target.mode, "Dialing {}", target.authority());

        let destination = establish(&target.host, target.port).await?;

        let mut session = TunnelSession::new(request, target, destination);
        session.handshake().await?;
        Ok(session)
    }
}

/// A dialed tunnel: the borrowed client request and the destination
/// connection it exclusively owns.
pub struct TunnelSession<'r, C> {
    request: &'r mut TunnelRequest<C>,
    target: ResolvedTarget,
    destination: TcpStream,
    state: SessionState,
}

impl<'r, C: ClientConnection> TunnelSession<'r, C> {
    fn new(
        request: &'r mut TunnelRequest<C>,
        target: ResolvedTarget,
        destination: TcpStream,
    ) -> Self {
        Self {
            request,
            target,
            destination,
            state: SessionState::Init,
        }
    }

    pub fn mode(&self) -> TunnelMode {
        self.target.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn handshake(&mut self) -> Result<()> {
        self.transition(SessionState::Handshaking);
        match self.target.mode {
            TunnelMode::Forwarding => forward_request(&mut self.destination, self.request).await,
            TunnelMode::Direct => {
                acknowledge(&mut self.request.client, &self.request.protocol).await
            }
        }
    }

    /// Relay in both directions until both are finished, then release the
    /// destination connection.
    ///
    /// The directions run concurrently and independently; one finishing or
    /// failing does not stop the other.
    pub async fn relay(mut self) -> SessionSummary {
        self.transition(SessionState::Relaying);

        let (client_read, client_write) = tokio::io::split(&mut self.request.client);
        let (dest_read, dest_write) = self.destination.split();

        let upstream = RelayDirection::new(Direction::ClientToDestination, client_read, dest_write);
        let downstream =
            RelayDirection::new(Direction::DestinationToClient, dest_read, client_write);

        let (client_to_destination, destination_to_client) =
            tokio::join!(upstream.run(), downstream.run());

        self.transition(SessionState::Closed);
        release(self.destination).await;

        SessionSummary {
            mode: self.target.mode,
            client_to_destination,
            destination_to_client,
        }
    }
}

async fn release(mut destination: TcpStream) {
    // Already half-closed by the relay in the common case.
    if let Err(e) = destination.shutdown().await {
        debug!("Destination shutdown: {}", e);
    }
}
