use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

use super::TunnelRequest;
use crate::error::{Result, TunnelError};
use crate::protocol::{connection_established, request_head};

/// Resolve `host` and open a TCP connection to it.
///
/// Resolved addresses are tried in order. No timeout is applied to either
/// the lookup or the connect.
///
/// # Errors
/// * `TunnelError::DialFailure` - name resolution failed, returned no
///   addresses, or no address accepted the connection.
pub async fn establish(host: &str, port: u16) -> Result<TcpStream> {
    let target = format!("{}:{}", host, port);
    let dial_failure = |source| TunnelError::DialFailure {
        target: target.clone(),
        source,
    };

    let addrs = lookup_host((host, port)).await.map_err(dial_failure)?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!("Connected to {} ({})", target, addr);
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} ({}) failed: {}", target, addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(dial_failure(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "host resolved to no addresses",
        )
    })))
}

/// Forward the CONNECT request head to an upstream proxy.
///
/// # Errors
/// * `TunnelError::HandshakeWriteFailure` - the write or flush failed.
pub async fn forward_request<C, W>(destination: &mut W, request: &TunnelRequest<C>) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let head = request_head(
        &request.method,
        &request.target,
        &request.protocol,
        &request.headers,
    );
    write_handshake(destination, &head).await
}

/// Tell the client its direct tunnel is open.
///
/// # Errors
/// * `TunnelError::HandshakeWriteFailure` - the write or flush failed.
pub async fn acknowledge<W>(client: &mut W, protocol: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_handshake(client, &connection_established(protocol)).await
}

async fn write_handshake<W>(out: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    out.write_all(bytes)
        .await
        .map_err(TunnelError::HandshakeWriteFailure)?;
    out.flush().await.map_err(TunnelError::HandshakeWriteFailure)
}
