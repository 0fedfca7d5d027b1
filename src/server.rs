//! Minimal HTTP front end for the tunnel handler.
//!
//! Reads the request head of each accepted connection and hands it to
//! [`TunnelHandler`]. Requests the handler declines are answered with
//! `405 Method Not Allowed`.

use std::net::SocketAddr;
use std::sync::Arc;

use http::StatusCode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::{Result, TunnelError};
use crate::protocol::{Headers, SessionId};
use crate::tunnel::{ClientConnection, TunnelHandler, TunnelRequest};

/// Upper bound on header lines in one request head.
pub const MAX_HEADERS: usize = 100;

/// Upper bound on the length of a single request-head line, in bytes.
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Protocol used in responses sent before a request line could be read.
const FALLBACK_PROTOCOL: &str = "HTTP/1.1";

/// Request head as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub protocol: String,
    pub headers: Headers,
}

pub struct ProxyServer {
    listener: TcpListener,
    handler: Arc<TunnelHandler>,
}

impl ProxyServer {
    pub async fn bind(addr: SocketAddr, handler: TunnelHandler) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, handler))
    }

    pub fn from_listener(listener: TcpListener, handler: TunnelHandler) -> Self {
        Self {
            listener,
            handler: Arc::new(handler),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        info!(
            prefix = %self.handler.prefix(),
            "Tunnel endpoint listening on {}",
            self.local_addr()?
        );

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            let span = info_span!("conn", id = %SessionId::next(), peer = %peer_addr);

            tokio::spawn(
                async move {
                    debug!("New connection");
                    if let Err(e) = serve_connection(stream, &handler).await {
                        debug!("Connection error: {}", e);
                    }
                }
                .instrument(span),
            );
        }
    }
}

/// Serve one client connection: read its request head and dispatch it.
pub async fn serve_connection(stream: TcpStream, handler: &TunnelHandler) -> Result<()> {
    let mut client = BufReader::new(stream);

    let head = match read_request_head(&mut client).await {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(()),
        Err(err @ TunnelError::InvalidRequest(_)) => {
            let _ = client
                .send_error(FALLBACK_PROTOCOL, err.status(), &err.to_string())
                .await;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    let mut request = TunnelRequest::new(head.method, head.target, head.protocol, client)
        .with_headers(head.headers);

    if !handler.handle(&mut request).await {
        debug!("Declined {} {}", request.method, request.target);
        request
            .client
            .send_error(
                &request.protocol,
                StatusCode::METHOD_NOT_ALLOWED,
                "Only CONNECT is supported",
            )
            .await?;
    }

    let _ = request.client.get_mut().shutdown().await;
    Ok(())
}

/// Read a request line and the header lines that follow it.
///
/// Returns `Ok(None)` if the peer closed the connection before sending a
/// request line. Bytes after the blank line stay buffered in `reader`.
///
/// # Errors
/// * `TunnelError::InvalidRequest` - malformed request line, header line,
///   oversized line, too many headers, or end of stream inside the head.
/// * `TunnelError::Io` - reading from the connection failed.
pub async fn read_request_head<R>(reader: &mut R) -> Result<Option<RequestHead>>
where
    R: AsyncBufRead + Unpin,
{
    let request_line = match read_line(reader).await? {
        Some(line) => line,
        None => return Ok(None),
    };

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    let &[method, target, protocol] = parts.as_slice() else {
        return Err(TunnelError::InvalidRequest(format!(
            "invalid request line: {:?}",
            request_line
        )));
    };
    let (method, target, protocol) = (
        method.to_string(),
        target.to_string(),
        protocol.to_string(),
    );

    let mut headers = Headers::new();
    loop {
        let line = read_line(reader).await?.ok_or_else(|| {
            TunnelError::InvalidRequest("connection closed inside request head".to_string())
        })?;

        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(TunnelError::InvalidRequest("too many headers".to_string()));
        }

        let (name, value) = Headers::parse_line(&line).ok_or_else(|| {
            TunnelError::InvalidRequest(format!("invalid header line: {:?}", line))
        })?;
        headers.add(name, value);
    }

    Ok(Some(RequestHead {
        method,
        target,
        protocol,
        headers,
    }))
}

/// One line without its `\r\n` or `\n` terminator; `None` at end of stream.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;

    if n == 0 {
        return Ok(None);
    }
    if !buf.ends_with(b"\n") {
        return Err(TunnelError::InvalidRequest(if n > MAX_LINE_LEN {
            "request-head line too long".to_string()
        } else {
            "connection closed inside request head".to_string()
        }));
    }

    buf.pop();
    if buf.ends_with(b"\r") {
        buf.pop();
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| TunnelError::InvalidRequest("request head is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelConfig;

    async fn parse(input: &[u8]) -> Result<Option<RequestHead>> {
        let mut reader = BufReader::new(input);
        read_request_head(&mut reader).await
    }

    async fn start_server(config: TunnelConfig) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = ProxyServer::from_listener(listener, TunnelHandler::new(config, "test"));
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });
        addr
    }

    #[tokio::test]
    async fn test_read_request_head() {
        let input = b"CONNECT example.com:443 HTTP/1.1\r\n\
                      Host: example.com:443\r\n\
                      Proxy-Connection:keep-alive\r\n\
                      \r\n";
        let head = parse(input).await.unwrap().unwrap();

        assert_eq!(head.method, "CONNECT");
        assert_eq!(head.target, "example.com:443");
        assert_eq!(head.protocol, "HTTP/1.1");
        assert_eq!(head.headers.len(), 2);
        assert_eq!(head.headers.get("host"), Some("example.com:443"));
        assert_eq!(head.headers.get("Proxy-Connection"), Some("keep-alive"));
    }

    #[tokio::test]
    async fn test_read_request_head_accepts_bare_newlines() {
        let head = parse(b"CONNECT a:1 HTTP/1.0\nHost: a:1\n\n").await.unwrap().unwrap();
        assert_eq!(head.protocol, "HTTP/1.0");
        assert_eq!(head.headers.get("Host"), Some("a:1"));
    }

    #[tokio::test]
    async fn test_read_request_head_leaves_body_buffered() {
        let mut reader = BufReader::new(&b"CONNECT a:1 HTTP/1.1\r\n\r\nearly bytes"[..]);
        read_request_head(&mut reader).await.unwrap().unwrap();

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"early bytes");
    }

    #[tokio::test]
    async fn test_read_request_head_empty_stream() {
        assert!(parse(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_head_rejects_bad_input() {
        let cases: [&[u8]; 4] = [
            b"CONNECT example.com:443\r\n\r\n",
            b"CONNECT a:1 HTTP/1.1\r\nnot a header\r\n\r\n",
            b"CONNECT a:1 HTTP/1.1\r\nHost: a:1\r\n",
            b"CONNECT a:1 HTTP/1.1",
        ];
        for input in cases {
            let err = parse(input).await.unwrap_err();
            assert!(matches!(err, TunnelError::InvalidRequest(_)), "{:?}", input);
        }
    }

    #[tokio::test]
    async fn test_read_request_head_limits() {
        let long_line = format!("CONNECT {} HTTP/1.1\r\n\r\n", "a".repeat(MAX_LINE_LEN));
        assert!(matches!(
            parse(long_line.as_bytes()).await.unwrap_err(),
            TunnelError::InvalidRequest(_)
        ));

        let mut many = String::from("CONNECT a:1 HTTP/1.1\r\n");
        for i in 0..=MAX_HEADERS {
            many.push_str(&format!("X-{}: v\r\n", i));
        }
        many.push_str("\r\n");
        assert!(matches!(
            parse(many.as_bytes()).await.unwrap_err(),
            TunnelError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_server_tunnels_connect() {
        let dest_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest_addr = dest_listener.local_addr().unwrap();
        let addr = start_server(TunnelConfig::direct()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\nearly", dest_addr);
        client.write_all(request.as_bytes()).await.unwrap();

        let (mut dest, _) = dest_listener.accept().await.unwrap();

        let expected = b"HTTP/1.1 200 Connection established\r\n\r\n";
        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, expected);

        // Bytes pipelined behind the request head are relayed first.
        let mut buf = [0u8; 5];
        dest.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");

        dest.write_all(b"reply").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reply");

        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        dest.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        drop(dest);

        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_server_rejects_other_methods() {
        let addr = start_server(TunnelConfig::direct()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    }

    #[tokio::test]
    async fn test_server_answers_bad_request() {
        let addr = start_server(TunnelConfig::direct()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"garbage\r\n\r\n").await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
