use http::StatusCode;

use super::Headers;

/// The only method this endpoint tunnels.
pub const CONNECT_METHOD: &str = "CONNECT";

/// Reply sent to the client once a direct tunnel is open.
pub fn connection_established(protocol: &str) -> Vec<u8> {
    format!("{} 200 Connection established\r\n\r\n", protocol).into_bytes()
}

/// Request head forwarded to an upstream proxy.
///
/// `METHOD SP TARGET SP PROTOCOL CRLF`, then each header line in order,
/// then a bare CRLF.
pub fn request_head(method: &str, target: &str, protocol: &str, headers: &Headers) -> Vec<u8> {
    let mut buf = format!("{} {} {}\r\n", method, target, protocol).into_bytes();
    headers.encode_into(&mut buf);
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Short plain-text error response.
pub fn error_response(protocol: &str, status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{}\n", message);
    format!(
        "{} {} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        protocol,
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error"),
        body.len(),
        body
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_established_is_exact() {
        assert_eq!(
            connection_established("HTTP/1.1"),
            b"HTTP/1.1 200 Connection established\r\n\r\n"
        );
        assert_eq!(
            connection_established("HTTP/1.0"),
            b"HTTP/1.0 200 Connection established\r\n\r\n"
        );
    }

    #[test]
    fn test_request_head_without_headers() {
        let head = request_head("CONNECT", "example.com:443", "HTTP/1.1", &Headers::new());
        assert_eq!(head, b"CONNECT example.com:443 HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_request_head_keeps_header_order() {
        let mut headers = Headers::new();
        headers.add("Host", "example.com:443");
        headers.add("Proxy-Authorization", "Basic xyz");

        let head = request_head("CONNECT", "example.com:443", "HTTP/1.1", &headers);
        assert_eq!(
            String::from_utf8(head).unwrap(),
            "CONNECT example.com:443 HTTP/1.1\r\n\
             Host: example.com:443\r\n\
             Proxy-Authorization: Basic xyz\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_error_response_has_matching_length() {
        let response = error_response(
            "HTTP/1.1",
            StatusCode::BAD_GATEWAY,
            "Tunnel connection failure",
        );
        let text = String::from_utf8(response).unwrap();

        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert_eq!(body, "Tunnel connection failure\n");
    }
}
