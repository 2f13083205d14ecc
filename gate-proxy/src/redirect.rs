//! HTTP to HTTPS automatic redirect server
//!
//! 🔄 Answers every plain HTTP request with a permanent redirect to the same
//! host and path over HTTPS.

use http::StatusCode;
use http::uri::Authority;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Largest request head that is read
const MAX_HEAD: usize = 8 * 1024;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP→HTTPS redirect server
#[derive(Debug, Clone)]
pub struct RedirectServer {
    /// Port of the TLS listener, announced when the request named a port
    tls_port: u16,
}

impl RedirectServer {
    pub fn new(tls_port: u16) -> Self {
        Self { tls_port }
    }

    /// Serve redirects until `shutdown` is cancelled
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("🔄 HTTP→HTTPS redirect server listening on http://{}", addr);
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _peer)) => {
                        let tls_port = self.tls_port;
                        tokio::spawn(async move {
                            if let Err(e) = handle(stream, tls_port).await {
                                tracing::trace!("Redirect connection failed: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept redirect connection: {}", e);
                    }
                },
            }
        }
    }
}

async fn handle(mut stream: TcpStream, tls_port: u16) -> std::io::Result<()> {
    let mut buf = vec![0u8; MAX_HEAD];
    let mut len = 0;

    while len < buf.len() && !buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
        let n = match timeout(READ_TIMEOUT, stream.read(&mut buf[len..])).await {
            Ok(result) => result?,
            Err(_) => return Ok(()),
        };
        if n == 0 {
            break;
        }
        len += n;
    }
    if len == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..len]);
    let mut lines = request.lines();

    let path = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/");

    let host = lines
        .take_while(|l| !l.is_empty())
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.trim().eq_ignore_ascii_case("host").then(|| value.trim())
        })
        .filter(|h| !h.is_empty());

    let response = match host {
        Some(host) => response(
            StatusCode::MOVED_PERMANENTLY,
            Some(&redirect_location(host, path, tls_port)),
        ),
        None => response(StatusCode::BAD_REQUEST, None),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn response(status: StatusCode, location: Option<&str>) -> String {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    if let Some(location) = location {
        head.push_str(&format!("Location: {}\r\n", location));
    }
    head.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
    head
}

/// HTTPS URL for a request to `host` and `path`.
///
/// A port in `host` is replaced by the TLS port; without one the URL carries
/// no port either.
pub fn redirect_location(host: &str, path: &str, tls_port: u16) -> String {
    match host.parse::<Authority>() {
        Ok(authority) if authority.port_u16().is_some() => {
            format!("https://{}:{}{}", authority.host(), tls_port, path)
        }
        _ => format!("https://{}{}", host, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_location() {
        assert_eq!(redirect_location("test.com", "/a?b=1", 443), "https://test.com/a?b=1");
        assert_eq!(redirect_location("test.com", "/", 8443), "https://test.com/");
        assert_eq!(redirect_location("test.com:8080", "/x", 8443), "https://test.com:8443/x");
        assert_eq!(redirect_location("[::1]:80", "/", 443), "https://[::1]:443/");
    }

    #[tokio::test]
    async fn test_redirect_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(RedirectServer::new(8443).serve(listener, shutdown.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /login?next=%2F HTTP/1.1\r\nHost: svc.test.com:8080\r\nAccept: */*\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(response.contains("Location: https://svc.test.com:8443/login?next=%2F\r\n"));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        shutdown.cancel();
        server.await.unwrap();
    }
}
