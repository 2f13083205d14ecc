//! Bidirectional byte relay
//!
//! 🔁 Copies bytes between the decrypted client stream and the backend until
//! both directions are drained. End of stream in one direction shuts down the
//! writer of the other side, so half-closed connections keep working.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep_until};

const BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved by a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to backend
    pub upstream: u64,
    /// Backend to client
    pub downstream: u64,
}

/// Relay between `client` and `backend`.
///
/// Fails with [`io::ErrorKind::TimedOut`] once no bytes have moved in either
/// direction for `idle`. A direction that already reached end of stream no
/// longer waits; the first failure ends both directions.
pub async fn relay<C, B>(client: C, backend: B, idle: Duration) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);
    let activity = Activity::new();

    let (upstream, downstream) = tokio::try_join!(
        copy_half(&mut client_read, &mut backend_write, &activity, idle),
        copy_half(&mut backend_read, &mut client_write, &activity, idle),
    )?;

    Ok(RelayStats { upstream, downstream })
}

/// Last time bytes moved in either direction
struct Activity {
    start: Instant,
    /// Milliseconds since `start`
    last: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn deadline(&self, idle: Duration) -> Instant {
        self.start + Duration::from_millis(self.last.load(Ordering::Relaxed)) + idle
    }

    /// Resolves once the connection as a whole has been idle for `idle`
    async fn expired(&self, idle: Duration) {
        loop {
            let deadline = self.deadline(idle);
            if Instant::now() >= deadline {
                return;
            }
            sleep_until(deadline).await;
        }
    }
}

async fn copy_half<R, W>(reader: &mut R, writer: &mut W, activity: &Activity, idle: Duration) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => match read? {
                0 => break,
                n => n,
            },
            _ = activity.expired(idle) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"));
            }
        };

        activity.touch();
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        activity.touch();
        total += n as u64;
    }

    // The peer may already be gone; the data has been delivered either way.
    if let Err(e) = writer.shutdown().await {
        tracing::trace!("Shutdown after end of stream failed: {}", e);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_half_close_propagates() {
        let (client, mut client_peer) = duplex(1024);
        let (backend, mut backend_peer) = duplex(1024);
        let task = tokio::spawn(relay(client, backend, Duration::from_secs(5)));

        client_peer.write_all(b"ping").await.unwrap();
        client_peer.shutdown().await.unwrap();

        // The backend sees the request followed by end of stream...
        let mut request = Vec::new();
        backend_peer.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"ping");

        // ...and can still answer on its own half.
        backend_peer.write_all(b"pong").await.unwrap();
        backend_peer.shutdown().await.unwrap();

        let mut response = Vec::new();
        client_peer.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"pong");

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { upstream: 4, downstream: 4 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let (client, _client_peer) = duplex(1024);
        let (backend, _backend_peer) = duplex(1024);

        let err = relay(client, backend, Duration::from_secs(30)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_way_stream_outlives_idle_timeout() {
        let (client, mut client_peer) = duplex(1024);
        let (backend, mut backend_peer) = duplex(1024);
        let task = tokio::spawn(relay(client, backend, Duration::from_secs(30)));

        client_peer.write_all(b"GET").await.unwrap();
        let mut request = [0u8; 3];
        backend_peer.read_exact(&mut request).await.unwrap();

        // The client stays silent for a minute while the backend keeps streaming.
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            backend_peer.write_all(b"chunk").await.unwrap();
        }
        backend_peer.shutdown().await.unwrap();

        let mut received = Vec::new();
        client_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"chunk".repeat(6));
        assert!(!task.is_finished());

        client_peer.shutdown().await.unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { upstream: 3, downstream: 30 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_after_activity_times_out() {
        let (client, mut client_peer) = duplex(1024);
        let (backend, mut backend_peer) = duplex(1024);
        let start = tokio::time::Instant::now();
        let task = tokio::spawn(relay(client, backend, Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(20)).await;
        client_peer.write_all(b"ping").await.unwrap();
        let mut request = [0u8; 4];
        backend_peer.read_exact(&mut request).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        // The deadline moved with the last transfer.
        assert!(start.elapsed() >= Duration::from_secs(50));
    }
}
