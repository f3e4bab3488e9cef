//! Connection management.

use crate::error::ClientError;
use linerpc_protocol::{LineDecoder, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Time allowed for the whole exchange once connected. `None` waits
    /// indefinitely, since a remote function may legitimately run long.
    pub request_timeout: Option<Duration>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// A single-use connection to a linerpc server.
pub struct Connection {
    config: ConnectionConfig,
    stream: TcpStream,
}

impl Connection {
    /// Connects to the server.
    pub async fn open(config: ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", config.addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to {}", config.addr);
        Ok(Self { config, stream })
    }

    /// Writes `payload` and waits for the response line.
    ///
    /// Consumes the connection: the server closes it after responding.
    pub async fn request(mut self, payload: &[u8]) -> Result<Response, ClientError> {
        let read_buffer_size = self.config.read_buffer_size;
        let exchange = exchange(&mut self.stream, payload, read_buffer_size);

        match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => exchange.await,
        }
    }
}

/// Writes one request line and reads back the first response line.
///
/// The write side is left open: the server treats a half-close as the peer
/// going away and would drop the request.
pub async fn exchange<S>(
    stream: &mut S,
    payload: &[u8],
    read_buffer_size: usize,
) -> Result<Response, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(payload).await?;
    stream.flush().await?;

    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; read_buffer_size.max(1)];
    loop {
        if let Some(frame) = decoder.decode_frame()? {
            tracing::debug!("Received response: {}", frame);
            return Ok(serde_json::from_str(&frame)?);
        }

        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        decoder.extend(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::io::Builder;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.request_timeout.is_none());
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_read_buffer_clamped() {
        let addr = "127.0.0.1:8080".parse().unwrap();
        let config = ConnectionConfig::new(addr).with_read_buffer_size(1);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new(addr).with_read_buffer_size(usize::MAX);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_exchange() {
        let mut stream = Builder::new()
            .write(b"{\"func_name\":\"add\",\"args\":[2,3]}\n")
            .read(b"{\"result\":5}\n")
            .build();

        let response = exchange(
            &mut stream,
            b"{\"func_name\":\"add\",\"args\":[2,3]}\n",
            1024,
        )
        .await
        .unwrap();
        assert_eq!(response, Response::ok(json!(5)));
    }

    #[tokio::test]
    async fn test_exchange_response_in_pieces() {
        let mut stream = Builder::new()
            .write(b"x\n")
            .read(b"{\"err")
            .read(b"or\":\"nope\"}\r\n")
            .build();

        let response = exchange(&mut stream, b"x\n", 1024).await.unwrap();
        assert_eq!(response, Response::error("nope"));
    }

    #[tokio::test]
    async fn test_exchange_closed_without_response() {
        let mut stream = Builder::new().write(b"x\n").read(b"{\"res").build();
        let err = exchange(&mut stream, b"x\n", 1024).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_exchange_invalid_response() {
        let mut stream = Builder::new().write(b"x\n").read(b"not json\n").build();
        let err = exchange(&mut stream, b"x\n", 1024).await.unwrap_err();
        assert!(matches!(err, ClientError::Json(_)));
    }

    #[tokio::test]
    async fn test_open_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Connection::open(ConnectionConfig::new(addr)).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
