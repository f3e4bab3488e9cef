//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use linerpc_protocol::{encode_line, Request, Response, DELIMITER};
use serde_json::{Map, Value};
use std::net::SocketAddr;

/// linerpc client.
///
/// Cheap to clone; holds only configuration. Each call uses its own
/// connection, so calls from clones run fully in parallel.
#[derive(Debug, Clone)]
pub struct Client {
    config: ConnectionConfig,
}

impl Client {
    /// Creates a client with default settings.
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_config(ConnectionConfig::new(addr))
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Calls `func_name` and returns its result.
    ///
    /// An `error` response becomes [`ClientError::Remote`].
    pub async fn call(
        &self,
        func_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let request = Request {
            func_name: func_name.to_string(),
            args,
            kwargs,
        };
        self.send(&request)
            .await?
            .into_result()
            .map_err(ClientError::Remote)
    }

    /// Sends a request and returns the response frame as received.
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let payload = encode_line(request)?;
        tracing::debug!("Calling {} on {}", request.func_name, self.config.addr);
        self.exchange(&payload).await
    }

    /// Sends an arbitrary line, appending the delimiter if missing.
    pub async fn send_raw(&self, line: &str) -> Result<Response, ClientError> {
        let mut payload = line.as_bytes().to_vec();
        if payload.last() != Some(&DELIMITER) {
            payload.push(DELIMITER);
        }
        self.exchange(&payload).await
    }

    async fn exchange(&self, payload: &[u8]) -> Result<Response, ClientError> {
        let connection = Connection::open(self.config.clone()).await?;
        connection.request(payload).await
    }
}
