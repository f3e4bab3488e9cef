//! TCP server implementation.

use crate::config::{NetworkConfig, DEFAULT_READ_BUFFER_SIZE};
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::echo;
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::static_files::StaticFiles;
use linerpc_protocol::{encode_line, LineDecoder, Response};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, linerpc_protocol::DEFAULT_PORT)),
            max_connections: 1000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds a server configuration from the `network` config section.
    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            max_connections: network.max_connections,
            read_buffer_size: network.read_buffer_size,
            metrics: None,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    /// RPC frames decoded.
    pub requests_total: AtomicU64,
    /// Connection-level failures plus error responses sent.
    pub errors_total: AtomicU64,
    /// Dispatches abandoned because their connection closed first.
    pub responses_dropped: AtomicU64,
}

/// What the listener speaks on each accepted connection.
#[derive(Clone)]
pub enum Service {
    /// Line-delimited JSON RPC.
    Rpc(Arc<Dispatcher>),
    /// Echo the first chunk back.
    Echo,
    /// Serve files over HTTP/1.1.
    StaticFiles(Arc<StaticFiles>),
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::Rpc(_) => "rpc",
            Service::Echo => "echo",
            Service::StaticFiles(_) => "static",
        }
    }
}

/// TCP server for linerpc.
pub struct Server {
    config: ServerConfig,
    service: Service,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, service: Service) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            service,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            "Server listening on {} ({})",
            listener.local_addr()?,
            self.service.name()
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let service = self.service.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = tokio::select! {
                                    result = Self::handle_connection(
                                        tcp_stream, addr, &service, &config, &stats,
                                    ) => result,
                                    _ = conn_shutdown.recv() => {
                                        tracing::debug!("[{}] Shutdown signal received", addr);
                                        Err(ServerError::ShuttingDown)
                                    }
                                };

                                match result {
                                    Err(e) if e.is_disconnect() => {
                                        tracing::debug!("Connection {} ended: {}", addr, e);
                                    }
                                    Err(e) => {
                                        tracing::warn!("Connection {} error: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Ok(()) => {}
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                                if let Some(ref metrics) = config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        service: &Service,
        config: &ServerConfig,
        stats: &ServerStats,
    ) -> Result<(), ServerError> {
        tracing::info!("Client connected: {}", addr);

        match service {
            Service::Rpc(dispatcher) => {
                Self::handle_rpc(
                    stream,
                    addr,
                    dispatcher.clone(),
                    config.read_buffer_size,
                    stats,
                    config.metrics.as_deref(),
                )
                .await
            }
            Service::Echo => {
                echo::serve(&mut stream, config.read_buffer_size).await?;
                Ok(())
            }
            Service::StaticFiles(files) => files.serve(stream).await,
        }
    }

    /// Runs the RPC exchange on one connection.
    ///
    /// Every decoded frame is dispatched as its own task as soon as it is
    /// read. The first dispatch to finish has its response written, then the
    /// connection is closed and the remaining dispatches are abandoned. If
    /// the peer closes first, nothing is written.
    pub(crate) async fn handle_rpc<S>(
        stream: S,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        read_buffer_size: usize,
        stats: &ServerStats,
        metrics: Option<&Metrics>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let mut conn = Connection::new(addr);
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut decoder = LineDecoder::new();
        let mut buf = vec![0u8; read_buffer_size.max(1)];
        let mut in_flight: JoinSet<Response> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                Some(joined) = in_flight.join_next() => {
                    let response = joined.unwrap_or_else(|e| {
                        tracing::error!("[{}] Dispatch task failed: {}", addr, e);
                        Response::error(format!("internal error: {}", e))
                    });
                    if response.is_error() {
                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                    }

                    Self::abandon(&conn, &in_flight, stats, metrics);

                    let bytes = encode_line(&response)?;
                    tracing::debug!("[{}] Sending {} bytes", addr, bytes.len());
                    writer.write_all(&bytes).await?;
                    writer.shutdown().await?;
                    conn.responded();
                    conn.close();
                    tracing::debug!(
                        "[{}] {} responded after {:?}",
                        addr,
                        conn.id,
                        conn.age()
                    );
                    return Ok(());
                }

                result = reader.read(&mut buf) => {
                    let n = result?;
                    if n == 0 {
                        tracing::debug!("[{}] Connection closed by client", addr);
                        Self::abandon(&conn, &in_flight, stats, metrics);
                        conn.close();
                        return Ok(());
                    }

                    tracing::debug!("[{}] Received {} bytes", addr, n);
                    decoder.extend(&buf[..n]);

                    for frame in decoder.frames() {
                        conn.frame_received();
                        stats.requests_total.fetch_add(1, Ordering::Relaxed);

                        let dispatcher = dispatcher.clone();
                        match frame {
                            Ok(line) => {
                                tracing::info!("[{}] Request: {}", addr, line);
                                in_flight.spawn(async move {
                                    dispatcher.dispatch_line(&line).await
                                });
                            }
                            Err(e) => {
                                let response = dispatcher.reject(e);
                                in_flight.spawn(async move { response });
                            }
                        }
                    }
                }
            }
        }
    }

    /// Accounts for dispatches left running when a connection ends. They are
    /// aborted when the `JoinSet` drops.
    fn abandon(
        conn: &Connection,
        in_flight: &JoinSet<Response>,
        stats: &ServerStats,
        metrics: Option<&Metrics>,
    ) {
        let dropped = in_flight.len();
        if dropped == 0 {
            return;
        }
        tracing::debug!(
            "[{}] Dropping {} unanswered request(s) of {}",
            conn.peer,
            dropped,
            conn.frames_received()
        );
        stats
            .responses_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        if let Some(metrics) = metrics {
            metrics.responses_dropped_total.inc_by(dropped as f64);
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns a receiver notified on shutdown.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Args, CallError, FunctionRegistry};
    use linerpc_client::Client;
    use serde_json::{json, Map, Value};
    use std::time::{Duration, Instant};
    use tokio::io::AsyncBufReadExt;

    fn test_dispatcher() -> Arc<Dispatcher> {
        let mut registry = FunctionRegistry::with_builtins();
        registry.register_async("ping", |_: Args| async { Ok(json!("pong")) });
        registry.register_blocking("boom", |_| Err(CallError::failed("boom failed")));
        Arc::new(Dispatcher::new(Arc::new(registry)))
    }

    async fn start(service: Service) -> (Arc<Server>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(ServerConfig::new(addr), service));

        let handle = server.clone();
        tokio::spawn(async move { handle.serve(listener).await });
        (server, addr)
    }

    async fn start_rpc() -> (Arc<Server>, SocketAddr) {
        start(Service::Rpc(test_dispatcher())).await
    }

    /// Sends raw bytes and returns everything the server writes before EOF.
    async fn raw_exchange(addr: SocketAddr, payload: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        let mut response = String::new();
        tokio::time::timeout(Duration::from_secs(10), stream.read_to_string(&mut response))
            .await
            .unwrap()
            .unwrap();
        response
    }

    #[tokio::test]
    async fn test_server_config_defaults() {
        let server = Server::new(ServerConfig::default(), Service::Echo);
        assert!(!server.is_running());
        assert_eq!(server.config().bind_addr.port(), 8080);
        assert!(!server.config().metrics_enabled());
    }

    #[tokio::test]
    async fn test_add_then_close() {
        let (_server, addr) = start_rpc().await;
        let response = raw_exchange(addr, b"{\"func_name\": \"add\", \"args\": [2, 3]}\n").await;
        assert_eq!(response, "{\"result\":5}\n");
    }

    #[tokio::test]
    async fn test_client_calls() {
        let (_server, addr) = start_rpc().await;
        let client = Client::new(addr);

        let value = client
            .call("upper", vec![json!("hello, world!")], Map::new())
            .await
            .unwrap();
        assert_eq!(value, json!("HELLO, WORLD!"));

        let value = client.call("ping", vec![], Map::new()).await.unwrap();
        assert_eq!(value, json!("pong"));

        let value = client.call("sleep", vec![json!(0)], Map::new()).await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let (_server, addr) = start_rpc().await;
        let response = raw_exchange(addr, b"{\"func_name\": \"nope\"}\n").await;
        assert_eq!(response, "{\"error\":\"unknown function 'nope'\"}\n");
    }

    #[tokio::test]
    async fn test_function_error() {
        let (_server, addr) = start_rpc().await;
        let response = raw_exchange(addr, b"{\"func_name\": \"boom\"}\n").await;
        assert_eq!(response, "{\"error\":\"boom failed\"}\n");
    }

    #[tokio::test]
    async fn test_invalid_json_keeps_server_alive() {
        let (server, addr) = start_rpc().await;

        let response = raw_exchange(addr, b"this is not json\n").await;
        let parsed: Response = serde_json::from_str(response.trim_end()).unwrap();
        assert!(parsed.is_error());

        let response = raw_exchange(addr, b"{\"func_name\": \"add\", \"args\": [1, 1]}\n").await;
        assert_eq!(response, "{\"result\":2}\n");
        assert!(server.stats().errors_total.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_frame() {
        let (_server, addr) = start_rpc().await;
        let response = raw_exchange(addr, b"\xff\xfe\n").await;
        assert_eq!(response, "{\"error\":\"bad request: invalid UTF-8 in frame\"}\n");
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let (_server, addr) = start_rpc().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"{\"func_name\": \"up").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.write_all(b"per\", \"args\": [\"abc\"]}\r\n").await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "{\"result\":\"ABC\"}\n");
    }

    #[tokio::test]
    async fn test_blank_lines_ignored() {
        let (_server, addr) = start_rpc().await;
        let response = raw_exchange(
            addr,
            b"\n   \n{\"func_name\": \"add\", \"kwargs\": {\"a\": 1, \"b\": 2}}\n",
        )
        .await;
        assert_eq!(response, "{\"result\":3}\n");
    }

    #[tokio::test]
    async fn test_pipelined_requests_get_one_response() {
        let (server, addr) = start_rpc().await;
        let response = raw_exchange(
            addr,
            b"{\"func_name\": \"add\", \"args\": [2, 3]}\n{\"func_name\": \"upper\", \"args\": [\"x\"]}\n",
        )
        .await;

        assert_eq!(response.matches('\n').count(), 1);
        assert!(response == "{\"result\":5}\n" || response == "{\"result\":\"X\"}\n");
        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_first_finished_response_wins() {
        let (server, addr) = start_rpc().await;
        let response = raw_exchange(
            addr,
            b"{\"func_name\": \"sleep\", \"args\": [1]}\n{\"func_name\": \"add\", \"args\": [2, 3]}\n",
        )
        .await;

        assert_eq!(response, "{\"result\":5}\n");
        assert_eq!(server.stats().responses_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_peer_close_writes_nothing() {
        let (server, addr) = start_rpc().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"{\"func_name\": \"sleep\", \"args\": [0.3]}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());

        // Give the connection task time to record the close
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.stats().connections_active.load(Ordering::Relaxed), 0);
        assert_eq!(server.stats().responses_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sleeps_overlap() {
        let (_server, addr) = start_rpc().await;
        let client = Client::new(addr);

        let start = Instant::now();
        let calls = (0..4).map(|_| {
            let client = client.clone();
            async move { client.call("sleep", vec![json!(0.5)], Map::new()).await }
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            assert_eq!(result.unwrap(), Value::Null);
        }
        assert!(
            start.elapsed() < Duration::from_millis(1500),
            "sleeps ran serially: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_fast_call_not_blocked_by_sleep() {
        let (_server, addr) = start_rpc().await;
        let client = Client::new(addr);

        let slow = {
            let client = client.clone();
            tokio::spawn(async move { client.call("sleep", vec![json!(1)], Map::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        let value = client
            .call("add", vec![json!(2), json!(3)], Map::new())
            .await
            .unwrap();
        assert_eq!(value, json!(5));
        assert!(start.elapsed() < Duration::from_millis(500));

        assert_eq!(slow.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_echo_service() {
        let (_server, addr) = start(Service::Echo).await;
        let response = raw_exchange(addr, b"hello there\n").await;
        assert_eq!(response, "hello there\n");
    }

    #[tokio::test]
    async fn test_static_service() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), b"<p>ok</p>").unwrap();
        let files = Arc::new(StaticFiles::new(dir.path()));
        let (_server, addr) = start(Service::StaticFiles(files)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut reader = tokio::io::BufReader::new(stream);
        let mut status_line = String::new();
        reader.read_line(&mut status_line).await.unwrap();
        assert_eq!(status_line, "HTTP/1.1 200 OK\r\n");
    }

    #[tokio::test]
    async fn test_malformed_http_counts_as_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let files = Arc::new(StaticFiles::new(dir.path()));
        let (server, addr) = start(Service::StaticFiles(files)).await;

        let response = raw_exchange(addr, b"garbage\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.stats().errors_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections_without_errors() {
        let (server, addr) = start_rpc().await;
        let mut held = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.stats().connections_active.load(Ordering::Relaxed), 1);

        server.shutdown();
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), held.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf.is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.stats().connections_active.load(Ordering::Relaxed), 0);
        assert_eq!(server.stats().errors_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig::new(addr).with_max_connections(1);
        let server = Arc::new(Server::new(config, Service::Rpc(test_dispatcher())));
        let handle = server.clone();
        tokio::spawn(async move { handle.serve(listener).await });

        // Hold one connection open
        let _held = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The second is accepted and immediately dropped
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), second.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(server.stats().connections_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(Server::new(
            ServerConfig::new(listener.local_addr().unwrap()),
            Service::Echo,
        ));
        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.is_running());

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_handle_rpc_over_duplex() {
        let (mut client, server_side) = tokio::io::duplex(1024);
        let stats = ServerStats::default();
        let metrics = Metrics::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        client
            .write_all(b"{\"func_name\": \"upper\", \"args\": [\"duplex\"]}\n")
            .await
            .unwrap();
        Server::handle_rpc(server_side, addr, test_dispatcher(), 64, &stats, Some(&metrics))
            .await
            .unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "{\"result\":\"DUPLEX\"}\n");
        assert_eq!(stats.requests_total.load(Ordering::Relaxed), 1);
    }
}
