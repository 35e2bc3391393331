//! Frontend server
//!
//! [`Server::serve`] accepts client connections, runs each one's handshake in
//! its own task and hands the outcome to a [`Handler`]:
//!
//! * SSLRequest: answered with `S` (and upgraded to TLS) when the server has a
//!   TLS acceptor, `N` otherwise
//! * StartupMessage: [`Handler::session`] receives the stream and parameters
//! * CancelRequest: [`Handler::cancel`] receives the key, then the connection
//!   is closed
//!
//! A failing connection never affects the others or the accept loop.

mod config;
mod handshake;
mod state;
pub mod tls;

pub use config::{Backoff, ServerConfig, ServerConfigBuilder};
pub use state::HandshakeState;

use crate::metrics::{MetricsSink, NoopMetrics, Side};
use crate::protocol::{CancelKey, StartupParams};
use crate::stream::{BoxedIo, FrontendStream};
use crate::{Error, Result};
use handshake::handshake;
use nix::errno::Errno;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::Instrument;

/// Receives frontends that completed the handshake
pub trait Handler: Send + Sync + 'static {
    /// Serve a session. The handler owns the stream and must close it.
    fn session(
        &self,
        stream: FrontendStream,
        params: StartupParams,
    ) -> impl Future<Output = ()> + Send;

    /// Forward a cancel request. The frontend connection is closed afterwards.
    fn cancel(&self, key: CancelKey) -> impl Future<Output = ()> + Send;
}

/// Accepts frontend connections
pub struct Server<H> {
    handler: Arc<H>,
    config: ServerConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<H: Handler> Server<H> {
    /// Create a server that reports no metrics
    pub fn new(handler: H, config: ServerConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Report frontend connections to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The session and cancel handler
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Accept connections until the listener fails.
    ///
    /// Transient accept errors are retried after the configured backoff;
    /// anything else is returned.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut failures = 0u32;
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => {
                    failures = 0;
                    accepted
                }
                Err(e) if is_transient(&e) => {
                    let delay = self.config.backoff.delay(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient accept error"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            };

            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
            }

            let handler = Arc::clone(&self.handler);
            let metrics = Arc::clone(&self.metrics);
            let tls = self.config.tls.clone();
            tokio::spawn(
                async move {
                    tracing::debug!("accepted connection");
                    metrics.connect(Side::Frontend);
                    let io: BoxedIo = Box::new(socket);
                    if let Err(e) = handshake(io, tls.as_ref(), handler.as_ref()).await {
                        if !e.is_clean_close() {
                            tracing::info!(
                                phase = "handshake",
                                category = e.category(),
                                error = %e,
                                "error during handshake"
                            );
                        }
                    }
                    metrics.disconnect(Side::Frontend);
                }
                .instrument(tracing::info_span!("client", %peer)),
            );
        }
    }
}

impl<H> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Accept errors worth retrying: aborted handshakes and resource exhaustion.
fn is_transient(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }
    matches!(
        e.raw_os_error().map(Errno::from_raw),
        Some(Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::CountingMetrics;
    use crate::protocol::message::ssl_request;
    use crate::protocol::StartupMessage;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    struct Forwarding {
        sessions: mpsc::UnboundedSender<StartupParams>,
        cancels: mpsc::UnboundedSender<CancelKey>,
    }

    impl Handler for Forwarding {
        async fn session(&self, stream: FrontendStream, params: StartupParams) {
            let _ = self.sessions.send(params);
            let _ = stream.close().await;
        }

        async fn cancel(&self, key: CancelKey) {
            let _ = self.cancels.send(key);
        }
    }

    struct Harness {
        address: std::net::SocketAddr,
        sessions: mpsc::UnboundedReceiver<StartupParams>,
        cancels: mpsc::UnboundedReceiver<CancelKey>,
        metrics: Arc<CountingMetrics>,
    }

    async fn start() -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (session_tx, sessions) = mpsc::unbounded_channel();
        let (cancel_tx, cancels) = mpsc::unbounded_channel();
        let metrics = Arc::new(CountingMetrics::default());

        let server = Server::new(
            Forwarding {
                sessions: session_tx,
                cancels: cancel_tx,
            },
            ServerConfig::default(),
        )
        .with_metrics(metrics.clone());
        tokio::spawn(async move { server.serve(listener).await });

        Harness {
            address,
            sessions,
            cancels,
            metrics,
        }
    }

    fn startup(user: &str) -> Vec<u8> {
        let mut params = StartupParams::new();
        params.insert("user".to_string(), user.to_string());
        StartupMessage::new(params).to_frame().to_bytes().to_vec()
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(Errno::EMFILE as i32)));
        assert!(is_transient(&io::Error::from_raw_os_error(Errno::ENFILE as i32)));
        assert!(!is_transient(&io::Error::from_raw_os_error(Errno::EBADF as i32)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[tokio::test]
    async fn test_startup_reaches_session_handler() {
        let mut harness = start().await;

        let mut client = TcpStream::connect(harness.address).await.unwrap();
        client.write_all(&startup("mary")).await.unwrap();

        let params = harness.sessions.recv().await.unwrap();
        assert_eq!(params["user"], "mary");
    }

    #[tokio::test]
    async fn test_ssl_rejected_then_startup() {
        let mut harness = start().await;

        let mut client = TcpStream::connect(harness.address).await.unwrap();
        client.write_all(&ssl_request().to_bytes()).await.unwrap();
        let mut response = [0u8; 1];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response[0], b'N');

        client.write_all(&startup("alice")).await.unwrap();
        let params = harness.sessions.recv().await.unwrap();
        assert_eq!(params["user"], "alice");
    }

    #[tokio::test]
    async fn test_cancel_closes_connection_without_reply() {
        let mut harness = start().await;
        let key = CancelKey {
            process_id: 2600,
            secret_key: 1957,
        };

        let mut client = TcpStream::connect(harness.address).await.unwrap();
        client.write_all(&key.to_frame().to_bytes()).await.unwrap();

        assert_eq!(harness.cancels.recv().await.unwrap(), key);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_bad_connection_does_not_stop_server() {
        let mut harness = start().await;

        let mut bad = TcpStream::connect(harness.address).await.unwrap();
        bad.write_all(&[0, 0, 0, 8, 1, 2, 3, 4]).await.unwrap();
        let mut rest = Vec::new();
        bad.read_to_end(&mut rest).await.unwrap();

        let mut good = TcpStream::connect(harness.address).await.unwrap();
        good.write_all(&startup("bob")).await.unwrap();
        assert_eq!(harness.sessions.recv().await.unwrap()["user"], "bob");
    }

    #[tokio::test]
    async fn test_frontend_metrics_balance() {
        let mut harness = start().await;

        let mut client = TcpStream::connect(harness.address).await.unwrap();
        client.write_all(&startup("mary")).await.unwrap();
        harness.sessions.recv().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();

        for _ in 0..100 {
            if harness.metrics.disconnects(Side::Frontend) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(harness.metrics.connects(Side::Frontend), 1);
        assert_eq!(harness.metrics.open(Side::Frontend), 0);
    }
}
