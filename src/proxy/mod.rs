//! Proxy sessions
//!
//! A [`Proxy`] opens a backend session for a frontend that completed its
//! startup handshake, then forwards frames in both directions until either
//! side is done. [`Gateway`] plugs a proxy into the server as its
//! [`Handler`].

mod pump;

use crate::connection::{Connector, Transport};
use crate::metrics::{MetricsSink, NoopMetrics, Side};
use crate::protocol::{CancelKey, StartupParams};
use crate::server::Handler;
use crate::stream::{FrontendStream, Stream};
use crate::Result;
use pump::pump;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Bound on flushing and shutting down both sides once a session ends.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens backend sessions
pub trait Startup: Send + Sync {
    /// Backend transport
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a backend session for a frontend that sent `params`.
    fn startup(
        &self,
        params: &StartupParams,
    ) -> impl Future<Output = Result<Stream<Self::Io>>> + Send;
}

impl Startup for Connector {
    type Io = Transport;

    fn startup(
        &self,
        params: &StartupParams,
    ) -> impl Future<Output = Result<Stream<Transport>>> + Send {
        Connector::startup(self, params)
    }
}

/// Bidirectional frame pump between a frontend and a backend
pub struct Proxy<S> {
    startup: S,
    metrics: Arc<dyn MetricsSink>,
}

impl<S: Startup> Proxy<S> {
    /// Create a proxy that reports no metrics
    pub fn new(startup: S) -> Self {
        Self {
            startup,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Report backend sessions to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// How backend sessions are opened
    pub fn startup(&self) -> &S {
        &self.startup
    }

    /// Run one session to completion.
    ///
    /// Returns once either direction ends; both streams are closed by then.
    /// A peer hanging up counts as success.
    pub async fn run<F>(&self, frontend: Stream<F>, params: &StartupParams) -> Result<()>
    where
        F: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let backend = match self.startup.startup(params).await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(
                    phase = "startup",
                    category = e.category(),
                    error = %e,
                    "error connecting to backend"
                );
                let _ = frontend.close().await;
                return Err(e);
            }
        };

        self.metrics.connect(Side::Backend);
        let result = forward(frontend, backend).await;
        self.metrics.disconnect(Side::Backend);

        if let Err(e) = &result {
            tracing::info!(
                phase = "proxy",
                category = e.category(),
                error = %e,
                "error while proxying"
            );
        }
        result
    }
}

async fn forward<F, B>(frontend: Stream<F>, backend: Stream<B>) -> Result<()>
where
    F: AsyncRead + AsyncWrite + Unpin + Send,
    B: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut from_frontend, mut to_frontend) = frontend.into_split();
    let (mut from_backend, mut to_backend) = backend.into_split();

    // The direction still running is dropped mid-frame; its stream is closed
    // right after, so nothing else will read or write it.
    let result = tokio::select! {
        r = pump(&mut from_backend, &mut to_frontend) => r,
        r = pump(&mut from_frontend, &mut to_backend) => r,
    };

    let closing = async {
        let (frontend, backend) = tokio::join!(to_frontend.close(), to_backend.close());
        for closed in [frontend, backend] {
            if let Err(e) = closed {
                tracing::debug!(error = %e, "error closing stream");
            }
        }
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
        tracing::debug!("timed out closing streams");
    }
    result
}

impl<S> std::fmt::Debug for Proxy<S>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("startup", &self.startup)
            .finish_non_exhaustive()
    }
}

/// Server handler that proxies sessions to, and forwards cancel requests to,
/// the backend reached through a [`Connector`].
#[derive(Debug)]
pub struct Gateway {
    proxy: Proxy<Connector>,
}

impl Gateway {
    /// Create a gateway reporting backend sessions to `metrics`
    pub fn new(connector: Connector, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            proxy: Proxy::new(connector).with_metrics(metrics),
        }
    }
}

impl Handler for Gateway {
    async fn session(&self, stream: FrontendStream, params: StartupParams) {
        let _ = self.proxy.run(stream, &params).await;
    }

    async fn cancel(&self, key: CancelKey) {
        if let Err(e) = self.proxy.startup().cancel(key).await {
            tracing::warn!(
                phase = "cancel",
                address = %self.proxy.startup().dialer().address(),
                error = %e,
                "error forwarding cancel request"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::CountingMetrics;
    use crate::protocol::constants::tags;
    use crate::protocol::Frame;
    use crate::Error;
    use tokio::io::{duplex, DuplexStream};
    use tokio::sync::Mutex;

    fn query(text: &str) -> Frame {
        let mut body = text.as_bytes().to_vec();
        body.push(0);
        Frame::typed(tags::QUERY, body)
    }

    /// Hands out one prepared in-memory backend
    struct Prepared(Mutex<Option<DuplexStream>>);

    impl Startup for Prepared {
        type Io = DuplexStream;

        async fn startup(&self, _params: &StartupParams) -> Result<Stream<DuplexStream>> {
            self.0
                .lock()
                .await
                .take()
                .map(Stream::backend)
                .ok_or(Error::ConnectionClosed)
        }
    }

    struct Unreachable;

    impl Startup for Unreachable {
        type Io = DuplexStream;

        async fn startup(&self, _params: &StartupParams) -> Result<Stream<DuplexStream>> {
            Err(Error::Network {
                address: "127.0.0.1:1".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            })
        }
    }

    fn session() -> (
        Proxy<Prepared>,
        Stream<DuplexStream>,
        Stream<DuplexStream>,
        Stream<DuplexStream>,
    ) {
        let (client, frontend) = duplex(64 * 1024);
        let (backend, server) = duplex(64 * 1024);
        let proxy = Proxy::new(Prepared(Mutex::new(Some(backend))));
        (
            proxy,
            Stream::backend(client),
            Stream::backend(frontend),
            Stream::backend(server),
        )
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways_in_order() {
        let (proxy, mut client, frontend, mut server) = session();
        let run = tokio::spawn(async move { proxy.run(frontend, &StartupParams::new()).await });

        for i in 0..5 {
            client.send(&query(&format!("f{}", i))).await.unwrap();
        }
        client.flush().await.unwrap();
        for i in 0..3 {
            server.send(&query(&format!("b{}", i))).await.unwrap();
        }
        server.flush().await.unwrap();

        for i in 0..5 {
            assert_eq!(server.next().await.unwrap(), query(&format!("f{}", i)));
        }
        for i in 0..3 {
            assert_eq!(client.next().await.unwrap(), query(&format!("b{}", i)));
        }

        client.close().await.unwrap();
        run.await.unwrap().unwrap();
        assert!(matches!(server.next().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_backend_hangup_ends_session() {
        let (proxy, mut client, frontend, server) = session();
        let run = tokio::spawn(async move { proxy.run(frontend, &StartupParams::new()).await });

        server.close().await.unwrap();
        run.await.unwrap().unwrap();
        assert!(matches!(client.next().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_terminate_is_forwarded() {
        let (proxy, mut client, frontend, mut server) = session();
        let run = tokio::spawn(async move { proxy.run(frontend, &StartupParams::new()).await });

        client
            .send(&Frame::typed(tags::TERMINATE, Vec::new()))
            .await
            .unwrap();
        client.flush().await.unwrap();
        assert!(server.next().await.unwrap().is_terminate());

        server.close().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_startup_failure_closes_frontend() {
        let (client, frontend) = duplex(1024);
        let proxy = Proxy::new(Unreachable);
        let metrics = Arc::new(CountingMetrics::default());
        let proxy = proxy.with_metrics(metrics.clone());

        let err = proxy
            .run(Stream::frontend(frontend), &StartupParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network { .. }));

        let mut client = Stream::backend(client);
        assert!(matches!(client.next().await, Err(Error::ConnectionClosed)));
        assert_eq!(metrics.connects(Side::Backend), 0);
    }

    #[tokio::test]
    async fn test_backend_metrics_balance() {
        let (proxy, client, frontend, _server) = session();
        let metrics = Arc::new(CountingMetrics::default());
        let proxy = proxy.with_metrics(metrics.clone());

        client.close().await.unwrap();
        proxy.run(frontend, &StartupParams::new()).await.unwrap();

        assert_eq!(metrics.connects(Side::Backend), 1);
        assert_eq!(metrics.disconnects(Side::Backend), 1);
        assert_eq!(metrics.open(Side::Backend), 0);
    }
}
