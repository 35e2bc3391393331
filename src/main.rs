//! pgtwixt: transparent Postgres wire-protocol proxy

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use pgtwixt::connection::Connector;
use pgtwixt::conninfo::ConnectionString;
use pgtwixt::metrics::{MetricsSink, Recorder};
use pgtwixt::proxy::Gateway;
use pgtwixt::server::{Backoff, Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pgtwixt")]
#[command(about = "Transparent intercepting proxy for the Postgres wire protocol")]
struct Args {
    /// Address to accept frontend connections on
    listen: SocketAddr,

    /// Address to serve Prometheus metrics on
    metrics: SocketAddr,

    /// Backend connection string, e.g. "host=/var/run/postgresql port=5432"
    target: String,

    /// PEM certificate chain offered to frontends that request TLS
    #[arg(long, env = "PGTWIXT_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<String>,

    /// PEM private key for --tls-cert
    #[arg(long, env = "PGTWIXT_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<String>,

    /// Delay before accepting again after a transient accept error
    #[arg(long, default_value = "5")]
    accept_backoff_ms: u64,

    /// Double the accept backoff on repeated errors, up to this bound
    #[arg(long)]
    accept_backoff_max_ms: Option<u64>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let target = ConnectionString::parse(&args.target).context("invalid target")?;
    let connector = Connector::from_connection_string(&target).context("invalid target")?;

    PrometheusBuilder::new()
        .with_http_listener(args.metrics)
        .install()
        .context("failed to start metrics exporter")?;
    let metrics: Arc<dyn MetricsSink> = Arc::new(Recorder::new(
        args.listen.to_string(),
        connector.dialer().address(),
    ));

    let initial = Duration::from_millis(args.accept_backoff_ms);
    let backoff = match args.accept_backoff_max_ms {
        Some(max) => Backoff::Exponential {
            initial,
            max: Duration::from_millis(max),
        },
        None => Backoff::Fixed(initial),
    };
    let mut config = ServerConfig::builder().backoff(backoff);
    if let (Some(cert), Some(key)) = (&args.tls_cert, &args.tls_key) {
        config = config
            .tls_pem_files(cert, key)
            .context("failed to load frontend TLS certificate")?;
    }

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to listen on {}", args.listen))?;

    info!(
        listen = %args.listen,
        metrics = %args.metrics,
        target = %target,
        backend = %connector.dialer().address(),
        "pgtwixt started"
    );

    let server = Server::new(Gateway::new(connector, metrics.clone()), config.build())
        .with_metrics(metrics);

    tokio::select! {
        served = server.serve(listener) => served.context("accept loop failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
        }
    }

    Ok(())
}
