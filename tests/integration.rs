//! Integration tests against a live Postgres
//!
//! These tests require a running Postgres instance. The proxy target is read
//! from `PGTWIXT_TEST_TARGET` (a connection string, default
//! `host=localhost port=5432`) and the client credentials from
//! `PGTWIXT_TEST_USER` / `PGTWIXT_TEST_PASSWORD`.
//!
//! Run with: cargo test --test integration -- --ignored

use pgtwixt::connection::Connector;
use pgtwixt::conninfo::ConnectionString;
use pgtwixt::metrics::NoopMetrics;
use pgtwixt::proxy::Gateway;
use pgtwixt::server::{Server, ServerConfig};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_postgres::NoTls;

async fn start_proxy() -> SocketAddr {
    let target = env::var("PGTWIXT_TEST_TARGET")
        .unwrap_or_else(|_| "host=localhost port=5432".to_string());
    let target = ConnectionString::parse(&target).expect("target");
    let connector = Connector::from_connection_string(&target).expect("connector");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("address");
    let server = Server::new(
        Gateway::new(connector, Arc::new(NoopMetrics)),
        ServerConfig::default(),
    );
    tokio::spawn(async move { server.serve(listener).await });
    address
}

fn client_config(proxy: SocketAddr) -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&proxy.ip().to_string())
        .port(proxy.port())
        .user(&env::var("PGTWIXT_TEST_USER").unwrap_or_else(|_| "postgres".to_string()))
        .dbname("postgres");
    if let Ok(password) = env::var("PGTWIXT_TEST_PASSWORD") {
        config.password(password);
    }
    config
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_query_through_proxy() {
    let proxy = start_proxy().await;
    let (client, connection) = client_config(proxy).connect(NoTls).await.expect("connect");
    let connection = tokio::spawn(connection);

    let rows = client.query("SELECT 1::INT4 + $1", &[&41i32]).await.expect("query");
    let value: i32 = rows[0].get(0);
    assert_eq!(value, 42);

    drop(client);
    connection.await.expect("join").expect("connection");
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_cancel_through_proxy() {
    let proxy = start_proxy().await;
    let (client, connection) = client_config(proxy).connect(NoTls).await.expect("connect");
    tokio::spawn(connection);

    let cancel = client.cancel_token();
    let query = tokio::spawn(async move { client.batch_execute("SELECT pg_sleep(30)").await });
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    cancel.cancel_query(NoTls).await.expect("cancel");

    let err = query.await.expect("join").expect_err("query should be canceled");
    assert_eq!(
        err.code(),
        Some(&tokio_postgres::error::SqlState::QUERY_CANCELED)
    );
}
