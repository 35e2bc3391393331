//! Opening backend sessions on behalf of frontends

use super::dialer::{derive_dialers, Dialer};
use crate::conninfo::ConnectionString;
use crate::protocol::{CancelKey, StartupMessage, StartupParams};
use crate::stream::BackendStream;
use crate::{Error, Result};

/// Opens backend sessions and forwards cancel requests through one dialer.
#[derive(Debug, Clone)]
pub struct Connector {
    dialer: Dialer,
}

impl Connector {
    /// Create a connector around a dialer
    pub fn new(dialer: Dialer) -> Self {
        Self { dialer }
    }

    /// Build a connector for the first target of a connection string.
    ///
    /// Additional hosts are not dialed; they are reported in the log.
    pub fn from_connection_string(cs: &ConnectionString) -> Result<Self> {
        let mut dialers = derive_dialers(cs)?.into_iter();
        let dialer = dialers
            .next()
            .ok_or_else(|| Error::Config("connection string names no backend".to_string()))?;
        for ignored in dialers {
            tracing::warn!(address = %ignored.address(), "ignoring additional backend host");
        }
        Ok(Self::new(dialer))
    }

    /// The dialer used for every connection
    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }

    /// Dial the backend and send a StartupMessage carrying `params`.
    pub async fn startup(&self, params: &StartupParams) -> Result<BackendStream> {
        let mut backend = self.dialer.dial().await?;
        let startup = StartupMessage::new(params.clone()).to_frame();

        let sent = async {
            backend.send(&startup).await?;
            backend.flush().await
        }
        .await;
        match sent {
            Ok(()) => Ok(backend),
            Err(e) => {
                let _ = backend.close().await;
                Err(e)
            }
        }
    }

    /// Dial the backend on a fresh connection, send a CancelRequest and hang up.
    pub async fn cancel(&self, key: CancelKey) -> Result<()> {
        let mut backend = self.dialer.dial().await?;
        let sent = async {
            backend.send(&key.to_frame()).await?;
            backend.flush().await
        }
        .await;
        let closed = backend.close().await;
        sent?;
        closed
    }
}
