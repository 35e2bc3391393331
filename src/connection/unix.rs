//! Unix socket dialer with optional peer identity check

use super::transport::Transport;
use crate::{Error, Result};
use nix::unistd::{Uid, User};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;

/// Dials a backend over a Unix domain socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixDialer {
    /// Socket path, `<dir>/.s.PGSQL.<port>`
    pub path: PathBuf,
    /// User name the listening process must run as (`requirepeer`)
    pub require_peer: Option<String>,
    /// Bound on connection establishment
    pub connect_timeout: Option<Duration>,
}

impl UnixDialer {
    /// Connect, then check the peer's identity if required.
    pub async fn dial(&self) -> Result<Transport> {
        let connect = UnixStream::connect(&self.path);
        let connected = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                Error::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    self.path.display(),
                    limit
                ))
            })?,
            None => connect.await,
        };
        let stream = connected.map_err(|source| Error::Network {
            address: self.path.display().to_string(),
            source,
        })?;

        if let Some(expected) = &self.require_peer {
            verify_peer(&stream, expected).await?;
        }
        tracing::debug!(path = %self.path.display(), "backend connected");
        Ok(Transport::Unix(stream))
    }
}

async fn verify_peer(stream: &UnixStream, expected: &str) -> Result<()> {
    let uid = stream
        .peer_cred()
        .map_err(|e| Error::Verification(format!("could not get peer credentials: {}", e)))?
        .uid();

    let name = peer_user_name(uid).await?;
    if name != expected {
        return Err(Error::Verification(format!(
            "peer user name {:?} is not {:?}",
            name, expected
        )));
    }
    Ok(())
}

/// Resolve a uid through the user database, which may block on NSS.
async fn peer_user_name(uid: u32) -> Result<String> {
    let user = tokio::task::spawn_blocking(move || User::from_uid(Uid::from_raw(uid)))
        .await
        .map_err(|e| Error::Verification(format!("user lookup for uid {} failed: {}", uid, e)))?
        .map_err(|e| Error::Verification(format!("user lookup for uid {} failed: {}", uid, e)))?;

    user.map(|u| u.name)
        .ok_or_else(|| Error::Verification(format!("peer uid {} has no user name", uid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use tokio::net::UnixListener;

    fn current_user() -> String {
        User::from_uid(Uid::current()).unwrap().unwrap().name
    }

    fn dialer(path: PathBuf, require_peer: Option<String>) -> UnixDialer {
        UnixDialer {
            path,
            require_peer,
            connect_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_dial_without_peer_check() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".s.PGSQL.5432");
        let listener = UnixListener::bind(&path).unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        let transport = dialer(path.into(), None).dial().await.unwrap();
        assert!(!transport.is_tls());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_requirepeer_matches_owner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".s.PGSQL.5432");
        let listener = UnixListener::bind(&path).unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        dialer(path.into(), Some(current_user())).dial().await.unwrap();
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_requirepeer_mismatch_is_verification_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".s.PGSQL.5432");
        let listener = UnixListener::bind(&path).unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let err = dialer(path.into(), Some("no-such-user-pgtwixt".into()))
            .dial()
            .await
            .unwrap_err();
        match err {
            Error::Verification(msg) => assert!(msg.contains("no-such-user-pgtwixt")),
            other => panic!("unexpected error: {:?}", other),
        }
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_socket_is_network_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".s.PGSQL.5432");
        let err = dialer(path.into(), None).dial().await.unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
    }
}
