//! Frontend handshake: SSL negotiation, then startup or cancel dispatch

use super::state::HandshakeState;
use super::Handler;
use crate::protocol::{CancelKey, Frame, StartupMessage};
use crate::stream::{BoxedIo, FrontendStream, Stream};
use crate::{Error, Result};
use tokio_rustls::TlsAcceptor;

/// Run the pre-startup handshake on an accepted connection and hand the
/// result to `handler`.
///
/// The session handler owns the stream from then on. A cancel request is
/// passed to the cancel handler and the connection is closed without a reply.
pub(crate) async fn handshake<H: Handler>(
    io: BoxedIo,
    tls: Option<&TlsAcceptor>,
    handler: &H,
) -> Result<()> {
    let mut state = HandshakeState::AwaitingFirst;
    let mut stream = Stream::frontend(io);

    let mut frame = stream.next().await?;
    if frame.is_gssenc_request() {
        stream.send_ssl_response(false).await?;
        frame = stream.next().await?;
        if frame.is_gssenc_request() {
            return Err(Error::Protocol("repeated GSSENCRequest".to_string()));
        }
    }

    if frame.is_ssl_request() {
        state.transition(HandshakeState::NegotiatingTls)?;
        stream = negotiate_tls(stream, tls).await?;
        state.transition(HandshakeState::AwaitingStartup)?;
        frame = stream.next().await?;
    }

    dispatch(stream, frame, &mut state, handler).await
}

async fn negotiate_tls(
    mut stream: FrontendStream,
    tls: Option<&TlsAcceptor>,
) -> Result<FrontendStream> {
    let Some(acceptor) = tls else {
        stream.send_ssl_response(false).await?;
        return Ok(stream);
    };

    stream.send_ssl_response(true).await?;
    let io = stream.into_inner()?;
    let encrypted = acceptor
        .accept(io)
        .await
        .map_err(|e| Error::TlsNegotiation(format!("frontend TLS handshake failed: {}", e)))?;
    tracing::debug!("frontend TLS established");
    Ok(Stream::frontend(Box::new(encrypted) as BoxedIo))
}

async fn dispatch<H: Handler>(
    stream: FrontendStream,
    frame: Frame,
    state: &mut HandshakeState,
    handler: &H,
) -> Result<()> {
    if frame.is_startup_message() {
        let startup = StartupMessage::decode(&frame).map_err(|e| Error::Protocol(e.to_string()))?;
        state.transition(HandshakeState::Dispatching)?;
        handler.session(stream, startup.params).await;
        return Ok(());
    }

    if frame.is_cancel_request() {
        let key = CancelKey::decode(&frame).map_err(|e| Error::Protocol(e.to_string()))?;
        state.transition(HandshakeState::Dispatching)?;
        handler.cancel(key).await;
        state.transition(HandshakeState::Closed)?;
        return stream.close().await;
    }

    Err(Error::Protocol(format!(
        "unexpected {} frame while {}",
        frame.kind(),
        state
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{gssenc_request, ssl_request};
    use crate::protocol::StartupParams;
    use rcgen::{generate_simple_self_signed, CertifiedKey};
    use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use std::sync::Mutex;
    use tokio_test::io::Builder;

    #[derive(Default)]
    struct Recording {
        sessions: Mutex<Vec<StartupParams>>,
        cancels: Mutex<Vec<CancelKey>>,
    }

    impl Handler for Recording {
        async fn session(&self, stream: FrontendStream, params: StartupParams) {
            self.sessions.lock().unwrap().push(params);
            stream.close().await.unwrap();
        }

        async fn cancel(&self, key: CancelKey) {
            self.cancels.lock().unwrap().push(key);
        }
    }

    fn startup_bytes() -> Vec<u8> {
        let mut params = StartupParams::new();
        params.insert("user".to_string(), "mary".to_string());
        StartupMessage::new(params).to_frame().to_bytes().to_vec()
    }

    fn acceptor() -> TlsAcceptor {
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        crate::server::tls::acceptor(vec![cert.der().clone()], key).unwrap()
    }

    #[tokio::test]
    async fn test_cancel_request_dispatch() {
        let cancel = CancelKey {
            process_id: 2600,
            secret_key: 1957,
        };
        let io = Builder::new().read(&cancel.to_frame().to_bytes()).build();
        let handler = Recording::default();

        handshake(Box::new(io), None, &handler).await.unwrap();

        assert_eq!(*handler.cancels.lock().unwrap(), vec![cancel]);
        assert!(handler.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_startup_dispatch() {
        let io = Builder::new().read(&startup_bytes()).build();
        let handler = Recording::default();

        handshake(Box::new(io), None, &handler).await.unwrap();

        let sessions = handler.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["user"], "mary");
        assert!(handler.cancels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ssl_request_rejected_without_tls() {
        let io = Builder::new()
            .read(&ssl_request().to_bytes())
            .write(b"N")
            .read(&startup_bytes())
            .build();
        let handler = Recording::default();

        handshake(Box::new(io), None, &handler).await.unwrap();

        assert_eq!(handler.sessions.lock().unwrap()[0]["user"], "mary");
    }

    #[tokio::test]
    async fn test_gssenc_then_ssl_request() {
        let io = Builder::new()
            .read(&gssenc_request().to_bytes())
            .write(b"N")
            .read(&ssl_request().to_bytes())
            .write(b"N")
            .read(&startup_bytes())
            .build();
        let handler = Recording::default();

        handshake(Box::new(io), None, &handler).await.unwrap();

        assert_eq!(handler.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_gssenc_request_is_protocol_error() {
        let io = Builder::new()
            .read(&gssenc_request().to_bytes())
            .write(b"N")
            .read(&gssenc_request().to_bytes())
            .build();
        let handler = Recording::default();

        let err = handshake(Box::new(io), None, &handler).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_second_ssl_request_is_protocol_error() {
        let io = Builder::new()
            .read(&ssl_request().to_bytes())
            .write(b"N")
            .read(&ssl_request().to_bytes())
            .build();
        let handler = Recording::default();

        let err = handshake(Box::new(io), None, &handler).await.unwrap_err();
        assert!(err.to_string().contains("awaiting_startup"), "{}", err);
        assert!(handler.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pipelined_startup_before_tls_is_rejected() {
        let mut pipelined = ssl_request().to_bytes().to_vec();
        pipelined.extend_from_slice(&startup_bytes());
        let io = Builder::new().read(&pipelined).write(b"S").build();
        let handler = Recording::default();

        let err = handshake(Box::new(io), Some(&acceptor()), &handler)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(handler.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hangup_before_first_frame() {
        let io = Builder::new().build();
        let handler = Recording::default();

        let err = handshake(Box::new(io), None, &handler).await.unwrap_err();
        assert!(err.is_clean_close());
    }
}
