use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ErrorKind, SessionError};
use crate::frame::codec::EnvelopeCodec;
use crate::frame::WireMessage;

use super::client::ClientSession;
use super::retry::{with_retry, RetryPolicy};
use super::server::ServerSession;
use super::{Session, SessionConfig, SessionState};

/// A high-level message received from a secure channel.
#[derive(Debug, PartialEq, Eq)]
pub enum Message {
    /// Decrypted application data.
    Data(Bytes),
    /// Peer-initiated shutdown.
    Shutdown,
}

/// Encrypted channel driving a session over any `AsyncRead + AsyncWrite` transport.
pub struct SecureChannel<T, S: Session> {
    transport: T,
    session: S,
    read_buf: BytesMut,
    codec: EnvelopeCodec<S::Incoming>,
    /// Set once the peer's close frame has been processed.
    peer_closed: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SecureChannel<T, ClientSession> {
    /// Establish a secure channel as the client, within the configured
    /// handshake timeout.
    pub async fn connect(transport: T, config: SessionConfig) -> Result<Self, Error> {
        let timeout = config.handshake_timeout;
        let max_message_size = config.max_message_size;
        let session = ClientSession::create(config)?;
        Self::establish(transport, session, max_message_size, timeout).await
    }

    /// Connect with retries according to the config's `retry_policy` (a
    /// single attempt if none is set). Each attempt opens a fresh transport
    /// and builds a fresh config, so evidence is re-collected per attempt.
    /// Configuration errors are returned immediately.
    pub async fn connect_with_retry<F, Fut, C>(
        mut open_transport: F,
        mut make_config: C,
    ) -> Result<Self, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::io::Result<T>>,
        C: FnMut() -> Result<SessionConfig, Error>,
    {
        let first = make_config()?;
        let policy = first.retry_policy.clone().unwrap_or_else(RetryPolicy::none);
        let mut pending = Some(first);

        with_retry(
            &policy,
            |err: &Error| err.kind() != ErrorKind::Config,
            || {
                let config = match pending.take() {
                    Some(config) => Ok(config),
                    None => make_config(),
                };
                let transport = open_transport();
                async move {
                    let config = config?;
                    let transport = transport.await?;
                    Self::connect(transport, config).await
                }
            },
        )
        .await
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SecureChannel<T, ServerSession> {
    /// Accept a secure channel as the server, within the configured
    /// handshake timeout.
    pub async fn accept(transport: T, config: SessionConfig) -> Result<Self, Error> {
        let timeout = config.handshake_timeout;
        let max_message_size = config.max_message_size;
        let session = ServerSession::create(config)?;
        Self::establish(transport, session, max_message_size, timeout).await
    }
}

impl<T, S> SecureChannel<T, S>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Session,
    S::Incoming: WireMessage,
    S::Outgoing: WireMessage,
{
    async fn establish(
        transport: T,
        session: S,
        max_message_size: u32,
        timeout: std::time::Duration,
    ) -> Result<Self, Error> {
        let mut channel = Self {
            transport,
            session,
            read_buf: BytesMut::with_capacity(4096),
            codec: EnvelopeCodec::with_max_message_size(max_message_size),
            peer_closed: false,
        };

        match tokio::time::timeout(timeout, channel.drive_handshake()).await {
            Ok(Ok(())) => Ok(channel),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "handshake timed out");
                Err(SessionError::Timeout.into())
            }
        }
    }

    async fn drive_handshake(&mut self) -> Result<(), Error> {
        loop {
            self.flush_outgoing().await?;
            match self.session.state() {
                SessionState::Open => return Ok(()),
                SessionState::Closed => {
                    return Err(SessionError::HandshakeFailed(
                        "peer closed the session during the handshake".into(),
                    )
                    .into())
                }
                _ => {}
            }
            let message = self.recv_message().await?;
            self.session.put_incoming_message(message)?;
        }
    }

    /// Send an encrypted data payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.session.write(payload)?;
        self.flush_outgoing().await
    }

    /// Receive the next message from the channel.
    ///
    /// `Message::Shutdown` is only returned when the peer closed the session.
    /// A session torn down locally, by `shutdown()` or a fatal record error,
    /// keeps reporting `ErrorKind::Closed`.
    pub async fn recv(&mut self) -> Result<Message, Error> {
        loop {
            if self.peer_closed {
                return Ok(Message::Shutdown);
            }
            if let Some(plaintext) = self.session.read()? {
                return Ok(Message::Data(plaintext));
            }
            let message = self.recv_message().await?;
            self.session.put_incoming_message(message)?;
            if self.session.state() == SessionState::Closed {
                self.peer_closed = true;
            }
        }
    }

    /// Send a close frame to the peer and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.session.close();
        self.flush_outgoing().await?;
        self.transport.shutdown().await.map_err(Error::Io)
    }

    /// Session binding token for `info`, identical on both ends of the channel.
    pub fn session_binding_token(&self, info: &[u8]) -> Result<[u8; 32], Error> {
        self.session.get_session_binding_token(info)
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    async fn flush_outgoing(&mut self) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        while let Some(message) = self.session.get_outgoing_message() {
            self.codec.encode(message, &mut buf)?;
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.transport.write_all(&buf).await.map_err(Error::Io)?;
        self.transport.flush().await.map_err(Error::Io)?;
        Ok(())
    }

    async fn recv_message(&mut self) -> Result<S::Incoming, Error> {
        loop {
            if let Some(message) = self.codec.decode(&mut self.read_buf)? {
                return Ok(message);
            }
            let n = self
                .transport
                .read_buf(&mut self.read_buf)
                .await
                .map_err(Error::Io)?;
            if n == 0 {
                return Err(SessionError::Closed.into());
            }
        }
    }
}
