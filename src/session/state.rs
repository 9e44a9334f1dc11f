use std::collections::VecDeque;

use bytes::Bytes;

use super::record::RecordLayer;
use super::SessionState;
use crate::attestation::types::EvidenceMap;
use crate::error::{ErrorKind, Error, SessionError};
use crate::frame::{EncryptedRecord, WireMessage};

/// State shared by both session roles: lifecycle, the outbound queue,
/// the record layer once keys exist, and the first fatal error.
pub(crate) struct SessionCore<Out> {
    role: &'static str,
    state: SessionState,
    outgoing: VecDeque<Out>,
    records: Option<RecordLayer>,
    peer_evidence: Option<EvidenceMap>,
    failure: Option<(ErrorKind, String)>,
}

impl<Out: WireMessage> SessionCore<Out> {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            state: SessionState::Uninitialized,
            outgoing: VecDeque::new(),
            records: None,
            peer_evidence: None,
            failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(role = self.role, from = ?self.state, to = ?state, "session state change");
            self.state = state;
        }
    }

    pub fn queue(&mut self, message: Out) {
        self.outgoing.push_back(message);
    }

    pub fn next_outgoing(&mut self) -> Option<Out> {
        self.outgoing.pop_front()
    }

    pub fn set_records(&mut self, records: RecordLayer) {
        self.records = Some(records);
    }

    pub fn set_peer_evidence(&mut self, evidence: EvidenceMap) {
        self.peer_evidence = Some(evidence);
    }

    /// Error returned by every operation once the session is terminal.
    fn terminal_error(&self) -> Option<Error> {
        match self.state {
            SessionState::Failed => {
                let (kind, reason) = self
                    .failure
                    .clone()
                    .unwrap_or((ErrorKind::Protocol, "session failed".into()));
                Some(SessionError::Failed { kind, reason }.into())
            }
            SessionState::Closed => Some(SessionError::Closed.into()),
            _ => None,
        }
    }

    /// Fail fast if the session can no longer accept messages.
    pub fn ensure_live(&self) -> Result<(), Error> {
        match self.terminal_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Record a handshake failure and make the session terminal.
    pub fn fail(&mut self, err: Error) -> Error {
        tracing::warn!(role = self.role, error = %err, "session failed");
        self.failure = Some((err.kind(), err.to_string()));
        self.outgoing.clear();
        self.records = None;
        self.set_state(SessionState::Failed);
        err
    }

    /// Tear down an open session after a fatal record-layer error.
    pub fn abort(&mut self, err: Error) -> Error {
        tracing::warn!(role = self.role, error = %err, "closing session after fatal error");
        self.outgoing.clear();
        self.records = None;
        self.set_state(SessionState::Closed);
        err
    }

    /// The peer sent a close frame. Nothing queued is sent after it.
    pub fn peer_closed(&mut self) {
        tracing::debug!(role = self.role, state = ?self.state, "peer closed session");
        self.outgoing.clear();
        self.records = None;
        self.set_state(SessionState::Closed);
    }

    /// Handle a message arriving after the session is open.
    pub fn accept_open_message(&mut self, message: OpenMessage) -> Result<(), Error> {
        let records = match self.records.as_mut() {
            Some(records) if self.state == SessionState::Open => records,
            _ => return Err(SessionError::NotOpen.into()),
        };
        match message {
            OpenMessage::Record(record) => {
                records.enqueue(record);
                Ok(())
            }
            OpenMessage::Close => {
                self.peer_closed();
                Ok(())
            }
            OpenMessage::Unexpected(actual) => Err(self.abort(
                SessionError::UnexpectedMessage {
                    expected: "record or close",
                    actual,
                }
                .into(),
            )),
        }
    }

    pub fn write(&mut self, plaintext: &[u8]) -> Result<(), Error> {
        self.ensure_live()?;
        let records = match self.records.as_mut() {
            Some(records) if self.state == SessionState::Open => records,
            _ => return Err(SessionError::NotOpen.into()),
        };
        match records.seal(plaintext) {
            Ok(record) => {
                self.outgoing.push_back(Out::record(record));
                Ok(())
            }
            // Oversized plaintext leaves the session usable.
            Err(err @ Error::Message(_)) => Err(err),
            Err(err) => Err(self.abort(err)),
        }
    }

    pub fn read(&mut self) -> Result<Option<Bytes>, Error> {
        self.ensure_live()?;
        let records = match self.records.as_mut() {
            Some(records) if self.state == SessionState::Open => records,
            _ => return Err(SessionError::NotOpen.into()),
        };
        match records.open_next() {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => Err(self.abort(err)),
        }
    }

    pub fn binding_token(&self, info: &[u8]) -> Result<[u8; 32], Error> {
        self.ensure_live()?;
        match &self.records {
            Some(records) => records.binding_token(info),
            None => Err(SessionError::NotReady.into()),
        }
    }

    pub fn peer_evidence(&self) -> Result<EvidenceMap, Error> {
        self.ensure_live()?;
        self.peer_evidence
            .clone()
            .ok_or_else(|| SessionError::NotReady.into())
    }

    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Handshaking | SessionState::Open) {
            self.outgoing.push_back(Out::close());
            self.records = None;
            self.set_state(SessionState::Closed);
        }
    }
}

/// What an open session can receive, independent of direction.
pub(crate) enum OpenMessage {
    Record(EncryptedRecord),
    Close,
    Unexpected(&'static str),
}
