use std::collections::BTreeMap;
use std::mem;

use bytes::Bytes;

use super::handshake::{check_static_keys, Handshaker, Role};
use super::record::RecordLayer;
use super::state::{OpenMessage, SessionCore};
use super::{ProtocolEngine, Session, SessionConfig, SessionState};
use crate::attestation::provider::{self, VerifiedAttestations};
use crate::attestation::types::EvidenceMap;
use crate::crypto::transcript::{attestation_binding_input, attestation_prologue};
use crate::error::{Error, SessionError};
use crate::frame::{
    AttestRequest, AttestResponse, HandshakeRequest, SessionBindings, SessionRequest,
    SessionResponse, WireMessage,
};

enum Phase {
    /// Placeholder while a transition owns the previous phase.
    Uninitialized,
    AwaitingAttestResponse { attest_request: Bytes },
    AwaitingHandshakeResponse {
        handshaker: Handshaker,
        verified: VerifiedAttestations,
    },
    Open,
    Done,
}

/// Client (Noise initiator) side of a session.
pub struct ClientSession {
    config: SessionConfig,
    core: SessionCore<SessionRequest>,
    phase: Phase,
}

impl ClientSession {
    /// Create a session and queue its opening attestation message.
    pub fn create(config: SessionConfig) -> Result<Self, Error> {
        check_static_keys(
            Role::Initiator,
            config.handshake_type,
            config.self_static_private_key.is_some(),
            config.peer_static_public_key.is_some(),
        )?;

        let endorsed_evidence = if config.attestation_type.attests_self() {
            provider::collect_evidence(&config.self_attesters, &config.self_endorsers)?
        } else {
            EvidenceMap::new()
        };
        let request = SessionRequest::Attest(AttestRequest { endorsed_evidence });
        let attest_request = request.encode()?;

        let mut core = SessionCore::new("client");
        core.queue(request);
        core.set_state(SessionState::Handshaking);

        tracing::debug!(
            attestation = ?config.attestation_type,
            handshake = ?config.handshake_type,
            "client session created"
        );

        Ok(Self {
            config,
            core,
            phase: Phase::AwaitingAttestResponse { attest_request },
        })
    }

    fn on_attest(&mut self, attest_request: Bytes, attest: AttestResponse) -> Result<(), Error> {
        let verified = if self.config.attestation_type.verifies_peer() {
            provider::verify_peer_evidence(
                &self.config.peer_verifiers,
                &attest.endorsed_evidence,
                self.config.expected_measurements.as_ref(),
            )?
        } else {
            VerifiedAttestations::new()
        };

        let attest_response = SessionResponse::Attest(attest.clone()).encode()?;
        let prologue = attestation_prologue(&attest_request, &attest_response);
        let mut handshaker = Handshaker::new(
            Role::Initiator,
            self.config.handshake_type,
            &prologue,
            self.config.self_static_private_key.as_ref().map(|k| k.secret()),
            self.config.peer_static_public_key,
        )?;
        let noise_message = handshaker.write_message(&[])?;

        self.core.set_peer_evidence(attest.endorsed_evidence);
        self.core.queue(SessionRequest::Handshake(HandshakeRequest {
            noise_message: Bytes::from(noise_message),
        }));
        self.phase = Phase::AwaitingHandshakeResponse {
            handshaker,
            verified,
        };
        Ok(())
    }

    fn on_handshake(
        &mut self,
        mut handshaker: Handshaker,
        verified: VerifiedAttestations,
        noise_message: &[u8],
        bindings: &BTreeMap<String, Bytes>,
    ) -> Result<(), Error> {
        handshaker.read_message(noise_message)?;
        let outcome = handshaker.finish()?;
        let binding_input = attestation_binding_input(&outcome.handshake_hash);

        provider::verify_session_bindings(&verified, bindings, &binding_input)?;

        if self.config.attestation_type.attests_self() {
            let bindings = provider::bind_session(&self.config.session_binders, &binding_input)?;
            self.core
                .queue(SessionRequest::Bindings(SessionBindings { bindings }));
        }

        tracing::debug!(
            session_id = hex::encode(outcome.handshake_hash),
            "client handshake complete"
        );
        self.core
            .set_records(RecordLayer::new(outcome, self.config.max_message_size));
        self.phase = Phase::Open;
        self.core.set_state(SessionState::Open);
        Ok(())
    }

    fn advance(&mut self, message: SessionResponse) -> Result<(), Error> {
        match (mem::replace(&mut self.phase, Phase::Uninitialized), message) {
            (Phase::AwaitingAttestResponse { attest_request }, SessionResponse::Attest(attest)) => {
                self.on_attest(attest_request, attest)
            }
            (
                Phase::AwaitingHandshakeResponse {
                    handshaker,
                    verified,
                },
                SessionResponse::Handshake(handshake),
            ) => self.on_handshake(
                handshaker,
                verified,
                &handshake.noise_message,
                &handshake.bindings,
            ),
            (phase, other) => Err(SessionError::UnexpectedMessage {
                expected: phase.expects(),
                actual: other.kind().name(),
            }
            .into()),
        }
    }
}

impl Phase {
    fn expects(&self) -> &'static str {
        match self {
            Self::AwaitingAttestResponse { .. } => "attest",
            Self::AwaitingHandshakeResponse { .. } => "handshake",
            Self::Open => "record or close",
            Self::Uninitialized | Self::Done => "nothing",
        }
    }
}

impl ProtocolEngine for ClientSession {
    type Incoming = SessionResponse;
    type Outgoing = SessionRequest;

    fn put_incoming_message(&mut self, message: SessionResponse) -> Result<(), Error> {
        self.core.ensure_live()?;
        if let Phase::Open = self.phase {
            let message = match message {
                SessionResponse::Record(record) => OpenMessage::Record(record),
                SessionResponse::Close => OpenMessage::Close,
                other => OpenMessage::Unexpected(other.kind().name()),
            };
            let result = self.core.accept_open_message(message);
            if self.core.state() != SessionState::Open {
                self.phase = Phase::Done;
            }
            return result;
        }

        match message {
            SessionResponse::Close => {
                self.core.peer_closed();
                self.phase = Phase::Done;
                Ok(())
            }
            message => self.advance(message).map_err(|err| {
                self.phase = Phase::Done;
                self.core.fail(err)
            }),
        }
    }

    fn get_outgoing_message(&mut self) -> Option<SessionRequest> {
        self.core.next_outgoing()
    }
}

impl Session for ClientSession {
    fn state(&self) -> SessionState {
        self.core.state()
    }

    fn write(&mut self, plaintext: &[u8]) -> Result<(), Error> {
        self.core.write(plaintext)
    }

    fn read(&mut self) -> Result<Option<Bytes>, Error> {
        self.core.read()
    }

    fn get_session_binding_token(&self, info: &[u8]) -> Result<[u8; 32], Error> {
        self.core.binding_token(info)
    }

    fn get_peer_attestation_evidence(&self) -> Result<EvidenceMap, Error> {
        self.core.peer_evidence()
    }

    fn close(&mut self) {
        self.core.close();
        self.phase = Phase::Done;
    }
}
