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
    AttestRequest, AttestResponse, HandshakeRequest, HandshakeResponse, SessionBindings,
    SessionRequest, SessionResponse, WireMessage,
};

enum Phase {
    /// Placeholder while a transition owns the previous phase.
    Uninitialized,
    AwaitingAttestRequest,
    AwaitingHandshakeRequest {
        handshaker: Handshaker,
        verified: VerifiedAttestations,
    },
    /// Keys are derived; the client still owes its session bindings.
    AwaitingBindings {
        verified: VerifiedAttestations,
        binding_input: [u8; 32],
    },
    Open,
    Done,
}

impl Phase {
    fn expects(&self) -> &'static str {
        match self {
            Self::AwaitingAttestRequest => "attest",
            Self::AwaitingHandshakeRequest { .. } => "handshake",
            Self::AwaitingBindings { .. } => "bindings",
            Self::Open => "record or close",
            Self::Uninitialized | Self::Done => "nothing",
        }
    }
}

/// Server (Noise responder) side of a session.
pub struct ServerSession {
    config: SessionConfig,
    core: SessionCore<SessionResponse>,
    phase: Phase,
}

impl ServerSession {
    /// Create a session waiting for the client's attestation message.
    pub fn create(config: SessionConfig) -> Result<Self, Error> {
        check_static_keys(
            Role::Responder,
            config.handshake_type,
            config.self_static_private_key.is_some(),
            config.peer_static_public_key.is_some(),
        )?;

        let mut core = SessionCore::new("server");
        core.set_state(SessionState::Handshaking);

        tracing::debug!(
            attestation = ?config.attestation_type,
            handshake = ?config.handshake_type,
            "server session created"
        );

        Ok(Self {
            config,
            core,
            phase: Phase::AwaitingAttestRequest,
        })
    }

    fn on_attest(&mut self, attest: AttestRequest) -> Result<(), Error> {
        let verified = if self.config.attestation_type.verifies_peer() {
            provider::verify_peer_evidence(
                &self.config.peer_verifiers,
                &attest.endorsed_evidence,
                self.config.expected_measurements.as_ref(),
            )?
        } else {
            VerifiedAttestations::new()
        };

        let endorsed_evidence = if self.config.attestation_type.attests_self() {
            provider::collect_evidence(&self.config.self_attesters, &self.config.self_endorsers)?
        } else {
            EvidenceMap::new()
        };
        let response = SessionResponse::Attest(AttestResponse { endorsed_evidence });

        let attest_request = SessionRequest::Attest(attest.clone()).encode()?;
        let prologue = attestation_prologue(&attest_request, &response.encode()?);
        let handshaker = Handshaker::new(
            Role::Responder,
            self.config.handshake_type,
            &prologue,
            self.config.self_static_private_key.as_ref().map(|k| k.secret()),
            self.config.peer_static_public_key,
        )?;

        self.core.set_peer_evidence(attest.endorsed_evidence);
        self.core.queue(response);
        self.phase = Phase::AwaitingHandshakeRequest {
            handshaker,
            verified,
        };
        Ok(())
    }

    fn on_handshake(
        &mut self,
        mut handshaker: Handshaker,
        verified: VerifiedAttestations,
        request: HandshakeRequest,
    ) -> Result<(), Error> {
        handshaker.read_message(&request.noise_message)?;
        let noise_message = handshaker.write_message(&[])?;
        let outcome = handshaker.finish()?;
        let binding_input = attestation_binding_input(&outcome.handshake_hash);

        let bindings = provider::bind_session(&self.config.session_binders, &binding_input)?;
        self.core.queue(SessionResponse::Handshake(HandshakeResponse {
            noise_message: Bytes::from(noise_message),
            bindings,
        }));

        tracing::debug!(
            session_id = hex::encode(outcome.handshake_hash),
            "server handshake complete"
        );
        self.core
            .set_records(RecordLayer::new(outcome, self.config.max_message_size));

        if self.config.attestation_type.verifies_peer() {
            self.phase = Phase::AwaitingBindings {
                verified,
                binding_input,
            };
        } else {
            self.phase = Phase::Open;
            self.core.set_state(SessionState::Open);
        }
        Ok(())
    }

    fn on_bindings(
        &mut self,
        verified: VerifiedAttestations,
        binding_input: [u8; 32],
        bindings: SessionBindings,
    ) -> Result<(), Error> {
        provider::verify_session_bindings(&verified, &bindings.bindings, &binding_input)?;
        self.phase = Phase::Open;
        self.core.set_state(SessionState::Open);
        Ok(())
    }

    fn advance(&mut self, message: SessionRequest) -> Result<(), Error> {
        match (mem::replace(&mut self.phase, Phase::Uninitialized), message) {
            (Phase::AwaitingAttestRequest, SessionRequest::Attest(attest)) => self.on_attest(attest),
            (
                Phase::AwaitingHandshakeRequest {
                    handshaker,
                    verified,
                },
                SessionRequest::Handshake(request),
            ) => self.on_handshake(handshaker, verified, request),
            (
                Phase::AwaitingBindings {
                    verified,
                    binding_input,
                },
                SessionRequest::Bindings(bindings),
            ) => self.on_bindings(verified, binding_input, bindings),
            (phase, other) => Err(SessionError::UnexpectedMessage {
                expected: phase.expects(),
                actual: other.kind().name(),
            }
            .into()),
        }
    }
}

impl ProtocolEngine for ServerSession {
    type Incoming = SessionRequest;
    type Outgoing = SessionResponse;

    fn put_incoming_message(&mut self, message: SessionRequest) -> Result<(), Error> {
        self.core.ensure_live()?;
        if let Phase::Open = self.phase {
            let message = match message {
                SessionRequest::Record(record) => OpenMessage::Record(record),
                SessionRequest::Close => OpenMessage::Close,
                other => OpenMessage::Unexpected(other.kind().name()),
            };
            let result = self.core.accept_open_message(message);
            if self.core.state() != SessionState::Open {
                self.phase = Phase::Done;
            }
            return result;
        }

        match message {
            SessionRequest::Close => {
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

    fn get_outgoing_message(&mut self) -> Option<SessionResponse> {
        self.core.next_outgoing()
    }
}

impl Session for ServerSession {
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
