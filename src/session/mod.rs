pub mod channel;
pub mod client;
pub mod handshake;
pub mod record;
pub mod retry;
pub mod server;
mod state;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::attestation::types::{EvidenceMap, ExpectedMeasurements};
use crate::attestation::{AttestationType, AttestationVerifier, Attester, Endorser, SessionBinder};
use crate::error::{CryptoError, Error, SessionError};
use crate::frame::{MAX_MAP_ENTRIES, MAX_MESSAGE_SIZE};

pub use self::handshake::HandshakeType;
use self::retry::RetryPolicy;

/// Lifecycle of a session.
///
/// `Uninitialized -> Handshaking -> {Open | Failed}`, `Open -> Closed`.
/// `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Handshaking,
    Open,
    Closed,
    Failed,
}

/// Sans-IO message pump shared by client and server sessions.
pub trait ProtocolEngine {
    type Incoming;
    type Outgoing;

    /// Feed one message received from the peer.
    fn put_incoming_message(&mut self, message: Self::Incoming) -> Result<(), Error>;

    /// Take the next message to send to the peer. Each message is
    /// returned exactly once.
    fn get_outgoing_message(&mut self) -> Option<Self::Outgoing>;
}

/// Application-facing operations of an established (or establishing) session.
pub trait Session: ProtocolEngine {
    fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    fn state(&self) -> SessionState;

    /// Encrypt `plaintext` into an outgoing record.
    fn write(&mut self, plaintext: &[u8]) -> Result<(), Error>;

    /// Decrypt the next pending inbound record, or `None` if nothing is queued.
    fn read(&mut self) -> Result<Option<Bytes>, Error>;

    /// Derive a token bound to this session's handshake transcript and `info`.
    fn get_session_binding_token(&self, info: &[u8]) -> Result<[u8; 32], Error>;

    /// Evidence the peer presented during attestation (empty for an
    /// unattested peer).
    fn get_peer_attestation_evidence(&self) -> Result<EvidenceMap, Error>;

    /// Queue a close frame for the peer and stop accepting traffic.
    fn close(&mut self);
}

/// Long-term X25519 identity used by the K-side of NK, KN and KK handshakes.
#[derive(Clone)]
pub struct IdentityKey {
    secret: StaticSecret,
}

impl IdentityKey {
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self {
            secret: StaticSecret::from(raw),
        })
    }

    pub fn public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    pub(crate) fn secret(&self) -> StaticSecret {
        self.secret.clone()
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Configuration for a client or server session.
///
/// The cipher suite is always X25519 + SHA-256 + ChaCha20-Poly1305.
#[non_exhaustive]
pub struct SessionConfig {
    pub attestation_type: AttestationType,
    pub handshake_type: HandshakeType,

    pub(crate) self_attesters: BTreeMap<String, Box<dyn Attester>>,
    pub(crate) self_endorsers: BTreeMap<String, Box<dyn Endorser>>,
    pub(crate) session_binders: BTreeMap<String, Box<dyn SessionBinder>>,
    pub(crate) peer_verifiers: BTreeMap<String, Box<dyn AttestationVerifier>>,
    pub(crate) self_static_private_key: Option<IdentityKey>,
    pub(crate) peer_static_public_key: Option<[u8; 32]>,

    /// Optional expected measurements to verify against every peer attestation.
    pub expected_measurements: Option<ExpectedMeasurements>,

    /// Maximum envelope payload size in bytes (default: 16 MiB).
    pub max_message_size: u32,

    /// Maximum time a [`channel::SecureChannel`] allows for the handshake (default: 30s).
    pub handshake_timeout: Duration,

    /// Optional retry policy for [`channel::SecureChannel::connect_with_retry`].
    pub retry_policy: Option<RetryPolicy>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("attestation_type", &self.attestation_type)
            .field("handshake_type", &self.handshake_type)
            .field("self_attesters", &self.self_attesters.keys().collect::<Vec<_>>())
            .field("self_endorsers", &self.self_endorsers.keys().collect::<Vec<_>>())
            .field("session_binders", &self.session_binders.keys().collect::<Vec<_>>())
            .field("peer_verifiers", &self.peer_verifiers.keys().collect::<Vec<_>>())
            .field("self_static_private_key", &self.self_static_private_key)
            .field(
                "peer_static_public_key",
                &self.peer_static_public_key.map(hex::encode),
            )
            .field("expected_measurements", &self.expected_measurements)
            .field("max_message_size", &self.max_message_size)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl SessionConfig {
    /// Create a builder for constructing a `SessionConfig`.
    pub fn builder(
        attestation_type: AttestationType,
        handshake_type: HandshakeType,
    ) -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: SessionConfig {
                attestation_type,
                handshake_type,
                self_attesters: BTreeMap::new(),
                self_endorsers: BTreeMap::new(),
                session_binders: BTreeMap::new(),
                peer_verifiers: BTreeMap::new(),
                self_static_private_key: None,
                peer_static_public_key: None,
                expected_measurements: None,
                max_message_size: MAX_MESSAGE_SIZE,
                handshake_timeout: Duration::from_secs(30),
                retry_policy: None,
            },
        }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn add_self_attester(mut self, id: impl Into<String>, attester: Box<dyn Attester>) -> Self {
        self.config.self_attesters.insert(id.into(), attester);
        self
    }

    pub fn add_self_endorser(mut self, id: impl Into<String>, endorser: Box<dyn Endorser>) -> Self {
        self.config.self_endorsers.insert(id.into(), endorser);
        self
    }

    pub fn add_session_binder(
        mut self,
        id: impl Into<String>,
        binder: Box<dyn SessionBinder>,
    ) -> Self {
        self.config.session_binders.insert(id.into(), binder);
        self
    }

    pub fn add_peer_verifier(
        mut self,
        id: impl Into<String>,
        verifier: Box<dyn AttestationVerifier>,
    ) -> Self {
        self.config.peer_verifiers.insert(id.into(), verifier);
        self
    }

    pub fn set_self_static_private_key(mut self, key: IdentityKey) -> Self {
        self.config.self_static_private_key = Some(key);
        self
    }

    pub fn set_peer_static_public_key(mut self, key: [u8; 32]) -> Self {
        self.config.peer_static_public_key = Some(key);
        self
    }

    pub fn expected_measurements(mut self, measurements: ExpectedMeasurements) -> Self {
        self.config.expected_measurements = Some(measurements);
        self
    }

    pub fn max_message_size(mut self, size: u32) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = Some(policy);
        self
    }

    /// Build the `SessionConfig`, rejecting combinations no session could run.
    pub fn build(self) -> Result<SessionConfig, Error> {
        let config = self.config;
        let invalid = |msg: String| Err(Error::from(SessionError::Config(msg)));
        let kind = config.attestation_type;

        if kind.attests_self() {
            if config.self_attesters.is_empty() {
                return invalid(format!("{kind:?} requires at least one self attester"));
            }
            for id in config.self_attesters.keys() {
                if !config.session_binders.contains_key(id) {
                    return invalid(format!("attester {id} has no session binder"));
                }
            }
        } else if !config.self_attesters.is_empty() || !config.session_binders.is_empty() {
            return invalid(format!("{kind:?} does not use self attesters or binders"));
        }

        // Attester ids and evidence travel in bounded wire maps.
        if config.self_attesters.len() > MAX_MAP_ENTRIES {
            return invalid(format!(
                "{} self attesters configured, at most {MAX_MAP_ENTRIES} fit in a message",
                config.self_attesters.len()
            ));
        }
        if let Some(id) = config.self_attesters.keys().find(|id| id.len() > u16::MAX as usize) {
            return invalid(format!("attester id of {} bytes is too long", id.len()));
        }

        for id in config.self_endorsers.keys() {
            if !config.self_attesters.contains_key(id) {
                return invalid(format!("endorser {id} has no matching attester"));
            }
        }
        for id in config.session_binders.keys() {
            if !config.self_attesters.contains_key(id) {
                return invalid(format!("session binder {id} has no matching attester"));
            }
        }

        if kind.verifies_peer() {
            if config.peer_verifiers.is_empty() {
                return invalid(format!("{kind:?} requires at least one peer verifier"));
            }
        } else if !config.peer_verifiers.is_empty() {
            return invalid(format!("{kind:?} does not verify the peer"));
        } else if config.expected_measurements.is_some() {
            return invalid(format!("{kind:?} has no peer measurements to check"));
        }

        if config.max_message_size == 0 || config.max_message_size > MAX_MESSAGE_SIZE {
            return invalid(format!(
                "max_message_size must be in 1..={MAX_MESSAGE_SIZE}"
            ));
        }
        if config.handshake_timeout.is_zero() {
            return invalid("handshake_timeout must be > 0".into());
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::binding::SigningKeyBinder;
    use crate::attestation::types::Evidence;
    use crate::error::{AttestError, ErrorKind};

    struct NullAttester;

    impl Attester for NullAttester {
        fn quote(&self) -> Result<Evidence, AttestError> {
            Ok(Evidence::default())
        }
    }

    fn expect_config_error(result: Result<SessionConfig, Error>) {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn unattested_defaults() {
        let config = SessionConfig::builder(AttestationType::Unattested, HandshakeType::NoiseNN)
            .build()
            .unwrap();
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert!(config.retry_policy.is_none());
    }

    #[test]
    fn self_attestation_requires_attester_and_binder() {
        expect_config_error(
            SessionConfig::builder(AttestationType::SelfUnidirectional, HandshakeType::NoiseNN)
                .build(),
        );
        expect_config_error(
            SessionConfig::builder(AttestationType::SelfUnidirectional, HandshakeType::NoiseNN)
                .add_self_attester("tee", Box::new(NullAttester))
                .build(),
        );
        SessionConfig::builder(AttestationType::SelfUnidirectional, HandshakeType::NoiseNN)
            .add_self_attester("tee", Box::new(NullAttester))
            .add_session_binder("tee", Box::new(SigningKeyBinder::generate()))
            .build()
            .unwrap();
    }

    #[test]
    fn peer_attestation_requires_verifier() {
        expect_config_error(
            SessionConfig::builder(AttestationType::PeerUnidirectional, HandshakeType::NoiseNN)
                .build(),
        );
    }

    #[test]
    fn unattested_rejects_attesters() {
        expect_config_error(
            SessionConfig::builder(AttestationType::Unattested, HandshakeType::NoiseNN)
                .add_self_attester("tee", Box::new(NullAttester))
                .add_session_binder("tee", Box::new(SigningKeyBinder::generate()))
                .build(),
        );
        expect_config_error(
            SessionConfig::builder(AttestationType::Unattested, HandshakeType::NoiseNN)
                .expected_measurements(ExpectedMeasurements::default())
                .build(),
        );
    }

    #[test]
    fn limits_validated() {
        expect_config_error(
            SessionConfig::builder(AttestationType::Unattested, HandshakeType::NoiseNN)
                .max_message_size(0)
                .build(),
        );
        expect_config_error(
            SessionConfig::builder(AttestationType::Unattested, HandshakeType::NoiseNN)
                .handshake_timeout(Duration::ZERO)
                .build(),
        );
    }

    #[test]
    fn attester_count_and_id_length_bounded() {
        let mut builder =
            SessionConfig::builder(AttestationType::SelfUnidirectional, HandshakeType::NoiseNN);
        for i in 0..=MAX_MAP_ENTRIES {
            let id = format!("tee-{i:03}");
            builder = builder
                .add_self_attester(id.clone(), Box::new(NullAttester))
                .add_session_binder(id, Box::new(SigningKeyBinder::generate()));
        }
        expect_config_error(builder.build());

        let mut builder =
            SessionConfig::builder(AttestationType::SelfUnidirectional, HandshakeType::NoiseNN);
        for i in 0..MAX_MAP_ENTRIES {
            let id = format!("tee-{i:03}");
            builder = builder
                .add_self_attester(id.clone(), Box::new(NullAttester))
                .add_session_binder(id, Box::new(SigningKeyBinder::generate()));
        }
        builder.build().unwrap();

        let long_id = "t".repeat(u16::MAX as usize + 1);
        expect_config_error(
            SessionConfig::builder(AttestationType::SelfUnidirectional, HandshakeType::NoiseNN)
                .add_self_attester(long_id.clone(), Box::new(NullAttester))
                .add_session_binder(long_id, Box::new(SigningKeyBinder::generate()))
                .build(),
        );
    }

    #[test]
    fn identity_key_from_bytes() {
        let key = IdentityKey::from_bytes(&[9u8; 32]).unwrap();
        assert_eq!(key.public_key(), IdentityKey::from_bytes(&[9u8; 32]).unwrap().public_key());
        assert_ne!(key.public_key(), IdentityKey::generate().public_key());

        let err = IdentityKey::from_bytes(&[9u8; 31]).unwrap_err();
        assert!(matches!(
            err,
            Error::Crypto(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let key = IdentityKey::from_bytes(&[0x5A; 32]).unwrap();
        let rendered = format!("{key:?}");
        assert!(!rendered.contains(&hex::encode([0x5A; 32])));
    }
}
