//! Sans-IO Noise handshake for the one-round-trip patterns NN, NK, KN and KK.
//!
//! The client is always the Noise initiator. Handshake payloads are empty;
//! everything the peers exchange besides key material travels in the
//! surrounding envelopes and is committed to through the prologue and
//! the final handshake hash.

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::crypto::noise::{dh, KeyPair, SymmetricState};
use crate::crypto::{CipherSuite, HandshakeHash, SymmetricKey};
use crate::error::{CryptoError, Error, SessionError};

const DH_LEN: usize = 32;

/// Supported Noise handshake patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeType {
    /// No static keys.
    NoiseNN,
    /// Responder static key known to the initiator in advance.
    NoiseNK,
    /// Initiator static key known to the responder in advance.
    NoiseKN,
    /// Both static keys known in advance.
    NoiseKK,
}

impl HandshakeType {
    pub const fn pattern(self) -> &'static str {
        match self {
            Self::NoiseNN => "NN",
            Self::NoiseNK => "NK",
            Self::NoiseKN => "KN",
            Self::NoiseKK => "KK",
        }
    }

    /// Full Noise protocol name, e.g. `Noise_NN_25519_ChaChaPoly_SHA256`.
    pub fn protocol_name(self, suite: CipherSuite) -> String {
        format!("Noise_{}_{}", self.pattern(), suite.noise_suffix())
    }

    /// `-> s` pre-message: the responder knows the initiator's static key.
    pub const fn initiator_static_known(self) -> bool {
        matches!(self, Self::NoiseKN | Self::NoiseKK)
    }

    /// `<- s` pre-message: the initiator knows the responder's static key.
    pub const fn responder_static_known(self) -> bool {
        matches!(self, Self::NoiseNK | Self::NoiseKK)
    }

    fn tokens(self, message: usize) -> &'static [Token] {
        use Token::{Dh, E};
        match (self, message) {
            (Self::NoiseNN, 0) | (Self::NoiseKN, 0) => &[E],
            (Self::NoiseNK, 0) => &[E, Dh(Mix::Es)],
            (Self::NoiseKK, 0) => &[E, Dh(Mix::Es), Dh(Mix::Ss)],
            (Self::NoiseNN, _) | (Self::NoiseNK, _) => &[E, Dh(Mix::Ee)],
            (Self::NoiseKN, _) | (Self::NoiseKK, _) => &[E, Dh(Mix::Ee), Dh(Mix::Se)],
        }
    }
}

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    fn needs_local_static(self, pattern: HandshakeType) -> bool {
        match self {
            Self::Initiator => pattern.initiator_static_known(),
            Self::Responder => pattern.responder_static_known(),
        }
    }

    fn needs_remote_static(self, pattern: HandshakeType) -> bool {
        match self {
            Self::Initiator => pattern.responder_static_known(),
            Self::Responder => pattern.initiator_static_known(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Token {
    E,
    Dh(Mix),
}

/// DH tokens, named local-then-remote from the initiator's point of view.
#[derive(Debug, Clone, Copy)]
enum Mix {
    Ee,
    Es,
    Se,
    Ss,
}

/// Check that exactly the static keys `pattern` uses for `role` are present.
pub fn check_static_keys(
    role: Role,
    pattern: HandshakeType,
    has_local_static: bool,
    has_remote_static: bool,
) -> Result<(), SessionError> {
    let name = pattern.pattern();
    match (role.needs_local_static(pattern), has_local_static) {
        (true, false) => {
            return Err(SessionError::Config(format!(
                "Noise {name} as {role:?} requires a self static private key"
            )))
        }
        (false, true) => {
            return Err(SessionError::Config(format!(
                "Noise {name} as {role:?} does not use a self static private key"
            )))
        }
        _ => {}
    }
    match (role.needs_remote_static(pattern), has_remote_static) {
        (true, false) => Err(SessionError::Config(format!(
            "Noise {name} as {role:?} requires the peer static public key"
        ))),
        (false, true) => Err(SessionError::Config(format!(
            "Noise {name} as {role:?} does not use a peer static public key"
        ))),
        _ => Ok(()),
    }
}

/// Keys and transcript hash produced by a completed handshake.
pub struct HandshakeOutcome {
    pub handshake_hash: HandshakeHash,
    pub send_key: Zeroizing<SymmetricKey>,
    pub recv_key: Zeroizing<SymmetricKey>,
}

/// In-progress Noise handshake.
pub struct Handshaker {
    role: Role,
    pattern: HandshakeType,
    symmetric: SymmetricState,
    s: Option<KeyPair>,
    e: Option<KeyPair>,
    rs: Option<PublicKey>,
    re: Option<PublicKey>,
    /// Index of the next pattern message (0 or 1; 2 once complete).
    message: usize,
}

impl Handshaker {
    pub fn new(
        role: Role,
        pattern: HandshakeType,
        prologue: &[u8],
        local_static: Option<StaticSecret>,
        remote_static: Option<[u8; 32]>,
    ) -> Result<Self, SessionError> {
        check_static_keys(role, pattern, local_static.is_some(), remote_static.is_some())?;

        let mut symmetric =
            SymmetricState::initialize(&pattern.protocol_name(CipherSuite::X25519ChaChaPolySha256));
        symmetric.mix_hash(prologue);

        let s = local_static.map(KeyPair::from_secret);
        let rs = remote_static.map(PublicKey::from);

        let (initiator_static, responder_static) = match role {
            Role::Initiator => (s.as_ref().map(|k| k.public), rs),
            Role::Responder => (rs, s.as_ref().map(|k| k.public)),
        };
        if pattern.initiator_static_known() {
            if let Some(key) = initiator_static {
                symmetric.mix_hash(key.as_bytes());
            }
        }
        if pattern.responder_static_known() {
            if let Some(key) = responder_static {
                symmetric.mix_hash(key.as_bytes());
            }
        }

        Ok(Self {
            role,
            pattern,
            symmetric,
            s,
            e: None,
            rs,
            re: None,
            message: 0,
        })
    }

    fn is_our_turn(&self) -> bool {
        match self.role {
            Role::Initiator => self.message == 0,
            Role::Responder => self.message == 1,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.message >= 2
    }

    /// Produce the next handshake message carrying `payload`.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if self.is_complete() || !self.is_our_turn() {
            return Err(SessionError::HandshakeFailed("not our turn to write".into()).into());
        }

        let mut out = Vec::with_capacity(DH_LEN + payload.len() + 16);
        for token in self.pattern.tokens(self.message) {
            match token {
                Token::E => {
                    let e = KeyPair::generate();
                    out.extend_from_slice(e.public.as_bytes());
                    self.symmetric.mix_hash(e.public.as_bytes());
                    self.e = Some(e);
                }
                Token::Dh(mix) => self.mix_dh(*mix)?,
            }
        }
        out.extend_from_slice(&self.symmetric.encrypt_and_hash(payload)?);
        self.message += 1;
        Ok(out)
    }

    /// Consume the peer's next handshake message and return its payload.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>, Error> {
        if self.is_complete() || self.is_our_turn() {
            return Err(
                SessionError::HandshakeFailed("not expecting a handshake message".into()).into(),
            );
        }

        let mut rest = message;
        for token in self.pattern.tokens(self.message) {
            match token {
                Token::E => {
                    if rest.len() < DH_LEN {
                        return Err(SessionError::HandshakeFailed(
                            "truncated ephemeral key".into(),
                        )
                        .into());
                    }
                    let (key, tail) = rest.split_at(DH_LEN);
                    rest = tail;
                    let mut re = [0u8; DH_LEN];
                    re.copy_from_slice(key);
                    self.symmetric.mix_hash(&re);
                    self.re = Some(PublicKey::from(re));
                }
                Token::Dh(mix) => self.mix_dh(*mix)?,
            }
        }
        let payload = self.symmetric.decrypt_and_hash(rest).map_err(|e| match e {
            CryptoError::OpenFailed => Error::from(SessionError::HandshakeFailed(
                "handshake payload failed authentication".into(),
            )),
            other => Error::from(other),
        })?;
        self.message += 1;
        Ok(payload)
    }

    fn mix_dh(&mut self, mix: Mix) -> Result<(), Error> {
        let missing = |what: &str| SessionError::HandshakeFailed(format!("missing {what} key"));
        let (local, remote) = match (mix, self.role) {
            (Mix::Ee, _) => (self.e.as_ref(), self.re.as_ref()),
            (Mix::Ss, _) => (self.s.as_ref(), self.rs.as_ref()),
            (Mix::Es, Role::Initiator) | (Mix::Se, Role::Responder) => {
                (self.e.as_ref(), self.rs.as_ref())
            }
            (Mix::Es, Role::Responder) | (Mix::Se, Role::Initiator) => {
                (self.s.as_ref(), self.re.as_ref())
            }
        };
        let local = local.ok_or_else(|| missing("local"))?;
        let remote = remote.ok_or_else(|| missing("remote"))?;
        let shared = dh(&local.secret, remote)?;
        self.symmetric.mix_key(&shared[..])?;
        Ok(())
    }

    /// Current transcript hash. Final once [`Handshaker::is_complete`].
    pub fn handshake_hash(&self) -> HandshakeHash {
        self.symmetric.handshake_hash()
    }

    /// Derive direction-separated transport keys.
    pub fn finish(self) -> Result<HandshakeOutcome, Error> {
        if !self.is_complete() {
            return Err(SessionError::HandshakeFailed("handshake incomplete".into()).into());
        }
        let (initiator_to_responder, responder_to_initiator) = self.symmetric.split()?;
        let (send_key, recv_key) = match self.role {
            Role::Initiator => (initiator_to_responder, responder_to_initiator),
            Role::Responder => (responder_to_initiator, initiator_to_responder),
        };
        Ok(HandshakeOutcome {
            handshake_hash: self.symmetric.handshake_hash(),
            send_key,
            recv_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rand::rngs::OsRng;

    struct Keys {
        client: Option<StaticSecret>,
        server: Option<StaticSecret>,
    }

    fn keys_for(pattern: HandshakeType) -> Keys {
        Keys {
            client: pattern
                .initiator_static_known()
                .then(|| StaticSecret::random_from_rng(OsRng)),
            server: pattern
                .responder_static_known()
                .then(|| StaticSecret::random_from_rng(OsRng)),
        }
    }

    fn pair(pattern: HandshakeType, prologue: &[u8]) -> (Handshaker, Handshaker) {
        let keys = keys_for(pattern);
        let client_pub = keys.client.as_ref().map(|s| PublicKey::from(s).to_bytes());
        let server_pub = keys.server.as_ref().map(|s| PublicKey::from(s).to_bytes());
        let initiator =
            Handshaker::new(Role::Initiator, pattern, prologue, keys.client, server_pub).unwrap();
        let responder =
            Handshaker::new(Role::Responder, pattern, prologue, keys.server, client_pub).unwrap();
        (initiator, responder)
    }

    fn run(pattern: HandshakeType) {
        let (mut initiator, mut responder) = pair(pattern, b"prologue");
        let m1 = initiator.write_message(&[]).unwrap();
        responder.read_message(&m1).unwrap();
        let m2 = responder.write_message(&[]).unwrap();
        initiator.read_message(&m2).unwrap();

        let i = initiator.finish().unwrap();
        let r = responder.finish().unwrap();
        assert_eq!(i.handshake_hash, r.handshake_hash);
        assert_eq!(*i.send_key, *r.recv_key);
        assert_eq!(*i.recv_key, *r.send_key);
        assert_ne!(*i.send_key, *i.recv_key);
    }

    #[test]
    fn nn_completes() {
        run(HandshakeType::NoiseNN);
    }

    #[test]
    fn nk_completes() {
        run(HandshakeType::NoiseNK);
    }

    #[test]
    fn kn_completes() {
        run(HandshakeType::NoiseKN);
    }

    #[test]
    fn kk_completes() {
        run(HandshakeType::NoiseKK);
    }

    #[test]
    fn message_sizes_follow_pattern() {
        let (mut initiator, mut responder) = pair(HandshakeType::NoiseNN, b"");
        let m1 = initiator.write_message(&[]).unwrap();
        // e, unencrypted empty payload
        assert_eq!(m1.len(), 32);
        responder.read_message(&m1).unwrap();
        // e, ee, encrypted empty payload
        assert_eq!(responder.write_message(&[]).unwrap().len(), 48);

        let (mut initiator, _) = pair(HandshakeType::NoiseNK, b"");
        assert_eq!(initiator.write_message(&[]).unwrap().len(), 48);
    }

    #[test]
    fn prologue_mismatch_fails() {
        let keys = keys_for(HandshakeType::NoiseNN);
        let mut initiator =
            Handshaker::new(Role::Initiator, HandshakeType::NoiseNN, b"a", keys.client, None)
                .unwrap();
        let mut responder =
            Handshaker::new(Role::Responder, HandshakeType::NoiseNN, b"b", None, None).unwrap();

        let m1 = initiator.write_message(&[]).unwrap();
        responder.read_message(&m1).unwrap();
        let m2 = responder.write_message(&[]).unwrap();
        let err = initiator.read_message(&m2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn wrong_responder_static_fails() {
        let server = StaticSecret::random_from_rng(OsRng);
        let impostor = PublicKey::from(&StaticSecret::random_from_rng(OsRng)).to_bytes();
        let mut initiator =
            Handshaker::new(Role::Initiator, HandshakeType::NoiseNK, b"", None, Some(impostor))
                .unwrap();
        let mut responder =
            Handshaker::new(Role::Responder, HandshakeType::NoiseNK, b"", Some(server), None)
                .unwrap();

        let m1 = initiator.write_message(&[]).unwrap();
        assert!(responder.read_message(&m1).is_err());
    }

    #[test]
    fn truncated_message_rejected() {
        let (_, mut responder) = pair(HandshakeType::NoiseNN, b"");
        let err = responder.read_message(&[0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn out_of_turn_rejected() {
        let (mut initiator, mut responder) = pair(HandshakeType::NoiseNN, b"");
        assert!(responder.write_message(&[]).is_err());
        assert!(initiator.read_message(&[0u8; 32]).is_err());
        let m1 = initiator.write_message(&[]).unwrap();
        assert!(initiator.write_message(&[]).is_err());
        responder.read_message(&m1).unwrap();
        assert!(responder.read_message(&m1).is_err());
    }

    #[test]
    fn finish_before_completion_fails() {
        let (initiator, _) = pair(HandshakeType::NoiseKK, b"");
        assert!(initiator.finish().is_err());
    }

    #[test]
    fn static_key_requirements() {
        use HandshakeType::*;
        assert!(check_static_keys(Role::Initiator, NoiseNN, false, false).is_ok());
        assert!(check_static_keys(Role::Initiator, NoiseNK, false, true).is_ok());
        assert!(check_static_keys(Role::Responder, NoiseNK, true, false).is_ok());
        assert!(check_static_keys(Role::Initiator, NoiseKN, true, false).is_ok());
        assert!(check_static_keys(Role::Responder, NoiseKN, false, true).is_ok());
        assert!(check_static_keys(Role::Initiator, NoiseKK, true, true).is_ok());

        assert!(check_static_keys(Role::Initiator, NoiseNK, false, false).is_err());
        assert!(check_static_keys(Role::Responder, NoiseKK, true, false).is_err());
        assert!(check_static_keys(Role::Initiator, NoiseNN, true, false).is_err());
    }

    #[test]
    fn protocol_names() {
        let suite = CipherSuite::X25519ChaChaPolySha256;
        assert_eq!(
            HandshakeType::NoiseKK.protocol_name(suite),
            "Noise_KK_25519_ChaChaPoly_SHA256"
        );
    }
}
