pub mod attestation;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod session;

// Re-export key types at crate root for convenience.
pub use error::{Error, ErrorKind, Result};
pub use frame::{SessionRequest, SessionResponse, WireMessage};
pub use session::channel::{Message, SecureChannel};
pub use session::client::ClientSession;
pub use session::server::ServerSession;
pub use session::{
    HandshakeType, IdentityKey, ProtocolEngine, Session, SessionConfig, SessionConfigBuilder,
    SessionState,
};

pub use attestation::binding::SigningKeyBinder;
pub use attestation::{AttestationType, AttestationVerifier, Attester, Endorser, SessionBinder};

#[cfg(feature = "mock")]
pub use attestation::mock::{FakeAttester, FakeEndorser, FakeVerifier};
