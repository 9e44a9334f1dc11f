pub mod binding;
pub mod provider;
pub mod types;

#[cfg(feature = "mock")]
pub mod mock;

use crate::error::AttestError;
use types::{Endorsements, Evidence, VerifiedAttestation};

/// Which side(s) of a session present attestation evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationType {
    /// Both peers attest and verify each other.
    Bidirectional,
    /// This side attests; the peer is not verified.
    SelfUnidirectional,
    /// The peer attests and this side verifies it.
    PeerUnidirectional,
    /// Neither side attests.
    Unattested,
}

impl AttestationType {
    /// Whether this side sends evidence of its own.
    pub fn attests_self(self) -> bool {
        matches!(self, Self::Bidirectional | Self::SelfUnidirectional)
    }

    /// Whether this side requires and verifies peer evidence.
    pub fn verifies_peer(self) -> bool {
        matches!(self, Self::Bidirectional | Self::PeerUnidirectional)
    }
}

/// Produces evidence about the environment this session runs in.
pub trait Attester: Send {
    fn quote(&self) -> Result<Evidence, AttestError>;
}

/// Supplies endorsements vouching for a piece of evidence.
pub trait Endorser: Send {
    fn endorse(&self, evidence: &Evidence) -> Result<Endorsements, AttestError>;
}

/// Verifier that validates peer evidence against its endorsements and
/// returns the extracted claims.
pub trait AttestationVerifier: Send {
    fn verify(
        &self,
        evidence: &Evidence,
        endorsements: &Endorsements,
    ) -> Result<VerifiedAttestation, AttestError>;
}

/// Signs session binding inputs with a key whose public half is carried
/// in this side's evidence.
pub trait SessionBinder: Send {
    fn bind(&self, input: &[u8]) -> Result<Vec<u8>, AttestError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attestation_type_roles() {
        assert!(AttestationType::Bidirectional.attests_self());
        assert!(AttestationType::Bidirectional.verifies_peer());
        assert!(AttestationType::SelfUnidirectional.attests_self());
        assert!(!AttestationType::SelfUnidirectional.verifies_peer());
        assert!(!AttestationType::PeerUnidirectional.attests_self());
        assert!(AttestationType::PeerUnidirectional.verifies_peer());
        assert!(!AttestationType::Unattested.attests_self());
        assert!(!AttestationType::Unattested.verifies_peer());
    }
}
