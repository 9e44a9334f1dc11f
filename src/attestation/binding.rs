use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use super::SessionBinder;
use crate::error::AttestError;

/// ECDSA P-256 session binder.
///
/// The SEC1 encoding of [`SigningKeyBinder::verifying_key_bytes`] is what an
/// attester embeds in its evidence so the peer can check bindings.
pub struct SigningKeyBinder {
    signing_key: SigningKey,
}

impl SigningKeyBinder {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Load a binder from a 32-byte big-endian scalar.
    pub fn from_bytes(secret: &[u8]) -> Result<Self, AttestError> {
        let signing_key = SigningKey::from_slice(secret)
            .map_err(|_| AttestError::GenerationFailed("invalid P-256 signing key".into()))?;
        Ok(Self { signing_key })
    }

    /// Uncompressed SEC1 encoding of the public key.
    pub fn verifying_key_bytes(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }
}

impl SessionBinder for SigningKeyBinder {
    fn bind(&self, input: &[u8]) -> Result<Vec<u8>, AttestError> {
        let signature: Signature = self.signing_key.sign(input);
        Ok(signature.to_bytes().to_vec())
    }
}

/// Check a session binding produced by [`SigningKeyBinder`].
///
/// `attester_id` is only used to label the error.
pub fn verify_binding(
    attester_id: &str,
    binding_key: &[u8],
    input: &[u8],
    binding: &[u8],
) -> Result<(), AttestError> {
    let verifying_key = VerifyingKey::from_sec1_bytes(binding_key).map_err(|_| {
        AttestError::VerificationFailed(format!("attester {attester_id}: malformed binding key"))
    })?;
    let signature = Signature::from_slice(binding)
        .map_err(|_| AttestError::InvalidBinding(attester_id.to_string()))?;
    verifying_key
        .verify(input, &signature)
        .map_err(|_| AttestError::InvalidBinding(attester_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_verifies_under_own_key() {
        let binder = SigningKeyBinder::generate();
        let sig = binder.bind(b"handshake hash").unwrap();
        verify_binding("tee", &binder.verifying_key_bytes(), b"handshake hash", &sig).unwrap();
    }

    #[test]
    fn binding_over_other_input_rejected() {
        let binder = SigningKeyBinder::generate();
        let sig = binder.bind(b"session one").unwrap();
        let err =
            verify_binding("tee", &binder.verifying_key_bytes(), b"session two", &sig).unwrap_err();
        assert!(matches!(err, AttestError::InvalidBinding(id) if id == "tee"));
    }

    #[test]
    fn binding_from_other_key_rejected() {
        let signer = SigningKeyBinder::generate();
        let other = SigningKeyBinder::generate();
        let sig = signer.bind(b"input").unwrap();
        assert!(verify_binding("tee", &other.verifying_key_bytes(), b"input", &sig).is_err());
    }

    #[test]
    fn malformed_key_rejected() {
        let err = verify_binding("tee", &[0x04; 10], b"input", &[0u8; 64]).unwrap_err();
        assert!(matches!(err, AttestError::VerificationFailed(_)));
    }

    #[test]
    fn from_bytes_is_deterministic() {
        let a = SigningKeyBinder::from_bytes(&[7u8; 32]).unwrap();
        let b = SigningKeyBinder::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(a.verifying_key_bytes(), b.verifying_key_bytes());
        assert!(SigningKeyBinder::from_bytes(&[0u8; 32]).is_err());
    }
}
