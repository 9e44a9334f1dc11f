use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use super::HandshakeHash;
use crate::error::CryptoError;
use crate::frame::PROTOCOL_VERSION;

const PROLOGUE_LABEL: &[u8] = b"cs-attestation-prologue";
const BINDING_LABEL: &[u8] = b"cs-attestation-binding";
const TOKEN_SALT: &[u8] = b"session-binding-token";

/// Noise prologue committing the handshake to the attestation exchange.
///
/// `prologue = SHA256(label || version || len(req) || req || len(resp) || resp)`
/// over the canonical encodings of both attestation messages.
pub fn attestation_prologue(request: &[u8], response: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(PROLOGUE_LABEL);
    hasher.update([PROTOCOL_VERSION]);
    hasher.update((request.len() as u64).to_be_bytes());
    hasher.update(request);
    hasher.update((response.len() as u64).to_be_bytes());
    hasher.update(response);
    hasher.finalize().into()
}

/// The value an attester's session binder signs to tie its evidence to
/// this particular handshake.
pub fn attestation_binding_input(handshake_hash: &HandshakeHash) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(BINDING_LABEL);
    hasher.update(handshake_hash);
    hasher.finalize().into()
}

/// Derive a session binding token for the caller-supplied `info` label.
///
/// Both peers of a session derive the same token for the same `info`;
/// distinct labels yield unrelated tokens.
pub fn session_binding_token(
    handshake_hash: &HandshakeHash,
    info: &[u8],
) -> Result<[u8; 32], CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(TOKEN_SALT), handshake_hash);
    let mut token = [0u8; 32];
    hkdf.expand(info, &mut token)
        .map_err(|_| CryptoError::HkdfExpandFailed)?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prologue_deterministic() {
        let a = attestation_prologue(b"request", b"response");
        let b = attestation_prologue(b"request", b"response");
        assert_eq!(a, b);
    }

    #[test]
    fn prologue_is_not_ambiguous_on_boundaries() {
        let a = attestation_prologue(b"requestr", b"esponse");
        let b = attestation_prologue(b"request", b"response");
        assert_ne!(a, b);
    }

    #[test]
    fn token_deterministic_per_info() {
        let hash = [0xCC; 32];
        let t1 = session_binding_token(&hash, b"info").unwrap();
        let t2 = session_binding_token(&hash, b"info").unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn token_differs_across_info() {
        let hash = [0xCC; 32];
        let t1 = session_binding_token(&hash, b"info").unwrap();
        let t2 = session_binding_token(&hash, b"wrong info").unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn token_differs_across_sessions() {
        let t1 = session_binding_token(&[0xCC; 32], b"info").unwrap();
        let t2 = session_binding_token(&[0xDD; 32], b"info").unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn binding_input_is_domain_separated_from_tokens() {
        let hash = [0x11; 32];
        let input = attestation_binding_input(&hash);
        let token = session_binding_token(&hash, BINDING_LABEL).unwrap();
        assert_ne!(input, token);
    }
}
