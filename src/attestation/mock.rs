use sha2::{Digest, Sha256};

use super::types::{Endorsements, Evidence, VerifiedAttestation};
use super::{AttestationVerifier, Attester, Endorser};
use crate::error::AttestError;

const EVIDENCE_MARKER: &[u8] = b"FAKE_EVIDENCE_V1\0";
const ENDORSEMENT_MARKER: &[u8] = b"FAKE_ENDORSEMENT_V1\0";

/// Fake attester for testing. Produces evidence containing an application
/// event and the SEC1 key of the session binder paired with it.
///
/// # Security Warning
///
/// Fake evidence proves nothing and must never be used in production.
/// Enable it only via `features = ["mock"]` for development and testing.
pub struct FakeAttester {
    event: Vec<u8>,
    binding_key: Vec<u8>,
}

impl FakeAttester {
    pub fn new(event: impl Into<Vec<u8>>, binding_key: Vec<u8>) -> Self {
        Self {
            event: event.into(),
            binding_key,
        }
    }
}

impl Attester for FakeAttester {
    fn quote(&self) -> Result<Evidence, AttestError> {
        let mut raw = EVIDENCE_MARKER.to_vec();
        for field in [&self.event, &self.binding_key] {
            raw.extend_from_slice(&(field.len() as u32).to_le_bytes());
            raw.extend_from_slice(field);
        }
        Ok(Evidence::new(raw))
    }
}

/// Fake endorser: vouches for evidence on behalf of a named platform.
pub struct FakeEndorser {
    platform: String,
}

impl FakeEndorser {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }
}

impl Endorser for FakeEndorser {
    fn endorse(&self, evidence: &Evidence) -> Result<Endorsements, AttestError> {
        let mut raw = ENDORSEMENT_MARKER.to_vec();
        raw.extend_from_slice(&evidence.digest());
        raw.extend_from_slice(self.platform.as_bytes());
        Ok(Endorsements::new(raw))
    }
}

/// Fake verifier accepting evidence from [`FakeAttester`] that carries the
/// expected event and is endorsed by [`FakeEndorser`] for the expected
/// platform.
pub struct FakeVerifier {
    expected_event: Vec<u8>,
    expected_platform: String,
}

impl FakeVerifier {
    pub fn new(expected_event: impl Into<Vec<u8>>, expected_platform: impl Into<String>) -> Self {
        Self {
            expected_event: expected_event.into(),
            expected_platform: expected_platform.into(),
        }
    }
}

fn take_field<'a>(raw: &mut &'a [u8]) -> Result<&'a [u8], AttestError> {
    let truncated = || AttestError::VerificationFailed("truncated fake evidence".to_string());
    if raw.len() < 4 {
        return Err(truncated());
    }
    let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let rest = &raw[4..];
    if rest.len() < len {
        return Err(truncated());
    }
    let (field, tail) = rest.split_at(len);
    *raw = tail;
    Ok(field)
}

impl AttestationVerifier for FakeVerifier {
    fn verify(
        &self,
        evidence: &Evidence,
        endorsements: &Endorsements,
    ) -> Result<VerifiedAttestation, AttestError> {
        let mut raw = evidence.raw.strip_prefix(EVIDENCE_MARKER).ok_or_else(|| {
            AttestError::VerificationFailed("not a fake evidence document".to_string())
        })?;
        let event = take_field(&mut raw)?;
        let binding_key = take_field(&mut raw)?;
        if !raw.is_empty() {
            return Err(AttestError::VerificationFailed(
                "trailing bytes in fake evidence".to_string(),
            ));
        }

        if event != self.expected_event.as_slice() {
            return Err(AttestError::VerificationFailed(format!(
                "unexpected event {}",
                hex::encode(event)
            )));
        }
        if binding_key.is_empty() {
            return Err(AttestError::MissingField("binding key".to_string()));
        }

        let evidence_hash: [u8; 32] = Sha256::digest(&evidence.raw).into();
        let endorsed = endorsements
            .raw
            .strip_prefix(ENDORSEMENT_MARKER)
            .and_then(|rest| rest.strip_prefix(&evidence_hash[..]))
            .ok_or_else(|| {
                AttestError::VerificationFailed("evidence is not endorsed".to_string())
            })?;
        if endorsed != self.expected_platform.as_bytes() {
            return Err(AttestError::VerificationFailed(format!(
                "endorsed for platform {:?}",
                String::from_utf8_lossy(endorsed)
            )));
        }

        Ok(VerifiedAttestation {
            evidence_hash,
            binding_key: binding_key.to_vec(),
            measurements: vec![event.to_vec()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endorsed(event: &[u8], platform: &str) -> (Evidence, Endorsements) {
        let evidence = FakeAttester::new(event, vec![0x04; 65]).quote().unwrap();
        let endorsements = FakeEndorser::new(platform).endorse(&evidence).unwrap();
        (evidence, endorsements)
    }

    #[test]
    fn accepts_matching_evidence() {
        let (evidence, endorsements) = endorsed(b"app-v1", "fake-platform");
        let verified = FakeVerifier::new(b"app-v1".to_vec(), "fake-platform")
            .verify(&evidence, &endorsements)
            .unwrap();
        assert_eq!(verified.binding_key, vec![0x04; 65]);
        assert_eq!(verified.measurements, vec![b"app-v1".to_vec()]);
        assert_eq!(verified.evidence_hash, evidence.digest());
    }

    #[test]
    fn rejects_wrong_event() {
        let (evidence, endorsements) = endorsed(b"app-v2", "fake-platform");
        assert!(FakeVerifier::new(b"app-v1".to_vec(), "fake-platform")
            .verify(&evidence, &endorsements)
            .is_err());
    }

    #[test]
    fn rejects_wrong_platform() {
        let (evidence, endorsements) = endorsed(b"app-v1", "other-platform");
        assert!(FakeVerifier::new(b"app-v1".to_vec(), "fake-platform")
            .verify(&evidence, &endorsements)
            .is_err());
    }

    #[test]
    fn rejects_missing_endorsements() {
        let (evidence, _) = endorsed(b"app-v1", "fake-platform");
        assert!(FakeVerifier::new(b"app-v1".to_vec(), "fake-platform")
            .verify(&evidence, &Endorsements::default())
            .is_err());
    }

    #[test]
    fn rejects_truncated_evidence() {
        let (evidence, endorsements) = endorsed(b"app-v1", "fake-platform");
        let truncated = Evidence::new(evidence.raw[..evidence.raw.len() - 1].to_vec());
        assert!(FakeVerifier::new(b"app-v1".to_vec(), "fake-platform")
            .verify(&truncated, &endorsements)
            .is_err());
    }
}
