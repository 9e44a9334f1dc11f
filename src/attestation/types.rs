use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AttestError;

/// Raw evidence bytes produced by an attester (opaque to the session layer).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    pub raw: Vec<u8>,
}

impl Evidence {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    /// SHA-256 of the raw evidence, used when logging and in verification results.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(&self.raw).into()
    }
}

/// Raw endorsement bytes vouching for a piece of evidence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endorsements {
    pub raw: Vec<u8>,
}

impl Endorsements {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }
}

/// Evidence together with its endorsements, as exchanged on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndorsedEvidence {
    pub evidence: Evidence,
    pub endorsements: Endorsements,
}

/// Endorsed evidence keyed by attester id.
pub type EvidenceMap = BTreeMap<String, EndorsedEvidence>;

/// Expected measurement values to verify against a peer attestation.
///
/// Maps measurement indices (event log positions) to their expected byte
/// values. Only the indices present in this map are checked.
#[derive(Debug, Clone, Default)]
pub struct ExpectedMeasurements {
    pub values: BTreeMap<usize, Vec<u8>>,
}

impl ExpectedMeasurements {
    pub fn new(values: BTreeMap<usize, Vec<u8>>) -> Self {
        Self { values }
    }

    /// Verify that all expected measurements match the actual values.
    pub fn verify(&self, actual: &[Vec<u8>]) -> Result<(), AttestError> {
        for (&idx, expected) in &self.values {
            match actual.get(idx) {
                Some(actual_val) => {
                    if !bool::from(actual_val.as_slice().ct_eq(expected.as_slice())) {
                        return Err(AttestError::VerificationFailed(format!(
                            "measurement[{idx}] mismatch: expected {}, got {}",
                            hex::encode(expected),
                            hex::encode(actual_val),
                        )));
                    }
                }
                None => {
                    return Err(AttestError::MissingField(format!("measurement[{idx}]")));
                }
            }
        }
        Ok(())
    }
}

/// The result of a successful attestation verification.
#[derive(Debug, Clone)]
pub struct VerifiedAttestation {
    /// Hash of the evidence document.
    pub evidence_hash: [u8; 32],

    /// SEC1-encoded P-256 key the attester's session binder signs with.
    pub binding_key: Vec<u8>,

    /// Measurements or event log entries (platform-specific).
    pub measurements: Vec<Vec<u8>>,
}
