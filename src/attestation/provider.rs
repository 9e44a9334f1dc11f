//! Per-session attestation work: gathering this side's endorsed evidence,
//! verifying the peer's, and producing or checking session bindings.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::binding::verify_binding;
use super::types::{EndorsedEvidence, Endorsements, EvidenceMap, ExpectedMeasurements, VerifiedAttestation};
use super::{AttestationVerifier, Attester, Endorser, SessionBinder};
use crate::error::AttestError;

/// Verified peer attestations keyed by attester id.
pub type VerifiedAttestations = BTreeMap<String, VerifiedAttestation>;

/// Quote every configured attester and pair each result with the
/// endorsements of the endorser registered under the same id.
pub fn collect_evidence(
    attesters: &BTreeMap<String, Box<dyn Attester>>,
    endorsers: &BTreeMap<String, Box<dyn Endorser>>,
) -> Result<EvidenceMap, AttestError> {
    let mut map = EvidenceMap::new();
    for (id, attester) in attesters {
        let evidence = attester.quote().map_err(|e| {
            tracing::warn!(attester = %id, "attestation generation failed: {e}");
            e
        })?;
        let endorsements = match endorsers.get(id) {
            Some(endorser) => endorser.endorse(&evidence)?,
            None => Endorsements::default(),
        };
        tracing::debug!(
            attester = %id,
            evidence_hash = hex::encode(evidence.digest()),
            "collected self evidence"
        );
        map.insert(
            id.clone(),
            EndorsedEvidence {
                evidence,
                endorsements,
            },
        );
    }
    Ok(map)
}

/// Run every configured verifier over the peer evidence with the same id.
///
/// All verifiers must succeed; evidence for which no verifier is
/// configured is ignored.
pub fn verify_peer_evidence(
    verifiers: &BTreeMap<String, Box<dyn AttestationVerifier>>,
    evidence: &EvidenceMap,
    expected_measurements: Option<&ExpectedMeasurements>,
) -> Result<VerifiedAttestations, AttestError> {
    let mut verified_all = VerifiedAttestations::new();
    for (id, verifier) in verifiers {
        let endorsed = evidence
            .get(id)
            .ok_or_else(|| AttestError::MissingField(format!("evidence for attester {id}")))?;

        let verified = verifier
            .verify(&endorsed.evidence, &endorsed.endorsements)
            .map_err(|e| {
                tracing::warn!(attester = %id, "attestation verification failed: {e}");
                e
            })?;

        tracing::info!(
            attester = %id,
            evidence_hash = hex::encode(verified.evidence_hash),
            measurement_count = verified.measurements.len(),
            "attestation verification succeeded"
        );
        tracing::debug!(
            measurements = ?verified.measurements.iter().map(hex::encode).collect::<Vec<_>>(),
            "peer attestation measurements"
        );

        if let Some(expected) = expected_measurements {
            expected.verify(&verified.measurements)?;
            tracing::info!(
                attester = %id,
                expected_count = expected.values.len(),
                "measurement verification passed"
            );
        }

        verified_all.insert(id.clone(), verified);
    }
    Ok(verified_all)
}

/// Sign `input` with every configured session binder.
pub fn bind_session(
    binders: &BTreeMap<String, Box<dyn SessionBinder>>,
    input: &[u8],
) -> Result<BTreeMap<String, Bytes>, AttestError> {
    binders
        .iter()
        .map(|(id, binder)| Ok((id.clone(), Bytes::from(binder.bind(input)?))))
        .collect()
}

/// Check that every verified peer attestation is bound to this session.
pub fn verify_session_bindings(
    verified: &VerifiedAttestations,
    bindings: &BTreeMap<String, Bytes>,
    input: &[u8],
) -> Result<(), AttestError> {
    for (id, attestation) in verified {
        let binding = bindings
            .get(id)
            .ok_or_else(|| AttestError::MissingBinding(id.clone()))?;
        verify_binding(id, &attestation.binding_key, input, binding).map_err(|e| {
            tracing::warn!(attester = %id, "session binding rejected: {e}");
            e
        })?;
    }
    Ok(())
}
