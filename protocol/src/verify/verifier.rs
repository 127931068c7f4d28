use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    CheckStatus, VerificationChecks, VerificationError, VerificationResult, VerifiedRecord,
    VerifyContext, VerifyMode,
};
use crate::config::{millis, Network, MAX_CLOCK_SKEW, POW_MAX_AGE};
use crate::crypto::hash::{sha256, sha3_256};
use crate::crypto::signatures::{SignatureError, SignaturePolicy};
use crate::pow::{DifficultyParams, FixedCostPow, MemoryHardPow, MemoryHardSchedule, PowStrategy};
use crate::record::{canonical_bytes, record_hash, validate_name, NameRecord};

/// Runs every record check. Stateless apart from the difficulty schedules,
/// so one instance is shared by everything on a node.
#[derive(Debug, Clone)]
pub struct RecordVerifier {
    fixed: FixedCostPow,
    memory_hard: MemoryHardPow,
}

impl Default for RecordVerifier {
    fn default() -> Self {
        Self::for_network(Network::default())
    }
}

impl RecordVerifier {
    pub fn new(schedule: MemoryHardSchedule) -> Self {
        Self {
            fixed: FixedCostPow,
            memory_hard: MemoryHardPow::new(schedule),
        }
    }

    pub fn for_network(network: Network) -> Self {
        Self::new(MemoryHardSchedule::for_network(network))
    }

    /// The proof-of-work strategy that applies to `record`'s version.
    pub fn strategy_for(&self, record: &NameRecord) -> &dyn PowStrategy {
        match record {
            NameRecord::V1(_) => &self.fixed,
            NameRecord::V2(_) => &self.memory_hard,
        }
    }

    pub fn memory_hard(&self) -> &MemoryHardPow {
        &self.memory_hard
    }

    /// Run every check on `record`. `previous` is the record this one claims
    /// to replace, when the caller knows it.
    pub fn verify(
        &self,
        record: &NameRecord,
        previous: Option<&NameRecord>,
        ctx: &VerifyContext,
    ) -> VerificationResult {
        let mut errors = Vec::new();
        let reference_ms = ctx.reference_ms(record);

        let version = status(check_version(record), &mut errors);
        let name = status(validate_name(record.name()).map_err(Into::into), &mut errors);
        let expiry = status(check_expiry(record, ctx), &mut errors);
        let proof_of_work = status(
            self.strategy_for(record)
                .verify(
                    record.name(),
                    record.owner_key().as_bytes(),
                    record.proof(),
                    reference_ms,
                )
                .map_err(Into::into),
            &mut errors,
        );

        // Signature and hash both need the canonical bytes; if those cannot
        // be produced both checks fail with the same cause.
        let (signature, hash) = match canonical_bytes(record) {
            Ok(canonical) => (
                status(check_signature(record, &canonical, reference_ms), &mut errors),
                status(check_hash(record, &canonical), &mut errors),
            ),
            Err(e) => {
                errors.push(e.into());
                (CheckStatus::Failed, CheckStatus::Failed)
            }
        };

        let chain = match check_chain(record, previous) {
            Ok(status) => status,
            Err(e) => {
                errors.push(e);
                CheckStatus::Failed
            }
        };

        let checks = VerificationChecks {
            version,
            name,
            expiry,
            proof_of_work,
            signature,
            chain,
            hash,
        };
        let valid = checks.all_ok() && errors.is_empty();

        debug!(
            name = record.name(),
            version = record.version(),
            valid,
            mode = ?ctx.mode,
            "record verified"
        );

        VerificationResult {
            valid,
            quantum_secure: valid && record.is_quantum(),
            errors,
            checks,
        }
    }

    /// Verify and, on success, hand back the record as a [`VerifiedRecord`].
    /// On failure the first error is returned; forged signatures and stale
    /// hybrid timestamps are logged on the security target.
    pub fn admit(
        &self,
        record: NameRecord,
        previous: Option<&NameRecord>,
        ctx: &VerifyContext,
    ) -> Result<VerifiedRecord, VerificationError> {
        let result = self.verify(&record, previous, ctx);
        if result.valid {
            return Ok(VerifiedRecord::admitted(record));
        }

        let error = result
            .errors
            .into_iter()
            .next()
            .unwrap_or(VerificationError::Signature(SignatureError::VerificationFailed));
        if error.class().is_security_event() {
            warn!(
                target: "moniker::security",
                name = record.name(),
                did = %record.did(),
                error = %error,
                "forged or stale record rejected"
            );
        } else {
            warn!(name = record.name(), error = %error, "record rejected");
        }
        Err(error)
    }

    /// [`admit`](Self::admit) on tokio's blocking pool. Argon2 at mainnet
    /// cost and Dilithium verification must stay off the async workers.
    pub async fn admit_blocking(
        self: &Arc<Self>,
        record: NameRecord,
        previous: Option<NameRecord>,
        ctx: VerifyContext,
    ) -> Result<VerifiedRecord, VerificationError> {
        let verifier = Arc::clone(self);
        tokio::task::spawn_blocking(move || verifier.admit(record, previous.as_ref(), &ctx))
            .await
            .map_err(|e| VerificationError::TaskFailed(e.to_string()))?
    }
}

fn status(result: Result<(), VerificationError>, errors: &mut Vec<VerificationError>) -> CheckStatus {
    match result {
        Ok(()) => CheckStatus::Passed,
        Err(e) => {
            errors.push(e);
            CheckStatus::Failed
        }
    }
}

fn check_version(record: &NameRecord) -> Result<(), VerificationError> {
    let matches = match record {
        NameRecord::V1(r) => matches!(r.proof.params, DifficultyParams::Fixed { .. }),
        NameRecord::V2(r) => matches!(r.proof.params, DifficultyParams::MemoryHard { .. }),
    };
    if matches {
        Ok(())
    } else {
        Err(VerificationError::VersionMismatch {
            version: record.version(),
        })
    }
}

/// `registered` may never run ahead of `now` by more than the clock skew.
/// A live submission must also have been registered within the PoW window.
fn check_expiry(record: &NameRecord, ctx: &VerifyContext) -> Result<(), VerificationError> {
    let registered = record.registered();
    if record.expires() <= registered {
        return Err(VerificationError::ExpiresBeforeRegistered);
    }
    if registered > ctx.now_ms.saturating_add(millis(MAX_CLOCK_SKEW)) {
        return Err(VerificationError::RegisteredInFuture {
            ahead_ms: registered - ctx.now_ms,
        });
    }
    if ctx.mode == VerifyMode::Submission {
        let age_ms = ctx.now_ms.saturating_sub(registered);
        if age_ms > millis(POW_MAX_AGE) {
            return Err(VerificationError::RegisteredTooOld { age_ms });
        }
    }
    if record.is_expired_at(ctx.now_ms) {
        return Err(VerificationError::Expired {
            expires: record.expires(),
            now: ctx.now_ms,
        });
    }
    Ok(())
}

fn check_signature(
    record: &NameRecord,
    canonical: &[u8],
    reference_ms: u64,
) -> Result<(), VerificationError> {
    match record {
        NameRecord::V1(r) => {
            if r.owner.verify(canonical, &r.signature) {
                Ok(())
            } else {
                Err(SignatureError::VerificationFailed.into())
            }
        }
        NameRecord::V2(r) => Ok(r.owner.verify_detailed(
            canonical,
            &r.signature,
            &SignaturePolicy::at(reference_ms),
        )?),
    }
}

fn check_hash(record: &NameRecord, canonical: &[u8]) -> Result<(), VerificationError> {
    if record.declared_hash() != &sha256(canonical) {
        return Err(VerificationError::HashMismatch { algorithm: "sha256" });
    }
    if let NameRecord::V2(r) = record {
        if r.hash_sha3 != sha3_256(canonical) {
            return Err(VerificationError::HashMismatch { algorithm: "sha3-256" });
        }
    }
    Ok(())
}

fn check_chain(
    record: &NameRecord,
    previous: Option<&NameRecord>,
) -> Result<CheckStatus, VerificationError> {
    match (previous, record.previous_hash()) {
        (Some(prev), Some(claimed)) => {
            if prev.name() != record.name() {
                return Err(VerificationError::PreviousNameMismatch {
                    previous: prev.name().to_string(),
                    name: record.name().to_string(),
                });
            }
            if claimed != &record_hash(prev)? {
                return Err(VerificationError::PreviousHashMismatch);
            }
            if record.revision() <= prev.revision() {
                return Err(VerificationError::StaleRevision {
                    revision: record.revision(),
                    previous: prev.revision(),
                });
            }
            if prev.did() != record.did() {
                return Err(VerificationError::OwnerChanged);
            }
            Ok(CheckStatus::Passed)
        }
        (Some(_), None) => Err(VerificationError::MissingPreviousHash),
        (None, None) if record.revision() == 0 => Ok(CheckStatus::Passed),
        (None, None) => match record {
            NameRecord::V2(_) => Err(VerificationError::MissingPreviousHash),
            NameRecord::V1(_) => Err(VerificationError::OrphanUpdate(record.revision())),
        },
        // The claimed predecessor is unknown here; nothing to compare.
        (None, Some(_)) => Ok(CheckStatus::Skipped),
    }
}
