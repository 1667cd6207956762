use async_trait::async_trait;
use plume_core::{Record, Timestamp};

use crate::source::{Verification, Verifier};

/// Largest accepted clock skew of `created_at` into the future
pub const MAX_FUTURE_SKEW_SECS: u64 = 15 * 60;

/// Structural sanity checks, for hosts without a signature backend
///
/// Rejects all-zero ids, authors and signatures, and timestamps too far in
/// the future. It does not check signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralVerifier;

impl StructuralVerifier {
    pub fn check(record: &Record, now: Timestamp) -> Verification {
        if record.id.is_zero() {
            return Verification::invalid("Record id is empty");
        }
        if record.author.is_zero() {
            return Verification::invalid("Author id is empty");
        }
        if record.sig.is_zero() {
            return Verification::invalid("Signature is empty");
        }
        if now.saturating_add_secs(MAX_FUTURE_SKEW_SECS) < record.created_at {
            return Verification::invalid(format!(
                "Created {}s in the future",
                record.created_at.0.saturating_sub(now.0)
            ));
        }
        Verification::valid()
    }
}

#[async_trait]
impl Verifier for StructuralVerifier {
    async fn verify(&self, record: &Record) -> Verification {
        Self::check(record, Timestamp::now())
    }
}

#[cfg(test)]
mod tests {
    use plume_core::{AuthorId, RecordId, RecordSignature};

    use super::*;

    fn record(sig: u8, created_at: u64) -> Record {
        Record::builder()
            .id(RecordId::from_bytes([1; 32]))
            .author(AuthorId::from_bytes([2; 32]))
            .created_at(Timestamp(created_at))
            .sig(RecordSignature::from_bytes([sig; 64]))
            .build()
    }

    #[test]
    fn accepts_sane_records() {
        assert!(StructuralVerifier::check(&record(3, 1000), Timestamp(1000)).valid);
        assert!(StructuralVerifier::check(&record(3, 1000 + MAX_FUTURE_SKEW_SECS), Timestamp(1000)).valid);
    }

    #[test]
    fn rejects_empty_signature_and_future_timestamps() {
        let empty_sig = StructuralVerifier::check(&record(0, 1000), Timestamp(1000));
        assert!(!empty_sig.valid);
        assert_eq!(empty_sig.reason.as_deref(), Some("Signature is empty"));

        let future = StructuralVerifier::check(&record(3, 5000), Timestamp(1000));
        assert!(!future.valid);
        assert_eq!(future.reason.as_deref(), Some("Created 4000s in the future"));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn verify_uses_wall_clock() {
        let verification = StructuralVerifier.verify(&record(3, Timestamp::now().0)).await;
        assert_eq!(verification, Verification::valid());
    }
}
