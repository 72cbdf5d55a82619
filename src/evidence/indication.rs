//! ETSI indication and sub-indication of a validated evidence record.

use crate::evidence::reference::ReferenceValidation;
use crate::evidence::timestamp::ArchiveTimestampToken;
use serde::Serialize;

/// Main validation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Indication {
    /// All checks succeeded
    Passed,
    /// A check failed
    Failed,
    /// Checks could not be completed
    Indeterminate,
}

/// Reason attached to FAILED and INDETERMINATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubIndication {
    /// A located object or timestamp has a different digest
    HashFailure,
    /// An archived data object was not supplied
    SignedDataNotFound,
    /// A timestamp signature does not cover its content
    SigCryptoFailure,
}

/// Indication with its optional sub-indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationConclusion {
    /// Indication
    pub indication: Indication,
    /// Sub-indication, absent for PASSED
    pub sub_indication: Option<SubIndication>,
}

impl ValidationConclusion {
    fn passed() -> Self {
        Self {
            indication: Indication::Passed,
            sub_indication: None,
        }
    }

    fn with(indication: Indication, sub_indication: SubIndication) -> Self {
        Self {
            indication,
            sub_indication: Some(sub_indication),
        }
    }
}

/// Classify a record from its record-level references and timestamps.
///
/// Evaluated in this order, first hit wins:
/// 1. an unresolved data object while completeness is required, or no data
///    object located at all: INDETERMINATE / SIGNED_DATA_NOT_FOUND
/// 2. a located reference that is not intact, or a message imprint mismatch:
///    FAILED / HASH_FAILURE
/// 3. a timestamp signature that is not intact: FAILED / SIG_CRYPTO_FAILURE
/// 4. PASSED
pub fn classify(
    record_references: &[ReferenceValidation],
    timestamps: &[ArchiveTimestampToken],
    require_all_data_objects: bool,
) -> ValidationConclusion {
    let all_references = || {
        record_references
            .iter()
            .chain(timestamps.iter().flat_map(|t| t.reference_validations.iter()))
    };
    let data_references = || all_references().filter(|r| r.matcher_type().is_data_object());

    let missing = data_references().any(|r| !r.is_found());
    let located = data_references().any(|r| r.is_found());
    if (require_all_data_objects && missing) || !located {
        return ValidationConclusion::with(Indication::Indeterminate, SubIndication::SignedDataNotFound);
    }

    let broken_reference = all_references().any(|r| r.is_found() && !r.is_intact());
    let broken_imprint = timestamps.iter().any(|t| !t.is_message_imprint_data_intact());
    if broken_reference || broken_imprint {
        return ValidationConclusion::with(Indication::Failed, SubIndication::HashFailure);
    }

    if timestamps.iter().any(|t| !t.is_signature_intact()) {
        return ValidationConclusion::with(Indication::Failed, SubIndication::SigCryptoFailure);
    }

    ValidationConclusion::passed()
}
