//! Diagnostic and simple reports of validated evidence records.

use crate::error::Result;
use crate::evidence::indication::{Indication, SubIndication};
use crate::evidence::reference::ReferenceValidation;
use crate::evidence::timestamp::TimestampedReference;
use crate::evidence::validator::{EvidenceRecordScope, ValidatedEvidenceRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-timestamp part of the diagnostic report.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampDiagnostic {
    /// Token identifier
    pub id: String,
    /// Generation time
    pub production_time: DateTime<Utc>,
    /// Message imprint digest was recomputed
    pub message_imprint_data_found: bool,
    /// Message imprint digest matched
    pub message_imprint_data_intact: bool,
    /// Token signature intact
    pub signature_intact: bool,
    /// Digest matchers
    pub digest_matchers: Vec<ReferenceValidation>,
    /// Covered objects
    pub timestamped_objects: Vec<TimestampedReference>,
}

/// Full account of one evidence record validation.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecordDiagnostic {
    /// Record identifier
    pub id: String,
    /// File or entry name
    pub filename: Option<String>,
    /// Record-level digest matchers
    pub digest_matchers: Vec<ReferenceValidation>,
    /// Archive timestamps
    pub timestamps: Vec<TimestampDiagnostic>,
    /// Covered documents
    pub scopes: Vec<EvidenceRecordScope>,
    /// Union of the timestamped objects
    pub timestamped_objects: Vec<TimestampedReference>,
}

impl From<&ValidatedEvidenceRecord> for EvidenceRecordDiagnostic {
    fn from(record: &ValidatedEvidenceRecord) -> Self {
        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            digest_matchers: record.reference_validations.clone(),
            timestamps: record
                .timestamps
                .iter()
                .map(|t| TimestampDiagnostic {
                    id: t.id.clone(),
                    production_time: t.generation_time(),
                    message_imprint_data_found: t.is_message_imprint_data_found(),
                    message_imprint_data_intact: t.is_message_imprint_data_intact(),
                    signature_intact: t.is_signature_intact(),
                    digest_matchers: t.reference_validations.clone(),
                    timestamped_objects: t.timestamped_references.clone(),
                })
                .collect(),
            scopes: record.scopes.clone(),
            timestamped_objects: record.timestamped_references(),
        }
    }
}

/// Outcome summary of one evidence record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimpleEvidenceRecordReport {
    /// Record identifier
    pub id: String,
    /// Indication
    pub indication: Indication,
    /// Sub-indication
    pub sub_indication: Option<SubIndication>,
    /// Proof of existence
    pub poe_time: Option<DateTime<Utc>>,
}

impl From<&ValidatedEvidenceRecord> for SimpleEvidenceRecordReport {
    fn from(record: &ValidatedEvidenceRecord) -> Self {
        Self {
            id: record.id.clone(),
            indication: record.indication(),
            sub_indication: record.sub_indication(),
            poe_time: record.poe_time,
        }
    }
}

/// Both reports of a validation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecordReports {
    /// Summary
    pub simple: SimpleEvidenceRecordReport,
    /// Details
    pub diagnostic: EvidenceRecordDiagnostic,
}

impl EvidenceRecordReports {
    /// Build both reports.
    pub fn new(record: &ValidatedEvidenceRecord) -> Self {
        Self {
            simple: record.into(),
            diagnostic: record.into(),
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
