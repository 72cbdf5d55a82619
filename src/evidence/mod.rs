//! Evidence record validation (RFC 4998 and RFC 6283).
//!
//! A record is decoded into the syntax-neutral model of [`types`], then
//! [`validator::EvidenceRecordValidator`] checks every archive timestamp
//! against the supplied data objects and earlier timestamps.
//!
//! # Example
//!
//! ```no_run
//! use ltv_oxide::evidence::{parse_evidence_record, CmsTimestampVerifier, DetachedContent, EvidenceRecordValidator};
//!
//! # fn main() -> ltv_oxide::Result<()> {
//! let record = parse_evidence_record(&std::fs::read("record.ers")?)?;
//! let verifier = CmsTimestampVerifier;
//! let result = EvidenceRecordValidator::new(&record, &verifier)
//!     .with_detached_contents(vec![DetachedContent::new("doc.pdf", std::fs::read("doc.pdf")?)])
//!     .validate()?;
//! println!("{:?}", result.indication());
//! # Ok(())
//! # }
//! ```

pub mod asn1;
pub mod hashtree;
pub mod indication;
pub mod reference;
pub mod report;
pub mod timestamp;
pub mod types;
pub mod validator;
pub mod xml;

pub use indication::{Indication, SubIndication, ValidationConclusion};
pub use reference::{DigestMatcherType, ReferenceValidation};
pub use report::{EvidenceRecordDiagnostic, EvidenceRecordReports, SimpleEvidenceRecordReport};
pub use timestamp::{
    ArchiveTimestampToken, CmsTimestampVerifier, SignatureCheck, TimestampInfo, TimestampVerifier,
    TimestampedObjectType, TimestampedReference,
};
pub use types::{
    is_evidence_record_name, ArchiveTimeStamp, ArchiveTimeStampChain, DigestValueGroup, EvidenceRecord,
    EvidenceRecordType, RenewalKind,
};
pub use validator::{
    parse_evidence_record, ContentResolver, DetachedContent, DetachedData, EmbeddingContext, EvidenceRecordOrigin,
    EvidenceRecordScope, EvidenceRecordValidator, ScopeType, ValidatedEvidenceRecord,
};
