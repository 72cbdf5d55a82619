//! Evidence record validation.
//!
//! [`EvidenceRecordValidator`] walks the archive timestamps of a record in
//! renewal order, matches every hash tree against the supplied data objects
//! and the earlier timestamps, and produces an immutable
//! [`ValidatedEvidenceRecord`].

use crate::config::ValidationConfig;
use crate::digest::{Digest, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::evidence::asn1::parse_asn1_evidence_record;
use crate::evidence::hashtree::{compute_root, sequence_digest, timestamp_renewal_digest};
use crate::evidence::indication::{classify, Indication, SubIndication, ValidationConclusion};
use crate::evidence::reference::{DigestMatcherType, ReferenceValidation, ReferenceValidationBuilder};
use crate::evidence::timestamp::{
    ArchiveTimestampToken, TimestampVerifier, TimestampedObjectType, TimestampedReference,
};
use crate::evidence::types::{
    is_evidence_record_name, ArchiveTimeStamp, DigestValueGroup, EvidenceRecord, EvidenceRecordType, RenewalKind,
};
use crate::evidence::xml::parse_xml_evidence_record;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Content of a detached data object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachedData {
    /// Full content
    Binary(Bytes),
    /// Only precomputed digests are known
    Digests(Vec<Digest>),
}

/// A data object supplied for validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedContent {
    /// Document name, used in reports
    pub name: String,
    /// Content or digests
    pub data: DetachedData,
    /// Declared as covered by the record, for example by an ASiC manifest
    pub expected: bool,
}

impl DetachedContent {
    /// Document with its full content.
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: DetachedData::Binary(content.into()),
            expected: false,
        }
    }

    /// Document known only by a digest.
    pub fn from_digest(name: impl Into<String>, digest: Digest) -> Self {
        Self {
            name: name.into(),
            data: DetachedData::Digests(vec![digest]),
            expected: false,
        }
    }

    /// Mark the document as one of the record's archived objects. A digest
    /// mismatch against it is then a hash failure rather than an orphan.
    pub fn expected(mut self) -> Self {
        self.expected = true;
        self
    }

    /// Digest of the document, `None` when it cannot be produced for `algorithm`.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Option<Vec<u8>> {
        match &self.data {
            DetachedData::Binary(content) => Some(algorithm.compute(content)),
            DetachedData::Digests(digests) => digests
                .iter()
                .find(|d| d.algorithm == algorithm)
                .map(|d| d.value.clone()),
        }
    }
}

/// Supplies the data objects an evidence record is validated against.
pub trait ContentResolver {
    /// Every available data object.
    fn resolve_all(&self) -> Vec<DetachedContent>;

    /// Data object by name.
    fn resolve(&self, name: &str) -> Option<DetachedContent> {
        self.resolve_all().into_iter().find(|doc| doc.name == name)
    }
}

impl ContentResolver for [DetachedContent] {
    fn resolve_all(&self) -> Vec<DetachedContent> {
        self.to_vec()
    }
}

impl ContentResolver for Vec<DetachedContent> {
    fn resolve_all(&self) -> Vec<DetachedContent> {
        self.clone()
    }
}

/// Objects of the enclosing signature an embedded record also covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingContext {
    /// Identifier of the embedding signature
    pub signature_id: String,
    /// Certificates of the signature
    pub certificate_ids: Vec<String>,
    /// CRLs and OCSP responses of the signature
    pub revocation_ids: Vec<String>,
    /// Signature and archive timestamps of the signature
    pub timestamp_ids: Vec<String>,
}

/// Where an evidence record was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceRecordOrigin {
    /// Standalone file
    #[default]
    Detached,
    /// Entry of an ASiC container
    Container {
        /// Names of the entries the manifest covers
        container_entry_names: Vec<String>,
    },
    /// Unsigned attribute of a signature
    Embedded(EmbeddingContext),
}

/// A document covered by the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceRecordScope {
    /// Document name
    pub name: String,
    /// Coverage
    pub scope_type: ScopeType,
}

/// Extent of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeType {
    /// The whole document
    Full,
}

/// Result of validating one evidence record. Computed once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedEvidenceRecord {
    /// Stable identifier derived from the record bytes
    pub id: String,
    /// Encoding
    pub record_type: EvidenceRecordType,
    /// File or entry name
    pub filename: Option<String>,
    /// Where the record was found
    pub origin: EvidenceRecordOrigin,
    /// Record-level references: data objects of the first timestamp plus one
    /// renewal reference per later timestamp
    pub reference_validations: Vec<ReferenceValidation>,
    /// Archive timestamps in renewal order
    pub timestamps: Vec<ArchiveTimestampToken>,
    /// Documents proven intact by the record
    pub scopes: Vec<EvidenceRecordScope>,
    /// Earliest timestamp generation time
    pub poe_time: Option<DateTime<Utc>>,
    /// Indication and sub-indication
    pub conclusion: ValidationConclusion,
}

impl ValidatedEvidenceRecord {
    /// Overall indication.
    pub fn indication(&self) -> Indication {
        self.conclusion.indication
    }

    /// Sub-indication, absent for PASSED.
    pub fn sub_indication(&self) -> Option<SubIndication> {
        self.conclusion.sub_indication
    }

    /// References of the given kind.
    pub fn references_of(&self, matcher_type: DigestMatcherType) -> impl Iterator<Item = &ReferenceValidation> {
        self.reference_validations
            .iter()
            .filter(move |r| r.matcher_type() == matcher_type)
    }

    /// Union of the objects covered by the timestamps, without duplicates.
    pub fn timestamped_references(&self) -> Vec<TimestampedReference> {
        let mut all: Vec<TimestampedReference> = Vec::new();
        for reference in self.timestamps.iter().flat_map(|t| t.timestamped_references.iter()) {
            if !all.contains(reference) {
                all.push(reference.clone());
            }
        }
        all
    }
}

/// Decode an evidence record, choosing the syntax from its first byte.
pub fn parse_evidence_record(data: &[u8]) -> Result<EvidenceRecord> {
    let body = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') => parse_xml_evidence_record(data),
        Some(0x30) => parse_asn1_evidence_record(data),
        Some(b) => Err(Error::InvalidEvidenceRecord(format!(
            "unrecognised encoding, first byte 0x{:02X}",
            b
        ))),
        None => Err(Error::InvalidEvidenceRecord("empty input".to_string())),
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes.iter().take(len).map(|b| format!("{:02X}", b)).collect()
}

/// Validates one evidence record against its data objects.
pub struct EvidenceRecordValidator<'a> {
    record: &'a EvidenceRecord,
    verifier: &'a dyn TimestampVerifier,
    config: ValidationConfig,
    documents: Vec<DetachedContent>,
    origin: EvidenceRecordOrigin,
}

impl<'a> EvidenceRecordValidator<'a> {
    /// Create a validator with the default (strict) configuration.
    pub fn new(record: &'a EvidenceRecord, verifier: &'a dyn TimestampVerifier) -> Self {
        Self {
            record,
            verifier,
            config: ValidationConfig::default(),
            documents: Vec::new(),
            origin: EvidenceRecordOrigin::Detached,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ValidationConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the data objects.
    pub fn with_detached_contents(mut self, documents: Vec<DetachedContent>) -> Self {
        self.documents = documents;
        self
    }

    /// Take the data objects from a resolver.
    pub fn with_content_resolver(mut self, resolver: &dyn ContentResolver) -> Self {
        self.documents = resolver.resolve_all();
        self
    }

    /// Set where the record was found.
    pub fn with_origin(mut self, origin: EvidenceRecordOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Validate the record.
    ///
    /// An unreadable timestamp token is a structural error. Everything else,
    /// missing documents and mismatching digests included, ends up in the
    /// returned result.
    pub fn validate(&self) -> Result<ValidatedEvidenceRecord> {
        let record = self.record;
        let id = format!("ER-{}", hex_prefix(&DigestAlgorithm::Sha256.compute(&record.encoded), 16));
        log::info!(
            "Validating {:?} evidence record {} ({} timestamps, {} data objects)",
            record.record_type,
            id,
            record.timestamp_count(),
            self.documents.len()
        );

        let mut record_references = Vec::new();
        let mut timestamps: Vec<ArchiveTimestampToken> = Vec::new();
        let mut covered: Vec<usize> = Vec::new();
        let mut previous: Option<(&ArchiveTimeStamp, bool)> = None;

        for (chain_index, index_in_chain, ats) in record.archive_time_stamps() {
            let info = self.verifier.read_info(&ats.timestamp_token)?;
            let renewal_kind = RenewalKind::at(chain_index, index_in_chain);
            let algorithm = ats.digest_algorithm.unwrap_or(info.message_imprint.algorithm);
            let token_id = format!(
                "TST-{}-{}-{}",
                chain_index,
                index_in_chain,
                hex_prefix(&DigestAlgorithm::Sha256.compute(&ats.timestamp_token), 8)
            );

            // Without a hash tree the token covers a single digest directly.
            let groups = if ats.has_hash_tree() {
                ats.reduced_hash_tree.clone()
            } else {
                vec![DigestValueGroup::new(vec![info.message_imprint.value.clone()])]
            };
            let first_group = &groups[0];

            let root = compute_root(&groups, algorithm);
            let message_imprint_found = root.is_some();
            let message_imprint_intact = root
                .as_ref()
                .map(|r| r.path_intact && r.root == info.message_imprint.value)
                .unwrap_or(false);
            if !message_imprint_intact {
                log::warn!("Hash tree root of {} does not match its message imprint", token_id);
            }

            let builder = ReferenceValidationBuilder::new(algorithm, &self.documents);
            let mut references = vec![ReferenceValidation::message_imprint(
                Some(info.message_imprint.clone()),
                message_imprint_found,
                message_imprint_intact,
            )];

            match (renewal_kind, previous) {
                (RenewalKind::Initial, _) => {
                    let matches = builder.data_objects(first_group);
                    record_references.extend(matches.references.iter().cloned());
                    references.extend(matches.references);
                    extend_unique(&mut covered, &matches.located);
                },
                (RenewalKind::TimestampRenewal, Some((prior, prior_intact))) => {
                    let expected = timestamp_renewal_digest(prior, algorithm);
                    let renewal = builder.timestamp_renewal(Some(first_group), &expected, prior_intact);
                    if let Some(reference) = renewal.first() {
                        record_references.push(reference.clone());
                    }
                    references.extend(renewal);
                },
                (RenewalKind::HashTreeRenewal, Some((_, prior_intact))) => {
                    let ha = sequence_digest(&record.sequence_encoding(chain_index)?, algorithm);
                    let matches = builder.hash_tree_renewal_data_objects(first_group, &ha);
                    let sequence = builder.hash_tree_renewal(&ha, &matches, prior_intact);
                    record_references.push(sequence.clone());
                    references.push(sequence);
                    references.extend(matches.references);
                    extend_unique(&mut covered, &matches.located);
                },
                (kind, None) => {
                    return Err(Error::InvalidEvidenceRecord(format!(
                        "{:?} at chain {} index {} without a previous timestamp",
                        kind, chain_index, index_in_chain
                    )));
                },
            }

            let timestamped_references = self.timestamped_references(&covered, &timestamps);
            let signature = self.verifier.verify_signature(&ats.timestamp_token);
            let intact = message_imprint_intact && references.iter().all(|r| !r.is_found() || r.is_intact());
            log::debug!(
                "{} ({:?}, {}): imprint intact {}, signature intact {}",
                token_id,
                renewal_kind,
                algorithm,
                message_imprint_intact,
                signature.intact
            );

            timestamps.push(ArchiveTimestampToken {
                id: token_id,
                chain_index,
                index_in_chain,
                renewal_kind,
                digest_algorithm: algorithm,
                info,
                message_imprint_found,
                message_imprint_intact,
                signature,
                reference_validations: references,
                timestamped_references,
            });
            previous = Some((ats, intact));
        }

        let conclusion = classify(
            &record_references,
            &timestamps,
            self.config.require_all_archive_data_objects,
        );
        let scopes = record_references
            .iter()
            .filter(|r| r.matcher_type() == DigestMatcherType::ArchiveObject && r.is_intact())
            .filter_map(|r| r.document_name())
            .map(|name| EvidenceRecordScope {
                name: name.to_string(),
                scope_type: ScopeType::Full,
            })
            .collect();
        let poe_time = timestamps.iter().map(ArchiveTimestampToken::generation_time).min();

        log::info!("Evidence record {}: {:?}", id, conclusion);
        Ok(ValidatedEvidenceRecord {
            id,
            record_type: record.record_type,
            filename: record.filename.clone(),
            origin: self.origin.clone(),
            reference_validations: record_references,
            timestamps,
            scopes,
            poe_time,
            conclusion,
        })
    }

    /// Objects covered by the timestamp being built: the documents located so
    /// far, every earlier timestamp and the embedding signature's material.
    fn timestamped_references(&self, covered: &[usize], earlier: &[ArchiveTimestampToken]) -> Vec<TimestampedReference> {
        let mut refs: Vec<TimestampedReference> = covered
            .iter()
            .map(|&j| {
                let name = &self.documents[j].name;
                let object_type = if is_evidence_record_name(name) {
                    TimestampedObjectType::EvidenceRecord
                } else {
                    TimestampedObjectType::SignedData
                };
                TimestampedReference::new(object_type, name.as_str())
            })
            .collect();
        refs.extend(
            earlier
                .iter()
                .map(|t| TimestampedReference::new(TimestampedObjectType::Timestamp, t.id.as_str())),
        );
        if let EvidenceRecordOrigin::Embedded(context) = &self.origin {
            refs.push(TimestampedReference::new(
                TimestampedObjectType::Signature,
                context.signature_id.as_str(),
            ));
            let typed = [
                (TimestampedObjectType::Certificate, &context.certificate_ids),
                (TimestampedObjectType::Revocation, &context.revocation_ids),
                (TimestampedObjectType::Timestamp, &context.timestamp_ids),
            ];
            for (object_type, ids) in typed {
                refs.extend(ids.iter().map(|id| TimestampedReference::new(object_type, id.as_str())));
            }
        }
        refs
    }
}

fn extend_unique(target: &mut Vec<usize>, items: &[usize]) {
    for item in items {
        if !target.contains(item) {
            target.push(*item);
        }
    }
}
