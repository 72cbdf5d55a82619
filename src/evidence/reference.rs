//! Digest matching between hash trees and the objects they cover.

use crate::digest::{Digest, DigestAlgorithm};
use crate::evidence::hashtree::hash_tree_renewal_digest;
use crate::evidence::types::DigestValueGroup;
use crate::evidence::validator::DetachedContent;
use serde::Serialize;

/// What a digest of an archive timestamp was matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DigestMatcherType {
    /// An archived data object
    #[serde(rename = "EVIDENCE_RECORD_ARCHIVE_OBJECT")]
    ArchiveObject,
    /// A digest no supplied object could be matched with
    #[serde(rename = "EVIDENCE_RECORD_ORPHAN_REFERENCE")]
    OrphanReference,
    /// The previous archive timestamp (timestamp renewal)
    #[serde(rename = "EVIDENCE_RECORD_ARCHIVE_TIME_STAMP")]
    ArchiveTimeStamp,
    /// The previous chains (hash tree renewal)
    #[serde(rename = "EVIDENCE_RECORD_ARCHIVE_TIME_STAMP_SEQUENCE")]
    ArchiveTimeStampSequence,
    /// Root of the hash tree against the token's message imprint
    #[serde(rename = "MESSAGE_IMPRINT")]
    MessageImprint,
}

impl DigestMatcherType {
    /// True for the two data object kinds.
    pub fn is_data_object(&self) -> bool {
        matches!(self, DigestMatcherType::ArchiveObject | DigestMatcherType::OrphanReference)
    }
}

/// Outcome of matching one digest.
///
/// `intact` implies `found`, and only archive objects carry a document name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceValidation {
    matcher_type: DigestMatcherType,
    digest: Option<Digest>,
    found: bool,
    intact: bool,
    document_name: Option<String>,
}

impl ReferenceValidation {
    fn new(
        matcher_type: DigestMatcherType,
        digest: Option<Digest>,
        found: bool,
        intact: bool,
        document_name: Option<String>,
    ) -> Self {
        let document_name = match matcher_type {
            DigestMatcherType::ArchiveObject => document_name,
            _ => None,
        };
        Self {
            matcher_type,
            digest,
            found,
            intact: found && intact,
            document_name,
        }
    }

    /// Data object whose digest matched.
    pub fn archive_object(digest: Digest, name: impl Into<String>) -> Self {
        Self::new(DigestMatcherType::ArchiveObject, Some(digest), true, true, Some(name.into()))
    }

    /// Data object located but with a different digest.
    pub fn archive_object_mismatch(digest: Digest, name: impl Into<String>) -> Self {
        Self::new(DigestMatcherType::ArchiveObject, Some(digest), true, false, Some(name.into()))
    }

    /// Digest without any candidate object.
    pub fn orphan(digest: Digest) -> Self {
        Self::new(DigestMatcherType::OrphanReference, Some(digest), false, false, None)
    }

    /// Previous timestamp reference. Always found, the token is internal state.
    pub fn archive_time_stamp(digest: Digest, intact: bool) -> Self {
        Self::new(DigestMatcherType::ArchiveTimeStamp, Some(digest), true, intact, None)
    }

    /// Previous chains reference. Always found.
    pub fn archive_time_stamp_sequence(digest: Digest, intact: bool) -> Self {
        Self::new(DigestMatcherType::ArchiveTimeStampSequence, Some(digest), true, intact, None)
    }

    /// Message imprint of a token.
    pub fn message_imprint(digest: Option<Digest>, found: bool, intact: bool) -> Self {
        Self::new(DigestMatcherType::MessageImprint, digest, found, intact, None)
    }

    /// Kind of match.
    pub fn matcher_type(&self) -> DigestMatcherType {
        self.matcher_type
    }

    /// Digest taken from the record.
    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// A candidate object was located.
    pub fn is_found(&self) -> bool {
        self.found
    }

    /// The candidate's digest matches.
    pub fn is_intact(&self) -> bool {
        self.intact
    }

    /// Name of the matched document.
    pub fn document_name(&self) -> Option<&str> {
        self.document_name.as_deref()
    }
}

/// Data object matches for one group.
#[derive(Debug, Clone, Default)]
pub struct DataObjectMatches {
    /// One reference per digest value, in group order
    pub references: Vec<ReferenceValidation>,
    /// Indices of the documents that were located
    pub located: Vec<usize>,
    /// Indices of the documents whose digest matched
    pub matched: Vec<usize>,
}

/// Matches hash tree digests against detached contents.
pub struct ReferenceValidationBuilder<'a> {
    algorithm: DigestAlgorithm,
    documents: &'a [DetachedContent],
}

impl<'a> ReferenceValidationBuilder<'a> {
    /// Create a builder for one archive timestamp.
    pub fn new(algorithm: DigestAlgorithm, documents: &'a [DetachedContent]) -> Self {
        Self {
            algorithm,
            documents,
        }
    }

    fn digest(&self, value: &[u8]) -> Digest {
        Digest::new(self.algorithm, value.to_vec())
    }

    /// Match a group of an initial archive timestamp against document digests.
    pub fn data_objects(&self, group: &DigestValueGroup) -> DataObjectMatches {
        let expected = self
            .documents
            .iter()
            .map(|doc| doc.digest(self.algorithm))
            .collect();
        self.match_values(group.values(), expected)
    }

    /// Match a group of a hash tree renewal against H(h(d) || ha).
    pub fn hash_tree_renewal_data_objects(&self, group: &DigestValueGroup, sequence_digest: &[u8]) -> DataObjectMatches {
        let expected = self
            .documents
            .iter()
            .map(|doc| {
                doc.digest(self.algorithm)
                    .map(|h| hash_tree_renewal_digest(&h, sequence_digest, self.algorithm))
            })
            .collect();
        self.match_values(group.values(), expected)
    }

    /// Exact matches first, then leftover digests paired in order with the
    /// leftover documents correlated with the record, then orphans.
    ///
    /// A document is correlated when it is marked expected, or when it is the
    /// only document supplied for a group holding a single digest.
    fn match_values(&self, values: &[Vec<u8>], expected: Vec<Option<Vec<u8>>>) -> DataObjectMatches {
        let mut used = vec![false; self.documents.len()];
        let mut slots: Vec<Option<ReferenceValidation>> = vec![None; values.len()];
        let mut result = DataObjectMatches::default();

        for (slot, value) in slots.iter_mut().zip(values) {
            let hit = expected
                .iter()
                .enumerate()
                .position(|(j, e)| !used[j] && e.as_deref() == Some(value.as_slice()));
            if let Some(j) = hit {
                used[j] = true;
                result.located.push(j);
                result.matched.push(j);
                *slot = Some(ReferenceValidation::archive_object(self.digest(value), &self.documents[j].name));
            }
        }

        let sole_candidate = values.len() == 1 && self.documents.len() == 1;
        let mut leftovers = (0..self.documents.len())
            .filter(|j| !used[*j] && (sole_candidate || self.documents[*j].expected))
            .collect::<Vec<_>>()
            .into_iter();
        for (slot, value) in slots.iter_mut().zip(values) {
            if slot.is_some() {
                continue;
            }
            *slot = Some(match leftovers.next() {
                Some(j) => {
                    log::warn!(
                        "Digest mismatch for archived object '{}' ({})",
                        self.documents[j].name,
                        self.algorithm
                    );
                    result.located.push(j);
                    ReferenceValidation::archive_object_mismatch(self.digest(value), &self.documents[j].name)
                },
                None => {
                    log::warn!("Orphan reference in evidence record: no data object for digest");
                    ReferenceValidation::orphan(self.digest(value))
                },
            });
        }

        result.references = slots.into_iter().flatten().collect();
        result
    }

    /// References of a timestamp renewal: one archive timestamp reference
    /// against H(previous token), remaining values as orphans.
    pub fn timestamp_renewal(&self, group: Option<&DigestValueGroup>, expected: &[u8], previous_intact: bool) -> Vec<ReferenceValidation> {
        let values = group.map(DigestValueGroup::values).unwrap_or(&[]);
        let (renewal, rest) = split_expected(values, expected);
        let intact = renewal.is_some() && previous_intact;
        if renewal.is_none() {
            log::warn!("Timestamp renewal does not cover the previous archive timestamp");
        }
        let reported = renewal
            .or_else(|| rest.first().cloned())
            .unwrap_or_else(|| expected.to_vec());
        let mut refs = vec![ReferenceValidation::archive_time_stamp(self.digest(&reported), intact)];
        refs.extend(
            rest.iter()
                .filter(|v| **v != reported)
                .map(|v| ReferenceValidation::orphan(self.digest(v))),
        );
        refs
    }

    /// Reference of a hash tree renewal to the previous chains.
    pub fn hash_tree_renewal(&self, sequence_digest: &[u8], data: &DataObjectMatches, previous_intact: bool) -> ReferenceValidation {
        let intact = previous_intact && !data.matched.is_empty();
        ReferenceValidation::archive_time_stamp_sequence(self.digest(sequence_digest), intact)
    }
}

/// Split `values` into the one equal to `expected` and the others.
fn split_expected(values: &[Vec<u8>], expected: &[u8]) -> (Option<Vec<u8>>, Vec<Vec<u8>>) {
    let mut found = None;
    let mut rest = Vec::new();
    for value in values {
        if found.is_none() && value.as_slice() == expected {
            found = Some(value.clone());
        } else {
            rest.push(value.clone());
        }
    }
    (found, rest)
}
