//! Evidence record data model.
//!
//! Records are immutable once parsed. Every node keeps its original encoding
//! because renewals are hashed over the encoded form of earlier nodes.

use crate::digest::DigestAlgorithm;
use crate::error::Result;
use bytes::Bytes;
use der::{Encode, Tag, asn1::AnyRef};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref EVIDENCE_RECORD_NAME: Regex =
        Regex::new(r"^META-INF/evidencerecord[^/]*\.(ers|xml)$").expect("valid regex");
}

/// True when `name` follows the ASiC evidence record naming convention.
pub fn is_evidence_record_name(name: &str) -> bool {
    EVIDENCE_RECORD_NAME.is_match(name)
}

/// Encoding of an evidence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceRecordType {
    /// RFC 4998 DER
    Asn1,
    /// RFC 6283 XML
    Xml,
}

impl EvidenceRecordType {
    /// Encoding announced by an evidence record file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if !is_evidence_record_name(name) {
            None
        } else if name.ends_with(".ers") {
            Some(EvidenceRecordType::Asn1)
        } else {
            Some(EvidenceRecordType::Xml)
        }
    }
}

/// Digest values at one node of a reduced hash tree.
///
/// All values share the algorithm of the enclosing archive timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestValueGroup {
    values: Vec<Vec<u8>>,
}

impl DigestValueGroup {
    /// Create a group from its values, keeping their order.
    pub fn new(values: Vec<Vec<u8>>) -> Self {
        Self { values }
    }

    /// The digest values.
    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the group holds no value.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when `value` is one of the group's digests.
    pub fn contains(&self, value: &[u8]) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Node value: a single value passes through, several values are hashed
    /// after sorting them in binary ascending order.
    pub fn node_value(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        if self.values.len() == 1 {
            return self.values[0].clone();
        }
        let mut sorted: Vec<&[u8]> = self.values.iter().map(Vec::as_slice).collect();
        sorted.sort();
        algorithm.compute_concat(sorted)
    }
}

/// One archive timestamp with its reduced hash tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTimeStamp {
    /// Algorithm declared on the node itself
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Path from the covered objects (first group) to the root (last group)
    pub reduced_hash_tree: Vec<DigestValueGroup>,
    /// RFC 3161 token (ContentInfo DER)
    pub timestamp_token: Bytes,
    /// Encoding of the whole node
    pub encoded: Bytes,
}

impl ArchiveTimeStamp {
    /// First group of the hash tree, if any.
    pub fn first_group(&self) -> Option<&DigestValueGroup> {
        self.reduced_hash_tree.first()
    }

    /// True when the node carries no hash tree and the token covers one digest directly.
    pub fn has_hash_tree(&self) -> bool {
        !self.reduced_hash_tree.is_empty()
    }
}

/// Archive timestamps produced with the same algorithm, in renewal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTimeStampChain {
    /// Chain-level algorithm (XML `DigestMethod`)
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Timestamps in chronological order
    pub archive_time_stamps: Vec<ArchiveTimeStamp>,
    /// Encoding of the whole chain
    pub encoded: Bytes,
}

/// How an archive timestamp relates to the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenewalKind {
    /// First timestamp of the first chain, covering the archived data
    Initial,
    /// Later timestamp of a chain, covering the previous token
    TimestampRenewal,
    /// First timestamp of a later chain, covering data and all prior chains
    HashTreeRenewal,
}

impl RenewalKind {
    /// Kind implied by the position of a timestamp in the record.
    pub fn at(chain_index: usize, index_in_chain: usize) -> Self {
        match (chain_index, index_in_chain) {
            (0, 0) => RenewalKind::Initial,
            (_, 0) => RenewalKind::HashTreeRenewal,
            _ => RenewalKind::TimestampRenewal,
        }
    }
}

/// A parsed evidence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRecord {
    /// Encoding of the record
    pub record_type: EvidenceRecordType,
    /// Declared version
    pub version: u32,
    /// Algorithms declared at record level
    pub digest_algorithms: Vec<DigestAlgorithm>,
    /// Chains in chronological order
    pub archive_time_stamp_sequence: Vec<ArchiveTimeStampChain>,
    /// Original record bytes
    pub encoded: Bytes,
    /// Name of the file or container entry the record came from
    pub filename: Option<String>,
}

impl EvidenceRecord {
    /// Attach the file name the record was read from.
    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }

    /// All archive timestamps as `(chain index, index in chain, timestamp)`.
    pub fn archive_time_stamps(&self) -> impl Iterator<Item = (usize, usize, &ArchiveTimeStamp)> {
        self.archive_time_stamp_sequence
            .iter()
            .enumerate()
            .flat_map(|(c, chain)| {
                chain
                    .archive_time_stamps
                    .iter()
                    .enumerate()
                    .map(move |(i, ats)| (c, i, ats))
            })
    }

    /// Total number of archive timestamps.
    pub fn timestamp_count(&self) -> usize {
        self.archive_time_stamp_sequence
            .iter()
            .map(|chain| chain.archive_time_stamps.len())
            .sum()
    }

    /// Encoding of the chains before `chain_index` as an ArchiveTimeStampSequence.
    ///
    /// DER records wrap the chain encodings in a SEQUENCE; XML records wrap
    /// the raw chain elements in an `ArchiveTimeStampSequence` element.
    pub fn sequence_encoding(&self, chain_index: usize) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        for chain in self.archive_time_stamp_sequence.iter().take(chain_index) {
            content.extend_from_slice(&chain.encoded);
        }
        match self.record_type {
            EvidenceRecordType::Asn1 => Ok(AnyRef::new(Tag::Sequence, &content)?.to_der()?),
            EvidenceRecordType::Xml => {
                let mut out = b"<ArchiveTimeStampSequence>".to_vec();
                out.extend_from_slice(&content);
                out.extend_from_slice(b"</ArchiveTimeStampSequence>");
                Ok(out)
            },
        }
    }
}
