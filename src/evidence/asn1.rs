//! RFC 4998 evidence record decoding.
//!
//! ```text
//! EvidenceRecord ::= SEQUENCE {
//!     version                   INTEGER { v1(1) },
//!     digestAlgorithms          SEQUENCE OF AlgorithmIdentifier,
//!     cryptoInfos               [0] CryptoInfos OPTIONAL,
//!     encryptionInfo            [1] EncryptionInfo OPTIONAL,
//!     archiveTimeStampSequence  ArchiveTimeStampSequence }
//!
//! ArchiveTimeStamp ::= SEQUENCE {
//!     digestAlgorithm  [0] AlgorithmIdentifier OPTIONAL,
//!     attributes       [1] Attributes OPTIONAL,
//!     reducedHashtree  [2] SEQUENCE OF PartialHashtree OPTIONAL,
//!     timeStamp        ContentInfo }
//! ```
//!
//! Tagging is implicit, so the tagged fields are re-wrapped before decoding.

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::evidence::types::{
    ArchiveTimeStamp, ArchiveTimeStampChain, DigestValueGroup, EvidenceRecord, EvidenceRecordType,
};
use bytes::Bytes;
use der::{Decode, Encode, Reader, SliceReader, Tag, Tagged, asn1::AnyRef};
use spki::AlgorithmIdentifierOwned;

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidEvidenceRecord(reason.into())
}

/// Decode every TLV inside `content`.
fn children(content: &[u8]) -> Result<Vec<AnyRef<'_>>> {
    let mut reader = SliceReader::new(content)?;
    let mut items = Vec::new();
    while !reader.is_finished() {
        items.push(reader.decode::<AnyRef<'_>>()?);
    }
    Ok(items)
}

fn expect_sequence<'a>(any: &AnyRef<'a>, what: &str) -> Result<&'a [u8]> {
    if any.tag() != Tag::Sequence {
        return Err(invalid(format!("{} must be a SEQUENCE, found {}", what, any.tag())));
    }
    Ok(any.value())
}

fn context_number(tag: Tag) -> Option<u8> {
    match tag {
        Tag::ContextSpecific { number, .. } => Some(number.value()),
        _ => None,
    }
}

fn algorithm_from_sequence_content(content: &[u8]) -> Result<DigestAlgorithm> {
    let encoded = AnyRef::new(Tag::Sequence, content)?.to_der()?;
    let alg = AlgorithmIdentifierOwned::from_der(&encoded)?;
    DigestAlgorithm::from_oid(&alg.oid)
}

fn parse_version(any: &AnyRef<'_>) -> Result<u32> {
    if any.tag() != Tag::Integer {
        return Err(invalid("version must be an INTEGER"));
    }
    let bytes = any.value();
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(invalid("version out of range"));
    }
    Ok(bytes.iter().fold(0u32, |acc, b| acc << 8 | u32::from(*b)))
}

fn parse_partial_hashtree(any: &AnyRef<'_>) -> Result<DigestValueGroup> {
    let content = expect_sequence(any, "PartialHashtree")?;
    let mut values = Vec::new();
    for value in children(content)? {
        if value.tag() != Tag::OctetString {
            return Err(invalid("PartialHashtree entries must be OCTET STRINGs"));
        }
        values.push(value.value().to_vec());
    }
    if values.is_empty() {
        return Err(invalid("empty PartialHashtree"));
    }
    Ok(DigestValueGroup::new(values))
}

fn parse_archive_time_stamp(any: &AnyRef<'_>) -> Result<ArchiveTimeStamp> {
    let content = expect_sequence(any, "ArchiveTimeStamp")?;
    let mut digest_algorithm = None;
    let mut reduced_hash_tree = Vec::new();
    let mut timestamp_token = None;

    for field in children(content)? {
        match (context_number(field.tag()), field.tag()) {
            (Some(0), _) => digest_algorithm = Some(algorithm_from_sequence_content(field.value())?),
            (Some(1), _) => log::debug!("Skipping ArchiveTimeStamp attributes"),
            (Some(2), _) => {
                for node in children(field.value())? {
                    reduced_hash_tree.push(parse_partial_hashtree(&node)?);
                }
            },
            (None, Tag::Sequence) if timestamp_token.is_none() => {
                timestamp_token = Some(Bytes::from(field.to_der()?));
            },
            (_, tag) => return Err(invalid(format!("unexpected {} in ArchiveTimeStamp", tag))),
        }
    }

    let timestamp_token = timestamp_token.ok_or_else(|| invalid("ArchiveTimeStamp without timeStamp"))?;
    Ok(ArchiveTimeStamp {
        digest_algorithm,
        reduced_hash_tree,
        timestamp_token,
        encoded: Bytes::from(any.to_der()?),
    })
}

fn parse_chain(any: &AnyRef<'_>) -> Result<ArchiveTimeStampChain> {
    let content = expect_sequence(any, "ArchiveTimeStampChain")?;
    let archive_time_stamps = children(content)?
        .iter()
        .map(parse_archive_time_stamp)
        .collect::<Result<Vec<_>>>()?;
    if archive_time_stamps.is_empty() {
        return Err(invalid("empty ArchiveTimeStampChain"));
    }
    Ok(ArchiveTimeStampChain {
        digest_algorithm: archive_time_stamps[0].digest_algorithm,
        archive_time_stamps,
        encoded: Bytes::from(any.to_der()?),
    })
}

/// Decode a DER evidence record.
pub fn parse_asn1_evidence_record(data: &[u8]) -> Result<EvidenceRecord> {
    let outer = AnyRef::from_der(data)?;
    let content = expect_sequence(&outer, "EvidenceRecord")?;
    let fields = children(content)?;
    if fields.len() < 3 {
        return Err(invalid(format!("EvidenceRecord has {} fields, expected at least 3", fields.len())));
    }

    let version = parse_version(&fields[0])?;
    let mut digest_algorithms = Vec::new();
    for alg in children(expect_sequence(&fields[1], "digestAlgorithms")?)? {
        digest_algorithms.push(DigestAlgorithm::from_oid(&AlgorithmIdentifierOwned::from_der(&alg.to_der()?)?.oid)?);
    }

    let mut sequence = None;
    for field in &fields[2..] {
        match context_number(field.tag()) {
            Some(0) => log::debug!("Skipping cryptoInfos"),
            Some(1) => log::debug!("Skipping encryptionInfo"),
            _ if sequence.is_none() => sequence = Some(expect_sequence(field, "ArchiveTimeStampSequence")?),
            _ => return Err(invalid("trailing data after ArchiveTimeStampSequence")),
        }
    }
    let sequence = sequence.ok_or_else(|| invalid("missing ArchiveTimeStampSequence"))?;

    let chains = children(sequence)?
        .iter()
        .map(parse_chain)
        .collect::<Result<Vec<_>>>()?;
    if chains.is_empty() {
        return Err(invalid("empty ArchiveTimeStampSequence"));
    }

    log::debug!(
        "Decoded DER evidence record v{} with {} chain(s)",
        version,
        chains.len()
    );
    Ok(EvidenceRecord {
        record_type: EvidenceRecordType::Asn1,
        version,
        digest_algorithms,
        archive_time_stamp_sequence: chains,
        encoded: Bytes::copy_from_slice(data),
        filename: None,
    })
}
