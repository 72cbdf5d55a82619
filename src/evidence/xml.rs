//! RFC 6283 XML evidence record decoding.
//!
//! Elements are matched by local name, so any namespace prefix is accepted.
//! `Order` attributes fix the order of chains, timestamps and hash tree
//! sequences regardless of document order.

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::evidence::types::{
    ArchiveTimeStamp, ArchiveTimeStampChain, DigestValueGroup, EvidenceRecord, EvidenceRecordType,
};
use base64::Engine;
use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidEvidenceRecord(reason.into())
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| Error::Xml(e.to_string()))?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

fn order(element: &BytesStart<'_>, fallback: usize) -> Result<u32> {
    match attribute(element, b"Order")? {
        Some(value) => value
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid(format!("invalid Order attribute {:?}", value))),
        None => Ok(fallback as u32 + 1),
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

/// Start of the element whose `<` follows `from`.
fn element_start(data: &[u8], from: usize) -> usize {
    data[from..]
        .iter()
        .position(|&b| b == b'<')
        .map_or(from, |offset| from + offset)
}

#[derive(Default)]
struct StampBuilder {
    order: u32,
    start: usize,
    sequences: Vec<(u32, Vec<Vec<u8>>)>,
    token: Option<Vec<u8>>,
}

#[derive(Default)]
struct ChainBuilder {
    order: u32,
    start: usize,
    algorithm: Option<DigestAlgorithm>,
    stamps: Vec<(u32, ArchiveTimeStamp)>,
}

#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    DigestValue,
    TimeStampToken,
}

/// Decode an XML evidence record.
pub fn parse_xml_evidence_record(data: &[u8]) -> Result<EvidenceRecord> {
    let mut reader = Reader::from_reader(data);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut version = None;
    let mut in_record = false;
    let mut chains: Vec<(u32, ArchiveTimeStampChain)> = Vec::new();
    let mut chain: Option<ChainBuilder> = None;
    let mut stamp: Option<StampBuilder> = None;
    let mut sequence: Option<(u32, Vec<Vec<u8>>)> = None;
    let mut text_target: Option<TextTarget> = None;

    loop {
        let before = reader.buffer_position();
        let event = reader.read_event_into(&mut buf)?;
        let done = matches!(event, Event::Eof);
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"EvidenceRecord" => {
                        in_record = true;
                        version = attribute(e, b"Version")?;
                    },
                    b"ArchiveTimeStampChain" => {
                        if !in_record || chain.is_some() {
                            return Err(invalid("misplaced ArchiveTimeStampChain"));
                        }
                        chain = Some(ChainBuilder {
                            order: order(e, chains.len())?,
                            start: element_start(data, before),
                            ..ChainBuilder::default()
                        });
                    },
                    b"DigestMethod" => {
                        let current = chain.as_mut().ok_or_else(|| invalid("DigestMethod outside a chain"))?;
                        let uri = attribute(e, b"Algorithm")?
                            .ok_or_else(|| invalid("DigestMethod without Algorithm"))?;
                        current.algorithm = Some(DigestAlgorithm::from_xml_uri(&uri)?);
                    },
                    b"ArchiveTimeStamp" => {
                        let current = chain.as_ref().ok_or_else(|| invalid("ArchiveTimeStamp outside a chain"))?;
                        stamp = Some(StampBuilder {
                            order: order(e, current.stamps.len())?,
                            start: element_start(data, before),
                            ..StampBuilder::default()
                        });
                    },
                    b"Sequence" => {
                        let current = stamp.as_ref().ok_or_else(|| invalid("Sequence outside a HashTree"))?;
                        sequence = Some((order(e, current.sequences.len())?, Vec::new()));
                    },
                    b"DigestValue" if sequence.is_some() && !is_empty => {
                        text_target = Some(TextTarget::DigestValue);
                    },
                    b"TimeStampToken" if stamp.is_some() && !is_empty => {
                        text_target = Some(TextTarget::TimeStampToken);
                    },
                    _ => {},
                }
                if is_empty && e.local_name().as_ref() == b"Sequence" {
                    if let (Some(seq), Some(current)) = (sequence.take(), stamp.as_mut()) {
                        current.sequences.push(seq);
                    }
                }
            },
            Event::Text(ref t) => {
                if let Some(target) = text_target {
                    let value = decode_base64(&t.unescape()?)?;
                    match target {
                        TextTarget::DigestValue => {
                            if let Some((_, values)) = sequence.as_mut() {
                                values.push(value);
                            }
                        },
                        TextTarget::TimeStampToken => {
                            if let Some(current) = stamp.as_mut() {
                                current.token = Some(value);
                            }
                        },
                    }
                }
            },
            Event::End(ref e) => {
                let end = reader.buffer_position();
                match e.local_name().as_ref() {
                    b"DigestValue" | b"TimeStampToken" => text_target = None,
                    b"Sequence" => {
                        if let (Some(seq), Some(current)) = (sequence.take(), stamp.as_mut()) {
                            current.sequences.push(seq);
                        }
                    },
                    b"ArchiveTimeStamp" => {
                        let mut built = stamp.take().ok_or_else(|| invalid("unbalanced ArchiveTimeStamp"))?;
                        let token = built
                            .token
                            .take()
                            .ok_or_else(|| invalid("ArchiveTimeStamp without TimeStampToken"))?;
                        built.sequences.sort_by_key(|(order, _)| *order);
                        let current = chain.as_mut().ok_or_else(|| invalid("ArchiveTimeStamp outside a chain"))?;
                        current.stamps.push((built.order, ArchiveTimeStamp {
                            digest_algorithm: None,
                            reduced_hash_tree: built
                                .sequences
                                .into_iter()
                                .map(|(_, values)| DigestValueGroup::new(values))
                                .collect(),
                            timestamp_token: Bytes::from(token),
                            encoded: Bytes::copy_from_slice(&data[built.start..end]),
                        }));
                    },
                    b"ArchiveTimeStampChain" => {
                        let mut built = chain.take().ok_or_else(|| invalid("unbalanced ArchiveTimeStampChain"))?;
                        if built.stamps.is_empty() {
                            return Err(invalid("empty ArchiveTimeStampChain"));
                        }
                        built.stamps.sort_by_key(|(order, _)| *order);
                        let algorithm = built.algorithm;
                        chains.push((built.order, ArchiveTimeStampChain {
                            digest_algorithm: algorithm,
                            archive_time_stamps: built
                                .stamps
                                .into_iter()
                                .map(|(_, mut ats)| {
                                    ats.digest_algorithm = algorithm;
                                    ats
                                })
                                .collect(),
                            encoded: Bytes::copy_from_slice(&data[built.start..end]),
                        }));
                    },
                    b"EvidenceRecord" => in_record = false,
                    _ => {},
                }
            },
            _ => {},
        }
        if done {
            break;
        }
        buf.clear();
    }

    if chains.is_empty() {
        return Err(invalid("XML evidence record without ArchiveTimeStampChain"));
    }
    chains.sort_by_key(|(order, _)| *order);
    let chains: Vec<ArchiveTimeStampChain> = chains.into_iter().map(|(_, c)| c).collect();
    let mut digest_algorithms = Vec::new();
    for alg in chains.iter().filter_map(|c| c.digest_algorithm) {
        if !digest_algorithms.contains(&alg) {
            digest_algorithms.push(alg);
        }
    }
    let version = version
        .as_deref()
        .and_then(|v| v.split('.').next())
        .and_then(|major| major.trim().parse().ok())
        .unwrap_or(1);

    log::debug!("Decoded XML evidence record with {} chain(s)", chains.len());
    Ok(EvidenceRecord {
        record_type: EvidenceRecordType::Xml,
        version,
        digest_algorithms,
        archive_time_stamp_sequence: chains,
        encoded: Bytes::copy_from_slice(data),
        filename: None,
    })
}
