//! Evidence records inside ASiC containers (ETSI EN 319 162-1).
//!
//! Containers are handled as in-memory entry lists; unzipping is the
//! caller's job. An evidence record is paired with the data objects of its
//! `ASiCEvidenceRecordManifest`, or with the single root data object of an
//! ASiC-S container when no manifest exists. Records that cannot be
//! correlated are ignored, not failed.

use crate::config::ValidationConfig;
use crate::digest::{Digest, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::evidence::timestamp::TimestampVerifier;
use crate::evidence::types::{EvidenceRecord, EvidenceRecordType};
pub use crate::evidence::types::is_evidence_record_name;
use crate::evidence::validator::{
    parse_evidence_record, DetachedContent, EvidenceRecordOrigin, EvidenceRecordValidator, ValidatedEvidenceRecord,
};
use base64::Engine;
use bytes::Bytes;
use lazy_static::lazy_static;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

lazy_static! {
    static ref MANIFEST_NAME: Regex =
        Regex::new(r"^META-INF/ASiCEvidenceRecordManifest[^/]*\.xml$").expect("valid regex");
}

/// MIME type announcing an ASiC-S container.
pub const ASIC_S_MIME_TYPE: &str = "application/vnd.etsi.asic-s+zip";

/// True when `name` follows the evidence record manifest naming convention.
pub fn is_manifest_name(name: &str) -> bool {
    MANIFEST_NAME.is_match(name)
}

/// Encoding implied by an evidence record's file extension.
pub fn expected_record_type(name: &str) -> Option<EvidenceRecordType> {
    EvidenceRecordType::from_file_name(name)
}

/// One entry of an unzipped container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    /// Path inside the container
    pub name: String,
    /// Entry bytes
    pub content: Bytes,
}

impl ContainerEntry {
    /// Create an entry.
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// ASiC container flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    /// Simple container with one data object
    AsicS,
    /// Extended container
    AsicE,
}

impl ContainerType {
    /// Flavour announced by the `mimetype` entry, ASiC-E otherwise.
    pub fn detect(entries: &[ContainerEntry]) -> Self {
        let announced = entries
            .iter()
            .find(|e| e.name == "mimetype")
            .map(|e| String::from_utf8_lossy(&e.content).trim().to_string());
        match announced.as_deref() {
            Some(ASIC_S_MIME_TYPE) => ContainerType::AsicS,
            _ => ContainerType::AsicE,
        }
    }
}

/// Data object listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataObjectReference {
    /// Entry name
    pub uri: String,
    /// Declared digest
    pub digest: Option<Digest>,
}

/// Parsed `ASiCEvidenceRecordManifest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRecordManifest {
    /// Entry name of the manifest
    pub name: String,
    /// Evidence record the manifest describes
    pub sig_reference: String,
    /// Covered data objects
    pub data_objects: Vec<DataObjectReference>,
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

/// Parse a manifest. Digests without a `DigestMethod` use `default_algorithm`.
pub fn parse_manifest(name: &str, data: &[u8], default_algorithm: DigestAlgorithm) -> Result<EvidenceRecordManifest> {
    let manifest_error = |reason: String| Error::InvalidManifest {
        name: name.to_string(),
        reason,
    };
    let mut reader = Reader::from_reader(data);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut sig_reference = None;
    let mut data_objects = Vec::new();
    let mut current: Option<(String, Option<DigestAlgorithm>, Option<Vec<u8>>)> = None;
    let mut in_digest_value = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let done = matches!(event, Event::Eof);
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"SigReference" => {
                        sig_reference =
                            Some(attribute(e, b"URI")?.ok_or_else(|| manifest_error("SigReference without URI".into()))?);
                    },
                    b"DataObjectReference" => {
                        let uri = attribute(e, b"URI")?
                            .ok_or_else(|| manifest_error("DataObjectReference without URI".into()))?;
                        if is_empty {
                            data_objects.push(DataObjectReference { uri, digest: None });
                        } else {
                            current = Some((uri, None, None));
                        }
                    },
                    b"DigestMethod" => {
                        if let (Some((_, algorithm, _)), Some(uri)) = (current.as_mut(), attribute(e, b"Algorithm")?) {
                            *algorithm = Some(DigestAlgorithm::from_xml_uri(&uri)?);
                        }
                    },
                    b"DigestValue" if current.is_some() && !is_empty => in_digest_value = true,
                    _ => {},
                }
            },
            Event::Text(ref t) if in_digest_value => {
                let text = t.unescape()?;
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                let value = base64::engine::general_purpose::STANDARD.decode(compact)?;
                if let Some((_, _, digest)) = current.as_mut() {
                    *digest = Some(value);
                }
            },
            Event::End(ref e) => match e.local_name().as_ref() {
                b"DigestValue" => in_digest_value = false,
                b"DataObjectReference" => {
                    if let Some((uri, algorithm, value)) = current.take() {
                        let digest = value.map(|v| Digest::new(algorithm.unwrap_or(default_algorithm), v));
                        data_objects.push(DataObjectReference { uri, digest });
                    }
                },
                _ => {},
            },
            _ => {},
        }
        buf.clear();
        if done {
            break;
        }
    }

    let sig_reference = sig_reference.ok_or_else(|| manifest_error("missing SigReference".into()))?;
    Ok(EvidenceRecordManifest {
        name: name.to_string(),
        sig_reference,
        data_objects,
    })
}

/// An evidence record of a container with the data objects it applies to.
#[derive(Debug, Clone)]
pub struct ContainerEvidenceRecord {
    /// Decoded record, named after its entry
    pub record: EvidenceRecord,
    /// Data objects the record is validated against
    pub detached_contents: Vec<DetachedContent>,
    /// Names of the correlated entries
    pub covered_entry_names: Vec<String>,
}

fn is_data_object(entry: &ContainerEntry) -> bool {
    entry.name != "mimetype" && !entry.name.starts_with("META-INF/") && !entry.name.ends_with('/')
}

fn manifest_contents(
    manifest: &EvidenceRecordManifest,
    entries: &[ContainerEntry],
) -> (Vec<DetachedContent>, Vec<String>) {
    let mut contents = Vec::new();
    let mut names = Vec::new();
    for reference in &manifest.data_objects {
        names.push(reference.uri.clone());
        let Some(entry) = entries.iter().find(|e| e.name == reference.uri) else {
            log::warn!("{} references missing entry '{}'", manifest.name, reference.uri);
            continue;
        };
        if let Some(declared) = &reference.digest {
            if declared.algorithm.compute(&entry.content) != declared.value {
                log::warn!("{} digest of '{}' does not match the entry", manifest.name, reference.uri);
            }
        }
        contents.push(DetachedContent::new(entry.name.as_str(), entry.content.clone()).expected());
    }
    (contents, names)
}

/// Locate the evidence records of a container and correlate them with their
/// data objects.
pub fn find_evidence_records(entries: &[ContainerEntry], config: &ValidationConfig) -> Result<Vec<ContainerEvidenceRecord>> {
    let manifests = entries
        .iter()
        .filter(|e| is_manifest_name(&e.name))
        .map(|e| parse_manifest(&e.name, &e.content, config.default_digest_algorithm))
        .collect::<Result<Vec<_>>>()?;
    for manifest in &manifests {
        if !entries.iter().any(|e| e.name == manifest.sig_reference) {
            log::info!(
                "Manifest {} references missing evidence record '{}', ignored",
                manifest.name,
                manifest.sig_reference
            );
        }
    }

    let container_type = ContainerType::detect(entries);
    let mut found = Vec::new();
    for entry in entries.iter().filter(|e| is_evidence_record_name(&e.name)) {
        let (detached_contents, covered_entry_names) = if manifests.is_empty() {
            match container_type {
                ContainerType::AsicS => {
                    let roots: Vec<&ContainerEntry> = entries
                        .iter()
                        .filter(|e| is_data_object(e) && !e.name.contains('/'))
                        .collect();
                    match roots.as_slice() {
                        [single] => (
                            vec![DetachedContent::new(single.name.as_str(), single.content.clone()).expected()],
                            vec![single.name.clone()],
                        ),
                        _ => {
                            log::warn!("ASiC-S container has {} root data objects, expected one", roots.len());
                            (Vec::new(), Vec::new())
                        },
                    }
                },
                ContainerType::AsicE => {
                    log::debug!("No manifest for {}, no data objects supplied", entry.name);
                    (Vec::new(), Vec::new())
                },
            }
        } else {
            match manifests.iter().find(|m| m.sig_reference == entry.name) {
                Some(manifest) => manifest_contents(manifest, entries),
                None => {
                    log::info!("No manifest references evidence record {}, ignored", entry.name);
                    continue;
                },
            }
        };

        let record = parse_evidence_record(&entry.content)?.with_filename(entry.name.as_str());
        if expected_record_type(&entry.name) != Some(record.record_type) {
            log::info!(
                "Evidence record {} is encoded as {:?}, which its name does not announce; ignored",
                entry.name,
                record.record_type
            );
            continue;
        }
        found.push(ContainerEvidenceRecord {
            record,
            detached_contents,
            covered_entry_names,
        });
    }
    Ok(found)
}

/// Validate every evidence record of a container.
pub fn validate_container(
    entries: &[ContainerEntry],
    verifier: &dyn TimestampVerifier,
    config: &ValidationConfig,
) -> Result<Vec<ValidatedEvidenceRecord>> {
    find_evidence_records(entries, config)?
        .into_iter()
        .map(|found| {
            EvidenceRecordValidator::new(&found.record, verifier)
                .with_config(config.clone())
                .with_detached_contents(found.detached_contents)
                .with_origin(EvidenceRecordOrigin::Container {
                    container_entry_names: found.covered_entry_names,
                })
                .validate()
        })
        .collect()
}
