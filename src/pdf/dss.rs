//! Document Security Store dictionaries.
//!
//! A `/DSS` dictionary in the catalog carries the certificates, CRLs and
//! OCSP responses needed for long-term validation, optionally indexed per
//! signature in `/VRI`. Consecutive revisions usually repeat most of the
//! previous store, so dictionaries are compared through a fingerprint
//! computed once at extraction.

use crate::digest::DigestAlgorithm;
use crate::object::{Object, ObjectRef, PdfDict};
use crate::pdf::reader::PdfDocumentReader;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Validation-related information of one signature (`/VRI` entry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VriEntry {
    /// `/Cert` payloads
    pub certificates: Vec<Bytes>,
    /// `/CRL` payloads
    pub crls: Vec<Bytes>,
    /// `/OCSP` payloads
    pub ocsps: Vec<Bytes>,
    /// `/TU` time of the entry
    pub time: Option<DateTime<Utc>>,
}

/// A decoded `/DSS` dictionary.
#[derive(Debug, Clone)]
pub struct PdfDssDict {
    /// Reference of the dictionary when indirect
    pub reference: Option<ObjectRef>,
    /// `/Certs` stream payloads
    pub certificates: Vec<Bytes>,
    /// `/CRLs` stream payloads
    pub crls: Vec<Bytes>,
    /// `/OCSPs` stream payloads
    pub ocsps: Vec<Bytes>,
    /// `/VRI` entries keyed by upper-case signature digest
    pub vri: IndexMap<String, VriEntry>,
    /// References of every stream read
    pub object_refs: Vec<ObjectRef>,
    fingerprint: Vec<u8>,
}

impl PdfDssDict {
    /// Read the catalog `/DSS` of a revision.
    pub fn extract<R: PdfDocumentReader + ?Sized>(reader: &R) -> Option<Self> {
        let catalog = reader.catalog()?;
        let raw = catalog.get("DSS")?;
        let dict = reader.resolve(raw).as_dict()?;
        let mut object_refs = Vec::new();

        let certificates = read_streams(reader, dict, "Certs", &mut object_refs);
        let crls = read_streams(reader, dict, "CRLs", &mut object_refs);
        let ocsps = read_streams(reader, dict, "OCSPs", &mut object_refs);

        let mut vri = IndexMap::new();
        if let Some(entries) = reader.get(dict, "VRI").and_then(Object::as_dict) {
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            for key in keys {
                let Some(entry) = entries.get(key).map(|e| reader.resolve(e)).and_then(Object::as_dict) else {
                    continue;
                };
                vri.insert(
                    key.to_ascii_uppercase(),
                    VriEntry {
                        certificates: read_streams(reader, entry, "Cert", &mut object_refs),
                        crls: read_streams(reader, entry, "CRL", &mut object_refs),
                        ocsps: read_streams(reader, entry, "OCSP", &mut object_refs),
                        time: reader
                            .get(entry, "TU")
                            .and_then(Object::as_text)
                            .as_deref()
                            .and_then(crate::pdf::sig_dict::parse_pdf_date),
                    },
                );
            }
        }

        let mut dss = Self {
            reference: raw.as_reference(),
            certificates,
            crls,
            ocsps,
            vri,
            object_refs,
            fingerprint: Vec::new(),
        };
        dss.fingerprint = dss.compute_fingerprint();
        log::debug!(
            "DSS with {} certificates, {} CRLs, {} OCSP responses, {} VRI entries",
            dss.certificates.len(),
            dss.crls.len(),
            dss.ocsps.len(),
            dss.vri.len()
        );
        Some(dss)
    }

    /// Digest identifying the store's content, insensitive to ordering.
    pub fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }

    /// True when the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.crls.is_empty() && self.ocsps.is_empty() && self.vri.is_empty()
    }

    fn compute_fingerprint(&self) -> Vec<u8> {
        let sha = DigestAlgorithm::Sha256;
        let mut parts: Vec<Vec<u8>> = Vec::new();
        for (tag, tokens) in [(b'C', &self.certificates), (b'R', &self.crls), (b'O', &self.ocsps)] {
            let mut digests: Vec<Vec<u8>> = tokens.iter().map(|t| sha.compute(t)).collect();
            digests.sort();
            digests.dedup();
            parts.extend(digests.into_iter().map(|mut d| {
                d.insert(0, tag);
                d
            }));
        }
        for (key, entry) in &self.vri {
            let mut part = vec![b'V'];
            part.extend_from_slice(key.as_bytes());
            for token in entry.certificates.iter().chain(&entry.crls).chain(&entry.ocsps) {
                part.extend(sha.compute(token));
            }
            parts.push(part);
        }
        sha.compute_concat(parts.iter().map(Vec::as_slice))
    }
}

impl PartialEq for PdfDssDict {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

fn read_streams<R: PdfDocumentReader + ?Sized>(
    reader: &R,
    dict: &PdfDict,
    key: &str,
    object_refs: &mut Vec<ObjectRef>,
) -> Vec<Bytes> {
    let Some(items) = reader.get(dict, key).and_then(Object::as_array) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let stream = reader.resolve(item);
        match stream.decode_stream_data() {
            Ok(payload) => {
                if let Some(r) = item.as_reference() {
                    object_refs.push(r);
                }
                out.push(Bytes::from(payload));
            },
            Err(e) => log::warn!("Skipping unreadable /{} entry: {}", key, e),
        }
    }
    out
}

/// Kind of validation data held in a DSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DssTokenType {
    /// X.509 certificate
    Certificate,
    /// Certificate revocation list
    Crl,
    /// OCSP response
    Ocsp,
}

/// A de-duplicated DSS payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DssToken {
    /// Token kind
    pub token_type: DssTokenType,
    /// Raw payload
    #[serde(skip)]
    pub content: Bytes,
    /// Index of the first DSS revision carrying the token, oldest first
    pub first_revision: usize,
    /// Every DSS revision carrying the token
    pub revisions: Vec<usize>,
}

/// Union of every DSS revision of a document.
///
/// Tokens are keyed by the base64 SHA-256 of their content.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompositeDssDictionary {
    /// Certificates
    pub certificates: IndexMap<String, DssToken>,
    /// CRLs
    pub crls: IndexMap<String, DssToken>,
    /// OCSP responses
    pub ocsps: IndexMap<String, DssToken>,
    /// Upper-case VRI keys seen in any revision
    pub vri_keys: Vec<String>,
}

impl CompositeDssDictionary {
    /// Merge dictionaries given oldest first.
    pub fn from_revisions<'a, I>(dictionaries: I) -> Self
    where
        I: IntoIterator<Item = &'a PdfDssDict>,
    {
        let mut composite = Self::default();
        for (index, dss) in dictionaries.into_iter().enumerate() {
            composite.add(index, dss);
        }
        composite
    }

    fn add(&mut self, index: usize, dss: &PdfDssDict) {
        let vri_certs = dss.vri.values().flat_map(|v| &v.certificates);
        let vri_crls = dss.vri.values().flat_map(|v| &v.crls);
        let vri_ocsps = dss.vri.values().flat_map(|v| &v.ocsps);
        merge(&mut self.certificates, DssTokenType::Certificate, index, dss.certificates.iter().chain(vri_certs));
        merge(&mut self.crls, DssTokenType::Crl, index, dss.crls.iter().chain(vri_crls));
        merge(&mut self.ocsps, DssTokenType::Ocsp, index, dss.ocsps.iter().chain(vri_ocsps));
        for key in dss.vri.keys() {
            if !self.vri_keys.contains(key) {
                self.vri_keys.push(key.clone());
            }
        }
    }

    /// Number of distinct tokens.
    pub fn len(&self) -> usize {
        self.certificates.len() + self.crls.len() + self.ocsps.len()
    }

    /// True when no revision carried any token.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn merge<'a>(
    target: &mut IndexMap<String, DssToken>,
    token_type: DssTokenType,
    index: usize,
    tokens: impl Iterator<Item = &'a Bytes>,
) {
    for content in tokens {
        let key = crate::digest::Digest::of(DigestAlgorithm::Sha256, content).to_base64();
        let token = target.entry(key).or_insert_with(|| DssToken {
            token_type,
            content: content.clone(),
            first_revision: index,
            revisions: Vec::new(),
        });
        if !token.revisions.contains(&index) {
            token.revisions.push(index);
        }
    }
}
