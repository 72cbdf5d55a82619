//! Shared fixture builders for integration tests.
//!
//! Evidence records are assembled from raw DER or RFC 6283 XML with a fake
//! timestamping authority whose tokens are opaque SEQUENCEs. PDFs are written as real
//! incremental updates with byte ranges computed after each update.

#![allow(dead_code)]

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use der::Encode;
use ltv_oxide::digest::{Digest, DigestAlgorithm};
use ltv_oxide::error::{Error, Result};
use ltv_oxide::evidence::{DigestValueGroup, SignatureCheck, TimestampInfo, TimestampVerifier};
use ltv_oxide::pdf::SignaturePlaceholder;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

pub const ALG: DigestAlgorithm = DigestAlgorithm::Sha256;

// ---------------------------------------------------------------------------
// DER
// ---------------------------------------------------------------------------

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x100 {
        out.extend([0x81, len as u8]);
    } else {
        out.extend([0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

pub fn seq(items: &[Vec<u8>]) -> Vec<u8> {
    tlv(0x30, &items.concat())
}

pub fn octets(value: &[u8]) -> Vec<u8> {
    tlv(0x04, value)
}

pub fn algorithm_identifier(algorithm: DigestAlgorithm) -> Vec<u8> {
    seq(&[algorithm.oid().to_der().unwrap()])
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Issues opaque tokens and answers for them as a [`TimestampVerifier`].
#[derive(Default)]
pub struct FakeTsa {
    issued: RefCell<HashMap<Vec<u8>, TimestampInfo>>,
    broken: RefCell<HashSet<Vec<u8>>>,
    serial: Cell<u8>,
}

impl FakeTsa {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token over `imprint`, generated `day` days into 2024.
    pub fn stamp(&self, imprint: &[u8], day: u32) -> Vec<u8> {
        let serial = self.serial.get() + 1;
        self.serial.set(serial);
        let token = seq(&[octets(imprint), tlv(0x02, &[serial])]);
        self.issued.borrow_mut().insert(
            token.clone(),
            TimestampInfo {
                message_imprint: Digest::new(ALG, imprint.to_vec()),
                generation_time: time(day),
            },
        );
        token
    }

    /// Token whose signature does not verify.
    pub fn stamp_broken(&self, imprint: &[u8], day: u32) -> Vec<u8> {
        let token = self.stamp(imprint, day);
        self.broken.borrow_mut().insert(token.clone());
        token
    }
}

impl TimestampVerifier for FakeTsa {
    fn read_info(&self, token: &[u8]) -> Result<TimestampInfo> {
        self.issued
            .borrow()
            .get(token)
            .cloned()
            .ok_or_else(|| Error::InvalidTimestamp("unknown token".to_string()))
    }

    fn verify_signature(&self, token: &[u8]) -> SignatureCheck {
        let intact = !self.broken.borrow().contains(token);
        SignatureCheck { intact, valid: intact }
    }
}

pub fn time(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::days(i64::from(day))
}

// ---------------------------------------------------------------------------
// Evidence records
// ---------------------------------------------------------------------------

/// DER ArchiveTimeStamp with an optional reduced hash tree.
pub fn archive_time_stamp(tree: &[Vec<Vec<u8>>], token: &[u8]) -> Vec<u8> {
    let mut fields = Vec::new();
    if !tree.is_empty() {
        let groups: Vec<Vec<u8>> = tree
            .iter()
            .map(|group| seq(&group.iter().map(|v| octets(v)).collect::<Vec<_>>()))
            .collect();
        fields.push(tlv(0xA2, &groups.concat()));
    }
    fields.push(token.to_vec());
    seq(&fields)
}

pub fn chain(time_stamps: &[Vec<u8>]) -> Vec<u8> {
    seq(time_stamps)
}

pub fn evidence_record(chains: &[Vec<u8>]) -> Vec<u8> {
    seq(&[tlv(0x02, &[1]), seq(&[algorithm_identifier(ALG)]), seq(chains)])
}

/// Root a token must carry for a tree.
pub fn tree_root(tree: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let mut current = Vec::new();
    for group in tree {
        current = DigestValueGroup::new(group.clone()).node_value(ALG);
    }
    current
}

/// Builds a DER record chain by chain, renewing as it goes.
pub struct RecordBuilder<'a> {
    tsa: &'a FakeTsa,
    documents: Vec<Vec<u8>>,
    chains: Vec<Vec<Vec<u8>>>,
    last_token: Vec<u8>,
    day: u32,
}

impl<'a> RecordBuilder<'a> {
    /// Initial archive timestamp over `documents` in one group.
    pub fn new(tsa: &'a FakeTsa, documents: &[&[u8]]) -> Self {
        let group: Vec<Vec<u8>> = documents.iter().map(|d| ALG.compute(d)).collect();
        Self::with_tree(tsa, documents, vec![group])
    }

    /// Initial archive timestamp over an explicit tree.
    pub fn with_tree(tsa: &'a FakeTsa, documents: &[&[u8]], tree: Vec<Vec<Vec<u8>>>) -> Self {
        let token = tsa.stamp(&tree_root(&tree), 0);
        Self {
            tsa,
            documents: documents.iter().map(|d| d.to_vec()).collect(),
            chains: vec![vec![archive_time_stamp(&tree, &token)]],
            last_token: token,
            day: 0,
        }
    }

    /// Timestamp renewal at the end of the current chain.
    pub fn renew_timestamp(mut self) -> Self {
        self.day += 100;
        let covered = ALG.compute(&self.last_token);
        let token = self.tsa.stamp(&covered, self.day);
        let tree = vec![vec![covered]];
        self.chains.last_mut().unwrap().push(archive_time_stamp(&tree, &token));
        self.last_token = token;
        self
    }

    /// Hash tree renewal opening a new chain.
    pub fn renew_hash_tree(mut self) -> Self {
        self.day += 100;
        let prior: Vec<Vec<u8>> = self.chains.iter().map(|c| chain(c)).collect();
        let ha = ALG.compute(&seq(&prior));
        let group: Vec<Vec<u8>> = self
            .documents
            .iter()
            .map(|d| ALG.compute_concat([ALG.compute(d).as_slice(), ha.as_slice()]))
            .collect();
        let tree = vec![group];
        let token = self.tsa.stamp(&tree_root(&tree), self.day);
        self.chains.push(vec![archive_time_stamp(&tree, &token)]);
        self.last_token = token;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let chains: Vec<Vec<u8>> = self.chains.iter().map(|c| chain(c)).collect();
        evidence_record(&chains)
    }
}

const XML_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// XML ArchiveTimeStamp with a reduced hash tree.
pub fn xml_archive_time_stamp(order: usize, tree: &[Vec<Vec<u8>>], token: &[u8]) -> String {
    let sequences: String = tree
        .iter()
        .enumerate()
        .map(|(i, group)| {
            let values: String = group
                .iter()
                .map(|v| format!("<DigestValue>{}</DigestValue>", b64(v)))
                .collect();
            format!("<Sequence Order=\"{}\">{}</Sequence>", i + 1, values)
        })
        .collect();
    format!(
        "<ArchiveTimeStamp Order=\"{}\"><HashTree>{}</HashTree>\
         <TimeStamp><TimeStampToken Type=\"RFC3161\">{}</TimeStampToken></TimeStamp></ArchiveTimeStamp>",
        order,
        sequences,
        b64(token)
    )
}

pub fn xml_chain(order: usize, time_stamps: &[String]) -> String {
    format!(
        "<ArchiveTimeStampChain Order=\"{}\"><DigestMethod Algorithm=\"{}\"/>\
         <CanonicalizationMethod Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"/>{}\
         </ArchiveTimeStampChain>",
        order,
        XML_SHA256,
        time_stamps.concat()
    )
}

/// Builds an XML record the same way [`RecordBuilder`] builds DER ones.
pub struct XmlRecordBuilder<'a> {
    tsa: &'a FakeTsa,
    documents: Vec<Vec<u8>>,
    chains: Vec<Vec<String>>,
    last_token: Vec<u8>,
    day: u32,
}

impl<'a> XmlRecordBuilder<'a> {
    pub fn new(tsa: &'a FakeTsa, documents: &[&[u8]]) -> Self {
        let tree = vec![documents.iter().map(|d| ALG.compute(d)).collect::<Vec<_>>()];
        let token = tsa.stamp(&tree_root(&tree), 0);
        Self {
            tsa,
            documents: documents.iter().map(|d| d.to_vec()).collect(),
            chains: vec![vec![xml_archive_time_stamp(1, &tree, &token)]],
            last_token: token,
            day: 0,
        }
    }

    fn rendered_chains(&self) -> Vec<String> {
        self.chains
            .iter()
            .enumerate()
            .map(|(i, stamps)| xml_chain(i + 1, stamps))
            .collect()
    }

    pub fn renew_timestamp(mut self) -> Self {
        self.day += 100;
        let covered = ALG.compute(&self.last_token);
        let token = self.tsa.stamp(&covered, self.day);
        let current = self.chains.last_mut().unwrap();
        let order = current.len() + 1;
        current.push(xml_archive_time_stamp(order, &[vec![covered]], &token));
        self.last_token = token;
        self
    }

    pub fn renew_hash_tree(mut self) -> Self {
        self.day += 100;
        let sequence = format!(
            "<ArchiveTimeStampSequence>{}</ArchiveTimeStampSequence>",
            self.rendered_chains().concat()
        );
        let ha = ALG.compute(sequence.as_bytes());
        let tree = vec![self
            .documents
            .iter()
            .map(|d| ALG.compute_concat([ALG.compute(d).as_slice(), ha.as_slice()]))
            .collect::<Vec<_>>()];
        let token = self.tsa.stamp(&tree_root(&tree), self.day);
        self.chains.push(vec![xml_archive_time_stamp(1, &tree, &token)]);
        self.last_token = token;
        self
    }

    pub fn build(self) -> Vec<u8> {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <EvidenceRecord xmlns=\"urn:ietf:params:xml:ns:ers\" Version=\"1.0\">\
             <ArchiveTimeStampSequence>{}</ArchiveTimeStampSequence></EvidenceRecord>",
            self.rendered_chains().concat()
        )
        .into_bytes()
    }
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

const BYTE_RANGE_SLOT: &str = "[0 0000000000 0000000000 0000000000]";

/// Options of one signature.
#[derive(Debug, Clone, Default)]
pub struct SignatureOptions {
    pub name: String,
    pub doc_timestamp: bool,
    pub docmdp: Option<i64>,
    pub lock: Option<String>,
}

impl SignatureOptions {
    pub fn signature(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn timestamp(name: &str) -> Self {
        Self {
            name: name.to_string(),
            doc_timestamp: true,
            ..Default::default()
        }
    }

    pub fn certify(mut self, permission: i64) -> Self {
        self.docmdp = Some(permission);
        self
    }

    pub fn lock(mut self, lock: &str) -> Self {
        self.lock = Some(lock.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

/// Writes a one-page document and appends incremental updates to it.
pub struct PdfBuilder {
    pub data: Vec<u8>,
    next_id: u32,
    fields: Vec<u32>,
    annots: Vec<u32>,
    catalog_extra: Vec<(String, String)>,
    signatures: HashMap<String, (u32, Span)>,
    text_fields: HashMap<String, u32>,
    signed: u32,
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            data: b"%PDF-1.7\n".to_vec(),
            next_id: 5,
            fields: Vec::new(),
            annots: Vec::new(),
            catalog_extra: Vec::new(),
            signatures: HashMap::new(),
            text_fields: HashMap::new(),
            signed: 0,
        };
        builder.write_catalog();
        builder.object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
        builder.write_page();
        builder.write_acroform();
        builder.finish_update();
        builder
    }

    pub fn bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(self.data.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn object(&mut self, id: u32, body: &str) -> Span {
        let start = self.data.len();
        self.data
            .extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
        Span {
            start,
            end: self.data.len(),
        }
    }

    fn write_catalog(&mut self) {
        let extra: String = self
            .catalog_extra
            .iter()
            .map(|(k, v)| format!(" /{} {}", k, v))
            .collect();
        self.object(1, &format!("<< /Type /Catalog /Pages 2 0 R /AcroForm 4 0 R{} >>", extra));
    }

    fn set_catalog_entry(&mut self, key: &str, value: String) {
        self.catalog_extra.retain(|(k, _)| k != key);
        self.catalog_extra.push((key.to_string(), value));
        self.write_catalog();
    }

    fn write_page(&mut self) {
        let annots = if self.annots.is_empty() {
            String::new()
        } else {
            let refs: Vec<String> = self.annots.iter().map(|id| format!("{} 0 R", id)).collect();
            format!(" /Annots [{}]", refs.join(" "))
        };
        self.object(3, &format!("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792]{} >>", annots));
    }

    fn write_acroform(&mut self) {
        let refs: Vec<String> = self.fields.iter().map(|id| format!("{} 0 R", id)).collect();
        self.object(4, &format!("<< /Fields [{}] /SigFlags 3 >>", refs.join(" ")));
    }

    fn finish_update(&mut self) {
        self.data.extend_from_slice(
            format!("trailer\n<< /Root 1 0 R /Size {} >>\nstartxref\n0\n%%EOF\n", self.next_id).as_bytes(),
        );
    }

    /// Append a signature or document timestamp as its own revision.
    pub fn sign(&mut self, options: SignatureOptions) -> &mut Self {
        self.signed += 1;
        let sig_id = self.alloc();
        let field_id = self.alloc();
        let placeholder = SignaturePlaceholder::new(32);

        let header = if options.doc_timestamp {
            "/Type /DocTimeStamp /Filter /Adobe.PPKLite /SubFilter /ETSI.RFC3161"
        } else {
            "/Type /Sig /Filter /Adobe.PPKLite /SubFilter /ETSI.CAdES.detached"
        };
        let reference = options
            .docmdp
            .map(|p| {
                format!(
                    " /Reference [<< /Type /SigRef /TransformMethod /DocMDP /TransformParams << /Type /TransformParams /P {} /V /1.2 >> >>]",
                    p
                )
            })
            .unwrap_or_default();
        let body = format!(
            "<< {} /M (D:202401{:02}120000Z) /ByteRange {}{} /Contents {} >>",
            header,
            (self.signed % 28) + 1,
            BYTE_RANGE_SLOT,
            reference,
            placeholder.text()
        );
        let span = self.object(sig_id, &body);
        let object_text = &self.data[span.start..span.end];
        let range_offset = span.start + find(object_text, BYTE_RANGE_SLOT.as_bytes());
        let contents_offset = span.start + find(object_text, placeholder.text().as_bytes());

        let lock = options.lock.as_ref().map(|l| format!(" /Lock {}", l)).unwrap_or_default();
        self.object(
            field_id,
            &format!(
                "<< /FT /Sig /T ({}) /V {} 0 R /Type /Annot /Subtype /Widget /Rect [0 0 0 0] /P 3 0 R{} >>",
                options.name, sig_id, lock
            ),
        );
        self.fields.push(field_id);
        self.write_acroform();
        if options.docmdp.is_some() {
            self.set_catalog_entry("Perms", format!("<< /DocMDP {} 0 R >>", sig_id));
        }
        self.finish_update();

        let range = placeholder.byte_range(self.data.len(), contents_offset).values();
        let range_text = format!("[{} {:010} {:010} {:010}]", range[0], range[1], range[2], range[3]);
        self.data[range_offset..range_offset + range_text.len()].copy_from_slice(range_text.as_bytes());
        let signed = ltv_oxide::pdf::ByteRange::new(range).signed_content(&self.data).unwrap();
        placeholder
            .fill(&mut self.data, contents_offset, &ALG.compute(&signed))
            .unwrap();

        self.signatures.insert(options.name, (sig_id, span));
        self
    }

    /// Append a DSS update holding `certificates`.
    pub fn add_dss(&mut self, certificates: &[&[u8]]) -> &mut Self {
        let mut refs = Vec::new();
        for cert in certificates {
            let id = self.alloc();
            self.data
                .extend_from_slice(format!("{} 0 obj\n<< /Length {} >>\nstream\n", id, cert.len()).as_bytes());
            self.data.extend_from_slice(cert);
            self.data.extend_from_slice(b"\nendstream\nendobj\n");
            refs.push(format!("{} 0 R", id));
        }
        let dss_id = self.alloc();
        self.object(dss_id, &format!("<< /Type /DSS /Certs [{}] >>", refs.join(" ")));
        self.set_catalog_entry("DSS", format!("{} 0 R", dss_id));
        self.finish_update();
        self
    }

    /// Append a square annotation on the page.
    pub fn annotate(&mut self, rect: [i32; 4]) -> &mut Self {
        let id = self.alloc();
        self.object(
            id,
            &format!(
                "<< /Type /Annot /Subtype /Square /Rect [{} {} {} {}] /P 3 0 R >>",
                rect[0], rect[1], rect[2], rect[3]
            ),
        );
        self.annots.push(id);
        self.write_page();
        self.finish_update();
        self
    }

    /// Append a text field with `value`.
    pub fn text_field(&mut self, name: &str, value: &str) -> &mut Self {
        let id = self.alloc();
        self.object(id, &format!("<< /FT /Tx /T ({}) /V ({}) >>", name, value));
        self.fields.push(id);
        self.text_fields.insert(name.to_string(), id);
        self.write_acroform();
        self.finish_update();
        self
    }

    /// Append a new value for an existing text field.
    pub fn fill_field(&mut self, name: &str, value: &str) -> &mut Self {
        let id = self.text_fields[name];
        self.object(id, &format!("<< /FT /Tx /T ({}) /V ({}) >>", name, value));
        self.finish_update();
        self
    }

    /// Append an arbitrary object definition.
    pub fn rewrite(&mut self, id: u32, body: &str) -> &mut Self {
        self.object(id, body);
        self.finish_update();
        self
    }

    /// Append a modified copy of a signature dictionary.
    pub fn rewrite_signature(&mut self, name: &str, edit: impl Fn(&str) -> String) -> &mut Self {
        let (_, span) = self.signatures[name];
        let original = String::from_utf8(self.data[span.start..span.end].to_vec()).unwrap();
        let edited = edit(&original);
        self.data.extend_from_slice(edited.as_bytes());
        self.finish_update();
        self
    }

    /// Object number of a signature dictionary.
    pub fn signature_id(&self, name: &str) -> u32 {
        self.signatures[name].0
    }
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle present")
}

/// Replace the `/ByteRange` array of a signature object text.
pub fn with_byte_range(object_text: &str, range: [i64; 4]) -> String {
    let start = object_text.find("/ByteRange [").unwrap() + "/ByteRange ".len();
    let end = start + object_text[start..].find(']').unwrap() + 1;
    format!(
        "{}[{} {} {} {}]{}",
        &object_text[..start],
        range[0],
        range[1],
        range[2],
        range[3],
        &object_text[end..]
    )
}

/// Replace the `/Contents` hex string of a signature object text.
pub fn with_contents(object_text: &str, hex: &str) -> String {
    let start = object_text.find("/Contents <").unwrap() + "/Contents ".len();
    let end = start + object_text[start..].find('>').unwrap() + 1;
    format!("{}<{}>{}", &object_text[..start], hex, &object_text[end..])
}
