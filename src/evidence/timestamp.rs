//! RFC 3161 timestamp tokens of archive timestamps.
//!
//! Token decoding and signature checks sit behind [`TimestampVerifier`] so
//! callers can plug in full CMS verification. [`CmsTimestampVerifier`]
//! decodes `ContentInfo -> SignedData -> eContent -> TSTInfo` and checks that
//! a signer's `message-digest` attribute covers the encapsulated `TSTInfo`.

use crate::digest::{Digest, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::evidence::reference::ReferenceValidation;
use crate::evidence::types::RenewalKind;
use chrono::{DateTime, Utc};
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use serde::Serialize;
use x509_tsp::TstInfo;

const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_CT_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");
const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

/// Content of a timestamp token relevant to evidence records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampInfo {
    /// Message imprint algorithm and hashed message
    pub message_imprint: Digest,
    /// TSA generation time
    pub generation_time: DateTime<Utc>,
}

/// Result of a token signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SignatureCheck {
    /// Signed attributes cover the token content
    pub intact: bool,
    /// Signature fully verified
    pub valid: bool,
}

/// Decodes and verifies timestamp tokens.
pub trait TimestampVerifier {
    /// Message imprint and generation time of `token`.
    fn read_info(&self, token: &[u8]) -> Result<TimestampInfo>;

    /// Signature check of `token`.
    fn verify_signature(&self, token: &[u8]) -> SignatureCheck;
}

/// [`TimestampVerifier`] over CMS `SignedData` tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmsTimestampVerifier;

impl CmsTimestampVerifier {
    fn signed_data(token: &[u8]) -> Result<SignedData> {
        let content_info = ContentInfo::from_der(token)?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(Error::InvalidTimestamp(format!(
                "content type {} is not signed-data",
                content_info.content_type
            )));
        }
        Ok(SignedData::from_der(&content_info.content.to_der()?)?)
    }

    /// DER of the encapsulated `TSTInfo`.
    fn tst_info_der(signed: &SignedData) -> Result<Vec<u8>> {
        if signed.encap_content_info.econtent_type != ID_CT_TST_INFO {
            return Err(Error::InvalidTimestamp(format!(
                "eContentType {} is not id-ct-TSTInfo",
                signed.encap_content_info.econtent_type
            )));
        }
        let econtent = signed
            .encap_content_info
            .econtent
            .as_ref()
            .ok_or_else(|| Error::InvalidTimestamp("missing eContent".to_string()))?;
        let octets = OctetString::from_der(&econtent.to_der()?)?;
        Ok(octets.as_bytes().to_vec())
    }

    fn signed_attributes_cover(signed: &SignedData, tst_der: &[u8]) -> Result<bool> {
        for signer in signed.signer_infos.0.iter() {
            let algorithm = match DigestAlgorithm::from_oid(&signer.digest_alg.oid) {
                Ok(alg) => alg,
                Err(e) => {
                    log::debug!("Skipping signer: {}", e);
                    continue;
                },
            };
            let expected = algorithm.compute(tst_der);
            let Some(attrs) = signer.signed_attrs.as_ref() else {
                continue;
            };
            for attr in attrs.iter().filter(|a| a.oid == ID_MESSAGE_DIGEST) {
                for value in attr.values.iter() {
                    let digest = OctetString::from_der(&value.to_der()?)?;
                    if digest.as_bytes() == expected.as_slice() {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }
}

impl TimestampVerifier for CmsTimestampVerifier {
    fn read_info(&self, token: &[u8]) -> Result<TimestampInfo> {
        let signed = Self::signed_data(token)?;
        let tst = TstInfo::from_der(&Self::tst_info_der(&signed)?)?;
        let algorithm = DigestAlgorithm::from_oid(&tst.message_imprint.hash_algorithm.oid)?;
        let since_epoch = tst.gen_time.to_unix_duration();
        let generation_time = DateTime::<Utc>::from_timestamp(since_epoch.as_secs() as i64, since_epoch.subsec_nanos())
            .ok_or_else(|| Error::InvalidTimestamp("genTime out of range".to_string()))?;
        Ok(TimestampInfo {
            message_imprint: Digest::new(algorithm, tst.message_imprint.hashed_message.as_bytes().to_vec()),
            generation_time,
        })
    }

    fn verify_signature(&self, token: &[u8]) -> SignatureCheck {
        let intact = Self::signed_data(token)
            .and_then(|signed| {
                let tst_der = Self::tst_info_der(&signed)?;
                Self::signed_attributes_cover(&signed, &tst_der)
            })
            .unwrap_or_else(|e| {
                log::warn!("Timestamp signature check failed: {}", e);
                false
            });
        SignatureCheck { intact, valid: intact }
    }
}

/// Kind of object a timestamp covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimestampedObjectType {
    /// A signature of the embedding document
    Signature,
    /// An archived data object
    SignedData,
    /// A certificate
    Certificate,
    /// A CRL or OCSP response
    Revocation,
    /// A timestamp
    Timestamp,
    /// Another evidence record
    EvidenceRecord,
}

/// Object covered by a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TimestampedReference {
    /// Category
    pub object_type: TimestampedObjectType,
    /// Identifier (document name or token id)
    pub id: String,
}

impl TimestampedReference {
    /// Create a reference.
    pub fn new(object_type: TimestampedObjectType, id: impl Into<String>) -> Self {
        Self {
            object_type,
            id: id.into(),
        }
    }
}

/// Validation result of one archive timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveTimestampToken {
    /// Identifier, unique within a validation run
    pub id: String,
    /// Index of the chain
    pub chain_index: usize,
    /// Index within the chain
    pub index_in_chain: usize,
    /// Relation to earlier timestamps
    pub renewal_kind: RenewalKind,
    /// Algorithm used for this timestamp's hash tree
    pub digest_algorithm: DigestAlgorithm,
    /// Decoded token content
    pub info: TimestampInfo,
    /// A root could be computed
    pub message_imprint_found: bool,
    /// Computed root equals the message imprint
    pub message_imprint_intact: bool,
    /// Token signature check
    pub signature: SignatureCheck,
    /// Digest matchers, message imprint first
    pub reference_validations: Vec<ReferenceValidation>,
    /// Objects covered by this timestamp
    pub timestamped_references: Vec<TimestampedReference>,
}

impl ArchiveTimestampToken {
    /// Root hash was computable.
    pub fn is_message_imprint_data_found(&self) -> bool {
        self.message_imprint_found
    }

    /// Root hash equals the token's message imprint.
    pub fn is_message_imprint_data_intact(&self) -> bool {
        self.message_imprint_intact
    }

    /// Token signature covers its content.
    pub fn is_signature_intact(&self) -> bool {
        self.signature.intact
    }

    /// Token signature verified.
    pub fn is_signature_valid(&self) -> bool {
        self.signature.valid
    }

    /// Generation time.
    pub fn generation_time(&self) -> DateTime<Utc> {
        self.info.generation_time
    }
}
