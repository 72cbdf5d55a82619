//! Digest algorithms and digest values.
//!
//! Evidence records name their hash algorithms by object identifier (ASN.1)
//! or by XML Signature URI (XML). Both map onto [`DigestAlgorithm`].

use crate::error::{Error, Result};
use base64::Engine;
use der::asn1::ObjectIdentifier;
use serde::{Serialize, Serializer};
use sha2::Digest as _;

/// Digest algorithm used by hash trees, message imprints and byte ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlgorithm {
    /// MD5 (legacy, only accepted for reading)
    Md5,
    /// SHA-1 (deprecated, but still common in legacy records)
    Sha1,
    /// SHA-224
    Sha224,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

const OID_MD5: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.2.5");
const OID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const OID_SHA224: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.4");
const OID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const OID_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
const OID_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

impl DigestAlgorithm {
    /// All supported algorithms.
    pub const ALL: [DigestAlgorithm; 6] = [
        DigestAlgorithm::Md5,
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha224,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    /// Get the OID for this digest algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Md5 => OID_MD5,
            DigestAlgorithm::Sha1 => OID_SHA1,
            DigestAlgorithm::Sha224 => OID_SHA224,
            DigestAlgorithm::Sha256 => OID_SHA256,
            DigestAlgorithm::Sha384 => OID_SHA384,
            DigestAlgorithm::Sha512 => OID_SHA512,
        }
    }

    /// Look up an algorithm by OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.oid() == *oid)
            .ok_or_else(|| Error::UnsupportedDigestAlgorithm(oid.to_string()))
    }

    /// XML Signature / XML Encryption algorithm URI.
    pub fn xml_uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "http://www.w3.org/2001/04/xmldsig-more#md5",
            DigestAlgorithm::Sha1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            DigestAlgorithm::Sha224 => "http://www.w3.org/2001/04/xmldsig-more#sha224",
            DigestAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            DigestAlgorithm::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            DigestAlgorithm::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    /// Look up an algorithm by XML URI.
    pub fn from_xml_uri(uri: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.xml_uri() == uri.trim())
            .ok_or_else(|| Error::UnsupportedDigestAlgorithm(uri.to_string()))
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha224 => "SHA-224",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 16,
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha224 => 28,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Hash `data` with this algorithm.
    pub fn compute(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Md5 => md5::Md5::digest(data).to_vec(),
            DigestAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha224 => sha2::Sha224::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    /// Hash the concatenation of several byte slices.
    pub fn compute_concat<'a, I>(&self, parts: I) -> Vec<u8>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut buf = Vec::new();
        for part in parts {
            buf.extend_from_slice(part);
        }
        self.compute(&buf)
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for DigestAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// A digest value tagged with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Digest {
    /// Algorithm that produced the value
    pub algorithm: DigestAlgorithm,
    /// Raw digest bytes
    #[serde(serialize_with = "serialize_base64")]
    pub value: Vec<u8>,
}

impl Digest {
    /// Create a digest from an already computed value.
    pub fn new(algorithm: DigestAlgorithm, value: Vec<u8>) -> Self {
        Self { algorithm, value }
    }

    /// Compute the digest of `data`.
    pub fn of(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            value: algorithm.compute(data),
        }
    }

    /// Base64 rendering of the value.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.value)
    }
}

fn serialize_base64<S: Serializer>(value: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_algorithm_names() {
        assert_eq!(DigestAlgorithm::Sha256.name(), "SHA-256");
        assert_eq!(DigestAlgorithm::Sha1.name(), "SHA-1");
    }

    #[test]
    fn test_oid_lookup() {
        for alg in DigestAlgorithm::ALL {
            assert_eq!(DigestAlgorithm::from_oid(&alg.oid()).unwrap(), alg);
        }
        let unknown = ObjectIdentifier::new_unwrap("1.2.3.4");
        assert!(DigestAlgorithm::from_oid(&unknown).is_err());
    }

    #[test]
    fn test_xml_uri_lookup() {
        assert_eq!(
            DigestAlgorithm::from_xml_uri("http://www.w3.org/2001/04/xmlenc#sha256").unwrap(),
            DigestAlgorithm::Sha256
        );
        assert!(DigestAlgorithm::from_xml_uri("urn:unknown").is_err());
    }

    #[test]
    fn test_output_lengths() {
        for alg in DigestAlgorithm::ALL {
            assert_eq!(alg.compute(b"abc").len(), alg.output_len());
        }
    }

    #[test]
    fn test_sha256_known_value() {
        let digest = Digest::of(DigestAlgorithm::Sha256, b"abc");
        assert_eq!(digest.to_base64(), "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=");
    }

    #[test]
    fn test_compute_concat_matches_compute() {
        let alg = DigestAlgorithm::Sha256;
        assert_eq!(alg.compute_concat([&b"ab"[..], &b"c"[..]]), alg.compute(b"abc"));
    }
}
