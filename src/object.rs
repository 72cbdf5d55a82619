//! PDF object types.
//!
//! The subset of the PDF object model needed to read signature fields,
//! DSS dictionaries, pages and annotations across incremental revisions.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io::Read;

/// PDF dictionary.
pub type PdfDict = HashMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (starting with /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(PdfDict),
    /// Stream (dictionary + raw data)
    Stream {
        /// Stream dictionary
        dict: PdfDict,
        /// Stream data, still encoded
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Human-readable type name, without data.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an integer or real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&PdfDict> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// String value decoded as text (UTF-16BE with BOM, otherwise lossy UTF-8).
    pub fn as_text(&self) -> Option<String> {
        self.as_string().map(decode_text_string)
    }

    /// Check if object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// `/Type` entry of a dictionary or stream.
    pub fn dict_type(&self) -> Option<&str> {
        self.as_dict()?.get("Type")?.as_name()
    }

    /// Decode stream data.
    ///
    /// Only unfiltered and `/FlateDecode` streams are supported, which covers
    /// the certificate, CRL and OCSP streams written into DSS dictionaries.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        match self {
            Object::Stream { dict, data } => {
                let filters = dict.get("Filter").map(filter_names).unwrap_or_default();
                let mut decoded = data.to_vec();
                for filter in filters {
                    decoded = match filter.as_str() {
                        "FlateDecode" | "Fl" => inflate(&decoded)?,
                        other => {
                            return Err(Error::Decode(format!("unsupported filter /{}", other)))
                        },
                    };
                }
                Ok(decoded)
            },
            _ => Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: self.type_name().to_string(),
            }),
        }
    }
}

fn filter_names(filter_obj: &Object) -> Vec<String> {
    match filter_obj {
        Object::Name(name) => vec![name.clone()],
        Object::Array(arr) => arr
            .iter()
            .filter_map(|obj| obj.as_name().map(|s| s.to_string()))
            .collect(),
        _ => vec![],
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Decode(format!("FlateDecode failed: {}", e)))?;
    Ok(out)
}

/// Decode a PDF text string.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_object_accessors() {
        assert_eq!(Object::Integer(42).as_integer(), Some(42));
        assert_eq!(Object::Real(1.5).as_number(), Some(1.5));
        assert_eq!(Object::Name("Sig".to_string()).as_name(), Some("Sig"));
        assert!(Object::Null.is_null());
        assert!(Object::Integer(1).as_name().is_none());
    }

    #[test]
    fn test_dict_type() {
        let mut dict = HashMap::new();
        dict.insert("Type".to_string(), Object::Name("DocTimeStamp".to_string()));
        let obj = Object::Dictionary(dict);
        assert_eq!(obj.dict_type(), Some("DocTimeStamp"));
    }

    #[test]
    fn test_text_string_utf16() {
        let obj = Object::String(vec![0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42]);
        assert_eq!(obj.as_text().as_deref(), Some("AB"));
    }

    #[test]
    fn test_object_ref_display() {
        assert_eq!(format!("{}", ObjectRef::new(10, 0)), "10 0 R");
    }

    #[test]
    fn test_decode_stream_no_filter() {
        let obj = Object::Stream {
            dict: HashMap::new(),
            data: bytes::Bytes::from_static(b"Hello"),
        };
        assert_eq!(obj.decode_stream_data().unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_stream_flate() {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"certificate bytes").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::Name("FlateDecode".to_string()));
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from(compressed),
        };
        assert_eq!(obj.decode_stream_data().unwrap(), b"certificate bytes");
    }

    #[test]
    fn test_decode_stream_unsupported_filter() {
        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::Name("DCTDecode".to_string()));
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"x"),
        };
        assert!(matches!(obj.decode_stream_data(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_stream_not_a_stream() {
        match Object::Integer(42).decode_stream_data() {
            Err(Error::InvalidObjectType { expected, found }) => {
                assert_eq!(expected, "Stream");
                assert_eq!(found, "Integer");
            },
            _ => panic!("Expected InvalidObjectType error"),
        }
    }
}
