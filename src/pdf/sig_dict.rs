//! Signature dictionaries and the fields referencing them.

use crate::object::{Object, ObjectRef, PdfDict};
use crate::pdf::byte_range::ByteRange;
use crate::pdf::permissions::{CertificationPermission, FieldLock};
use crate::pdf::reader::PdfDocumentReader;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashSet;

const MAX_FIELD_DEPTH: usize = 32;

/// Sub-filters of timestamp dictionaries.
pub const SUB_FILTER_RFC3161: &str = "ETSI.RFC3161";

/// What a signature dictionary stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureDictionaryKind {
    /// Any other signature dictionary
    Signature,
    /// Document timestamp
    DocTimeStamp,
    /// Missing `/ByteRange` or `/Contents`
    Unsupported,
}

/// `/TransformMethod` of a signature reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransformMethod {
    /// Certification signature
    DocMdp,
    /// Field-level restrictions
    FieldMdp,
    /// Usage rights
    Ur,
    /// Anything else
    Other(String),
}

/// Entry of a signature's `/Reference` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureReference {
    /// Transform method
    pub method: TransformMethod,
    /// `/TransformParams /P` for DocMDP
    pub permission: Option<CertificationPermission>,
    /// `/TransformParams` field restrictions for FieldMDP
    pub lock: Option<FieldLock>,
}

/// Signature or document timestamp dictionary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfSignatureDictionary {
    /// Indirect reference of the dictionary
    pub reference: Option<ObjectRef>,
    /// `/Type`
    pub dict_type: Option<String>,
    /// `/Filter`
    pub filter: Option<String>,
    /// `/SubFilter`
    pub sub_filter: Option<String>,
    /// Decoded `/Contents`
    #[serde(skip)]
    pub contents: Option<Vec<u8>>,
    /// `/ByteRange`
    pub byte_range: Option<ByteRange>,
    /// `/M`
    pub signing_date: Option<DateTime<Utc>>,
    /// `/Name`
    pub name: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/Reference` transforms
    pub references: Vec<SignatureReference>,
}

impl PdfSignatureDictionary {
    /// Read a signature dictionary.
    pub fn from_dict<R: PdfDocumentReader + ?Sized>(reader: &R, dict: &PdfDict, reference: Option<ObjectRef>) -> Self {
        let name = |key: &str| reader.get(dict, key).and_then(Object::as_name).map(str::to_string);
        let text = |key: &str| reader.get(dict, key).and_then(Object::as_text);
        let references = reader
            .get(dict, "Reference")
            .and_then(Object::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| reader.resolve(e).as_dict())
                    .map(|d| read_reference(reader, d))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            reference,
            dict_type: name("Type"),
            filter: name("Filter"),
            sub_filter: name("SubFilter"),
            contents: reader.get(dict, "Contents").and_then(Object::as_string).map(<[u8]>::to_vec),
            byte_range: reader.get(dict, "ByteRange").and_then(ByteRange::from_object),
            signing_date: text("M").as_deref().and_then(parse_pdf_date),
            name: text("Name"),
            reason: text("Reason"),
            location: text("Location"),
            contact_info: text("ContactInfo"),
            references,
        }
    }

    /// Classification of the dictionary.
    pub fn kind(&self) -> SignatureDictionaryKind {
        if self.byte_range.is_none() || self.contents.is_none() {
            return SignatureDictionaryKind::Unsupported;
        }
        match self.dict_type.as_deref() {
            Some("DocTimeStamp") => SignatureDictionaryKind::DocTimeStamp,
            None if self.sub_filter.as_deref() == Some(SUB_FILTER_RFC3161) => SignatureDictionaryKind::DocTimeStamp,
            _ => SignatureDictionaryKind::Signature,
        }
    }

    /// DocMDP permission of a certification signature.
    pub fn certification_permission(&self) -> Option<CertificationPermission> {
        self.references
            .iter()
            .filter(|r| r.method == TransformMethod::DocMdp)
            .find_map(|r| r.permission)
    }

    /// FieldMDP restrictions declared by the signature.
    pub fn field_locks(&self) -> impl Iterator<Item = &FieldLock> {
        self.references
            .iter()
            .filter(|r| r.method == TransformMethod::FieldMdp)
            .filter_map(|r| r.lock.as_ref())
    }
}

fn read_reference<R: PdfDocumentReader + ?Sized>(reader: &R, dict: &PdfDict) -> SignatureReference {
    let method = match reader.get(dict, "TransformMethod").and_then(Object::as_name) {
        Some("DocMDP") => TransformMethod::DocMdp,
        Some("FieldMDP") => TransformMethod::FieldMdp,
        Some("UR") | Some("UR3") => TransformMethod::Ur,
        other => TransformMethod::Other(other.unwrap_or_default().to_string()),
    };
    let params = reader.get(dict, "TransformParams").and_then(Object::as_dict);
    let permission = match method {
        TransformMethod::DocMdp => Some(
            params
                .and_then(|p| reader.get(p, "P"))
                .and_then(Object::as_integer)
                .map(CertificationPermission::from_value)
                .unwrap_or(CertificationPermission::FormFillAndSign),
        ),
        _ => None,
    };
    let lock = match method {
        TransformMethod::FieldMdp => params.map(|p| FieldLock::from_dict(reader, p)),
        _ => None,
    };
    SignatureReference {
        method,
        permission,
        lock,
    }
}

/// A signature field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfSignatureField {
    /// Fully qualified field name
    pub name: String,
    /// Partial name (`/T`)
    pub partial_name: Option<String>,
    /// Field reference
    pub reference: Option<ObjectRef>,
    /// `/Lock` dictionary
    pub lock: Option<FieldLock>,
}

/// A signature dictionary with every field using it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureEntry {
    /// The dictionary
    pub dictionary: PdfSignatureDictionary,
    /// Fields with this dictionary as `/V`
    pub fields: Vec<PdfSignatureField>,
}

impl SignatureEntry {
    /// True when one of the fields is called `name`.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// Collect the signed signature fields of the AcroForm, grouped by signature dictionary.
pub fn extract_signature_entries<R: PdfDocumentReader + ?Sized>(reader: &R) -> Vec<SignatureEntry> {
    let mut entries: Vec<SignatureEntry> = Vec::new();
    let Some(fields) = reader
        .catalog()
        .and_then(|c| reader.get(c, "AcroForm"))
        .and_then(Object::as_dict)
        .and_then(|form| reader.get(form, "Fields"))
        .and_then(Object::as_array)
    else {
        return entries;
    };
    let mut visited = HashSet::new();
    for field in fields {
        walk_field(reader, field, None, None, 0, &mut visited, &mut entries);
    }
    entries
}

fn walk_field<R: PdfDocumentReader + ?Sized>(
    reader: &R,
    node: &Object,
    parent_name: Option<&str>,
    inherited_type: Option<&str>,
    depth: usize,
    visited: &mut HashSet<ObjectRef>,
    entries: &mut Vec<SignatureEntry>,
) {
    if depth > MAX_FIELD_DEPTH {
        log::warn!("Field tree deeper than {} levels", MAX_FIELD_DEPTH);
        return;
    }
    let reference = node.as_reference();
    if let Some(r) = reference {
        if !visited.insert(r) {
            return;
        }
    }
    let Some(dict) = reader.resolve(node).as_dict() else {
        return;
    };
    let partial_name = reader.get(dict, "T").and_then(Object::as_text);
    let name = match (parent_name, partial_name.as_deref()) {
        (Some(parent), Some(own)) => format!("{}.{}", parent, own),
        (None, Some(own)) => own.to_string(),
        (Some(parent), None) => parent.to_string(),
        (None, None) => String::new(),
    };
    let field_type = reader.get(dict, "FT").and_then(Object::as_name).or(inherited_type);

    if let Some(kids) = reader.get(dict, "Kids").and_then(Object::as_array) {
        for kid in kids {
            walk_field(reader, kid, Some(&name), field_type, depth + 1, visited, entries);
        }
    }
    if field_type != Some("Sig") {
        return;
    }
    let Some(value) = dict.get("V") else {
        return;
    };
    let Some(sig_dict) = reader.resolve(value).as_dict() else {
        return;
    };
    let field = PdfSignatureField {
        name,
        partial_name,
        reference,
        lock: reader
            .get(dict, "Lock")
            .and_then(Object::as_dict)
            .map(|lock| FieldLock::from_dict(reader, lock)),
    };
    let dictionary = PdfSignatureDictionary::from_dict(reader, sig_dict, value.as_reference());
    match entries
        .iter_mut()
        .find(|e| e.dictionary.reference.is_some() && e.dictionary.reference == dictionary.reference)
    {
        Some(entry) => entry.fields.push(field),
        None => entries.push(SignatureEntry {
            dictionary,
            fields: vec![field],
        }),
    }
}

/// Parse a PDF date `D:YYYYMMDDHHmmSSOHH'mm'`. Missing trailing parts take
/// their lowest value, a missing offset means UTC.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let text = text.strip_prefix("D:").unwrap_or(text);
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits < 4 {
        return None;
    }
    let (stamp, zone) = text.split_at(digits);
    let part = |from: usize, len: usize, default: u32| -> Option<u32> {
        match stamp.get(from..from + len) {
            Some(s) => s.parse().ok(),
            None => Some(default),
        }
    };
    let year = stamp.get(0..4)?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, part(4, 2, 1)?, part(6, 2, 1)?)?;
    let naive = date.and_hms_opt(part(8, 2, 0)?, part(10, 2, 0)?, part(12, 2, 0)?)?;

    let offset_seconds = match zone.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let rest: String = zone[1..].chars().filter(char::is_ascii_digit).collect();
            let hours: i32 = rest.get(0..2).and_then(|h| h.parse().ok()).unwrap_or(0);
            let minutes: i32 = rest.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
            let seconds = hours * 3600 + minutes * 60;
            if sign == '-' {
                -seconds
            } else {
                seconds
            }
        },
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_seconds)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn dict(entries: Vec<(&str, Object)>) -> PdfDict {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    struct NoObjects(PdfDict);

    impl PdfDocumentReader for NoObjects {
        fn len(&self) -> usize {
            0
        }
        fn data(&self) -> &[u8] {
            &[]
        }
        fn trailer(&self) -> &PdfDict {
            &self.0
        }
        fn object(&self, _: ObjectRef) -> Option<&Object> {
            None
        }
        fn object_refs(&self) -> Vec<ObjectRef> {
            Vec::new()
        }
        fn open_revision(&self, _: usize) -> Result<Box<dyn PdfDocumentReader>, crate::error::OpenError> {
            Err(crate::error::OpenError::Truncated(0))
        }
    }

    fn signature(entries: Vec<(&str, Object)>) -> PdfSignatureDictionary {
        let reader = NoObjects(PdfDict::new());
        PdfSignatureDictionary::from_dict(&reader, &dict(entries), None)
    }

    fn range() -> Object {
        Object::Array(vec![Object::Integer(0), Object::Integer(10), Object::Integer(20), Object::Integer(5)])
    }

    #[test]
    fn test_kind_classification() {
        let sig = signature(vec![("Type", Object::Name("Sig".into())), ("ByteRange", range()), ("Contents", Object::String(vec![1]))]);
        assert_eq!(sig.kind(), SignatureDictionaryKind::Signature);

        let untyped = signature(vec![("ByteRange", range()), ("Contents", Object::String(vec![1]))]);
        assert_eq!(untyped.kind(), SignatureDictionaryKind::Signature);

        let tst = signature(vec![
            ("ByteRange", range()),
            ("Contents", Object::String(vec![1])),
            ("SubFilter", Object::Name(SUB_FILTER_RFC3161.into())),
        ]);
        assert_eq!(tst.kind(), SignatureDictionaryKind::DocTimeStamp);

        let typed_tst = signature(vec![
            ("Type", Object::Name("DocTimeStamp".into())),
            ("ByteRange", range()),
            ("Contents", Object::String(vec![1])),
        ]);
        assert_eq!(typed_tst.kind(), SignatureDictionaryKind::DocTimeStamp);

        let other = signature(vec![("Type", Object::Name("Annot".into())), ("ByteRange", range()), ("Contents", Object::String(vec![1]))]);
        assert_eq!(other.kind(), SignatureDictionaryKind::Signature);

        let no_range = signature(vec![("Contents", Object::String(vec![1]))]);
        assert_eq!(no_range.kind(), SignatureDictionaryKind::Unsupported);
    }

    #[test]
    fn test_docmdp_reference() {
        let params = Object::Dictionary(dict(vec![("P", Object::Integer(1))]));
        let reference = Object::Dictionary(dict(vec![
            ("TransformMethod", Object::Name("DocMDP".into())),
            ("TransformParams", params),
        ]));
        let sig = signature(vec![("Reference", Object::Array(vec![reference]))]);
        assert_eq!(sig.certification_permission(), Some(CertificationPermission::NoChanges));
    }

    #[test]
    fn test_parse_pdf_date() {
        let utc = parse_pdf_date("D:20240315103000Z").unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap());

        let shifted = parse_pdf_date("D:20240315103000+02'00'").unwrap();
        assert_eq!(shifted, Utc.with_ymd_and_hms(2024, 3, 15, 8, 30, 0).unwrap());

        let west = parse_pdf_date("D:20240315103000-05'30").unwrap();
        assert_eq!(west, Utc.with_ymd_and_hms(2024, 3, 15, 16, 0, 0).unwrap());

        assert_eq!(parse_pdf_date("D:2023").unwrap().month(), 1);
        assert!(parse_pdf_date("garbage").is_none());
        assert!(parse_pdf_date("D:20241399").is_none());
    }
}
