//! Signature byte ranges.
//!
//! A ByteRange is an array of four integers
//! `[offset1, length1, offset2, length2]`. The gap between the two parts
//! holds the hex-encoded `/Contents` value of the signature, including its
//! `<` and `>` delimiters.

use crate::error::{Error, Result};
use crate::object::Object;
use crate::parser::decode_hex;
use serde::Serialize;
use std::cmp::Ordering;
use std::ops::Range;

/// `/ByteRange` of a signature dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ByteRange([i64; 4]);

impl ByteRange {
    /// Create a byte range from its four values.
    pub fn new(values: [i64; 4]) -> Self {
        Self(values)
    }

    /// Read a `/ByteRange` array of four integers.
    pub fn from_object(object: &Object) -> Option<Self> {
        let array = object.as_array()?;
        if array.len() != 4 {
            return None;
        }
        let mut values = [0i64; 4];
        for (slot, item) in values.iter_mut().zip(array) {
            *slot = item.as_integer()?;
        }
        Some(Self(values))
    }

    /// The four values.
    pub fn values(&self) -> [i64; 4] {
        self.0
    }

    /// Offset of the first part.
    pub fn start(&self) -> i64 {
        self.0[0]
    }

    /// End of the first part, where the signature value starts.
    pub fn first_part_end(&self) -> i64 {
        self.0[0].saturating_add(self.0[1])
    }

    /// Start of the second part, just after the signature value.
    pub fn second_part_start(&self) -> i64 {
        self.0[2]
    }

    /// End of the signed revision.
    pub fn end(&self) -> i64 {
        self.0[2].saturating_add(self.0[3])
    }

    /// Check the range is well formed and lies within a document of `len` bytes.
    pub fn validate(&self, len: usize) -> Result<()> {
        if self.0.iter().any(|v| *v < 0) {
            return Err(Error::InvalidPdf(format!("ByteRange {} has negative values", self)));
        }
        if self.first_part_end() > self.second_part_start() {
            return Err(Error::InvalidPdf(format!(
                "ByteRange {} first part overlaps the second part",
                self
            )));
        }
        if self.end() > len as i64 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange {} exceeds document size {}",
                self, len
            )));
        }
        Ok(())
    }

    /// Concatenation of both parts.
    pub fn signed_content(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.validate(data.len())?;
        let first = self.start() as usize..self.first_part_end() as usize;
        let second = self.second_part_start() as usize..self.end() as usize;
        let mut out = Vec::with_capacity(first.len() + second.len());
        out.extend_from_slice(&data[first]);
        out.extend_from_slice(&data[second]);
        Ok(out)
    }

    /// The gap between both parts.
    pub fn signature_value_range(&self) -> Range<usize> {
        self.first_part_end().max(0) as usize..self.second_part_start().max(0) as usize
    }

    /// Bytes of the gap decoded as a hex string, `None` unless the gap is
    /// exactly one `<...>` hex string.
    pub fn signature_value(&self, data: &[u8]) -> Option<Vec<u8>> {
        let gap = data.get(self.signature_value_range())?;
        let inner = gap.strip_prefix(b"<")?.strip_suffix(b">")?;
        if !inner.iter().all(|b| b.is_ascii_hexdigit() || b.is_ascii_whitespace()) {
            return None;
        }
        decode_hex(inner).ok()
    }

    /// True when this range's first part contains the whole of `other`,
    /// in other words this signature was added after `other`.
    pub fn envelops(&self, other: &ByteRange) -> bool {
        self != other && self.start() <= other.start() && other.end() <= self.first_part_end()
    }

    /// Latest-first order of two signatures. Equal ranges fall back to
    /// `date_order`; `None` when neither range envelops the other.
    pub fn latest_first(&self, other: &ByteRange, date_order: Ordering) -> Option<Ordering> {
        if self == other {
            Some(date_order)
        } else if self.envelops(other) {
            Some(Ordering::Less)
        } else if other.envelops(self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {} {} {}]", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Reserved `/Contents` slot of a signature being written.
#[derive(Debug, Clone, Copy)]
pub struct SignaturePlaceholder {
    size: usize,
}

impl SignaturePlaceholder {
    /// Slot for a signature value of up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self { size: capacity * 2 + 2 }
    }

    /// Width of the slot in the file, delimiters included.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Zero-filled `<00..00>` slot.
    pub fn text(&self) -> String {
        format!("<{}>", "0".repeat(self.size - 2))
    }

    /// Byte range of a file of `file_size` bytes whose slot starts at `contents_offset`.
    pub fn byte_range(&self, file_size: usize, contents_offset: usize) -> ByteRange {
        let after = contents_offset + self.size;
        ByteRange::new([0, contents_offset as i64, after as i64, file_size as i64 - after as i64])
    }

    /// Write `value` hex-encoded into the slot at `contents_offset`.
    pub fn fill(&self, data: &mut [u8], contents_offset: usize, value: &[u8]) -> Result<()> {
        let hex: String = value.iter().map(|b| format!("{:02X}", b)).collect();
        if hex.len() + 2 > self.size {
            return Err(Error::InvalidPdf(format!(
                "signature value of {} bytes exceeds the {} byte slot",
                value.len(),
                self.size
            )));
        }
        let slot = data
            .get_mut(contents_offset..contents_offset + self.size)
            .ok_or_else(|| Error::InvalidPdf("signature slot outside the document".to_string()))?;
        let padded = format!("<{}{}>", hex, "0".repeat(self.size - 2 - hex.len()));
        slot.copy_from_slice(padded.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_object() {
        let array = Object::Array((1..=4).map(Object::Integer).collect());
        assert_eq!(ByteRange::from_object(&array), Some(ByteRange::new([1, 2, 3, 4])));
        assert_eq!(ByteRange::from_object(&Object::Array(vec![Object::Integer(1)])), None);
        assert_eq!(ByteRange::from_object(&Object::Null), None);
    }

    #[test]
    fn test_validate() {
        assert!(ByteRange::new([0, 100, 150, 50]).validate(200).is_ok());
        assert!(ByteRange::new([0, 100, 150, 50]).validate(199).is_err());
        assert!(ByteRange::new([0, 160, 150, 50]).validate(200).is_err());
        assert!(ByteRange::new([0, -1, 150, 50]).validate(200).is_err());
    }

    #[test]
    fn test_signed_content() {
        let range = ByteRange::new([0, 3, 6, 3]);
        assert_eq!(range.signed_content(b"AAABBBCCC").unwrap(), b"AAACCC");
        assert!(range.signed_content(b"AAABBB").is_err());
    }

    #[test]
    fn test_signature_value() {
        let data = b"AAA<0A0B>CCC";
        let range = ByteRange::new([0, 3, 9, 3]);
        assert_eq!(range.signature_value(data), Some(vec![0x0A, 0x0B]));
        assert_eq!(ByteRange::new([0, 2, 9, 3]).signature_value(data), None);
    }

    #[test]
    fn test_envelopment_order() {
        let first = ByteRange::new([0, 100, 200, 100]);
        let second = ByteRange::new([0, 400, 500, 100]);
        assert!(second.envelops(&first));
        assert!(!first.envelops(&second));
        assert!(!first.envelops(&first));
        assert_eq!(second.latest_first(&first, Ordering::Equal), Some(Ordering::Less));
        assert_eq!(first.latest_first(&second, Ordering::Equal), Some(Ordering::Greater));
        assert_eq!(first.latest_first(&first, Ordering::Greater), Some(Ordering::Greater));

        let crossing = ByteRange::new([0, 250, 350, 100]);
        assert_eq!(crossing.latest_first(&first, Ordering::Equal), None);
    }

    #[test]
    fn test_placeholder() {
        let slot = SignaturePlaceholder::new(4);
        assert_eq!(slot.size(), 10);
        assert_eq!(slot.text(), "<00000000>");
        let range = slot.byte_range(1000, 400);
        assert_eq!(range.values(), [0, 400, 410, 590]);

        let mut data = b"XX<00000000>YY".to_vec();
        slot.fill(&mut data, 2, &[0xAB, 0xCD]).unwrap();
        assert_eq!(&data, b"XX<ABCD0000>YY");
        assert!(slot.fill(&mut data, 2, &[0; 5]).is_err());
    }
}
