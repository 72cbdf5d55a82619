//! Built-in backend reading objects by scanning their definitions.
//!
//! The document is scanned once for `N G obj ... endobj` definitions;
//! cross-reference tables are not consulted, which keeps damaged and
//! hand-made incremental files readable. Every definition keeps its byte
//! span, so a revision view over the first `end` bytes is a filter over the
//! shared index rather than a rescan.

use crate::error::OpenError;
use crate::object::{Object, ObjectRef, PdfDict};
use crate::objstm::parse_object_stream;
use crate::parser::{find_keyword, parse_indirect_object, parse_object};
use crate::pdf::reader::{PdfDocumentReader, PdfReaderFactory};
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::collections::HashMap;
use std::sync::Arc;

lazy_static! {
    static ref OBJECT_HEADER: Regex = Regex::new(r"(?-u)(\d+)\s+(\d+)\s+obj").expect("valid regex");
}

const HEADER_WINDOW: usize = 1024;

#[derive(Debug)]
struct IndexedObject {
    reference: ObjectRef,
    end: usize,
    object: Object,
}

#[derive(Debug)]
struct TrailerDefinition {
    end: usize,
    dict: PdfDict,
}

/// Definitions of a whole document, ordered by position.
#[derive(Debug)]
struct ObjectIndex {
    data: Bytes,
    objects: Vec<IndexedObject>,
    trailers: Vec<TrailerDefinition>,
}

impl ObjectIndex {
    fn build(data: Bytes) -> Self {
        let mut objects = Vec::new();
        let mut trailers = Vec::new();
        let mut pos = 0;
        while let Some(found) = OBJECT_HEADER.find_at(&data, pos) {
            let start = found.start();
            if start > 0 && data[start - 1].is_ascii_digit() {
                pos = found.end();
                continue;
            }
            match parse_indirect_object(&data[start..]) {
                Ok((rest, (reference, object))) => {
                    let end = data.len() - rest.len();
                    if object.dict_type() == Some("XRef") {
                        if let Some(dict) = object.as_dict() {
                            trailers.push(TrailerDefinition { end, dict: dict.clone() });
                        }
                    }
                    if object.dict_type() == Some("ObjStm") {
                        match parse_object_stream(&object) {
                            Ok(members) => objects.extend(members.into_iter().map(|(id, member)| IndexedObject {
                                reference: ObjectRef::new(id, 0),
                                end,
                                object: member,
                            })),
                            Err(e) => log::warn!("Object stream {} unreadable: {}", reference, e),
                        }
                    }
                    objects.push(IndexedObject { reference, end, object });
                    pos = end.max(found.end());
                },
                Err(e) => {
                    log::debug!("Skipping unparsable object header at {}: {:?}", start, e);
                    pos = found.end();
                },
            }
        }

        let mut search = 0;
        while let Some(offset) = find_keyword(&data[search..], b"trailer") {
            let after = search + offset + b"trailer".len();
            if let Ok((rest, Object::Dictionary(dict))) = parse_object(&data[after..]) {
                trailers.push(TrailerDefinition {
                    end: data.len() - rest.len(),
                    dict,
                });
            }
            search = after;
        }
        trailers.sort_by_key(|t| t.end);

        log::debug!(
            "Indexed {} object definitions and {} trailers in {} bytes",
            objects.len(),
            trailers.len(),
            data.len()
        );
        Self { data, objects, trailers }
    }
}

/// [`PdfDocumentReader`] over a scanned object index.
#[derive(Debug, Clone)]
pub struct LexicalReader {
    index: Arc<ObjectIndex>,
    end: usize,
    table: HashMap<ObjectRef, usize>,
    trailer: PdfDict,
}

impl LexicalReader {
    fn view(index: Arc<ObjectIndex>, end: usize) -> Result<Self, OpenError> {
        let mut table = HashMap::new();
        for (position, entry) in index.objects.iter().enumerate() {
            if entry.end <= end {
                table.insert(entry.reference, position);
            }
        }
        if table.is_empty() {
            return Err(OpenError::Truncated(end));
        }

        let mut trailer = PdfDict::new();
        for definition in index.trailers.iter().filter(|t| t.end <= end) {
            for (key, value) in &definition.dict {
                trailer.insert(key.clone(), value.clone());
            }
        }
        let mut reader = Self {
            index,
            end,
            table,
            trailer,
        };
        if !reader.trailer.contains_key("Root") {
            let catalog = reader
                .object_refs()
                .into_iter()
                .rev()
                .find(|r| reader.object(*r).and_then(Object::dict_type) == Some("Catalog"));
            match catalog {
                Some(root) => {
                    log::debug!("No trailer /Root, using catalog {}", root);
                    reader.trailer.insert("Root".to_string(), Object::Reference(root));
                },
                None => return Err(OpenError::Malformed("no document catalog".to_string())),
            }
        }
        Ok(reader)
    }
}

impl PdfDocumentReader for LexicalReader {
    fn len(&self) -> usize {
        self.end
    }

    fn data(&self) -> &[u8] {
        &self.index.data[..self.end]
    }

    fn trailer(&self) -> &PdfDict {
        &self.trailer
    }

    fn object(&self, reference: ObjectRef) -> Option<&Object> {
        self.table
            .get(&reference)
            .map(|&position| &self.index.objects[position].object)
    }

    fn object_refs(&self) -> Vec<ObjectRef> {
        let mut refs: Vec<ObjectRef> = self.table.keys().copied().collect();
        refs.sort();
        refs
    }

    fn open_revision(&self, end: usize) -> Result<Box<dyn PdfDocumentReader>, OpenError> {
        let end = end.min(self.end);
        Ok(Box::new(Self::view(Arc::clone(&self.index), end)?))
    }
}

/// Factory of [`LexicalReader`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReaderFactory;

impl PdfReaderFactory for LexicalReaderFactory {
    fn open(&self, data: Bytes) -> Result<Box<dyn PdfDocumentReader>, OpenError> {
        let window = &data[..data.len().min(HEADER_WINDOW)];
        if find_keyword(window, b"%PDF-").is_none() {
            let shown = String::from_utf8_lossy(&window[..window.len().min(8)]).to_string();
            return Err(OpenError::NotPdf(shown));
        }
        let len = data.len();
        let index = Arc::new(ObjectIndex::build(data));
        Ok(Box::new(LexicalReader::view(index, len)?))
    }
}
