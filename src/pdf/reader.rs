//! Backend seam for reading PDF revisions.
//!
//! The revision engine never parses bytes itself. It asks a
//! [`PdfReaderFactory`] for a [`PdfDocumentReader`] and uses the provided
//! traversal methods (pages, annotations, signature fields, DSS) which are
//! implemented once on top of the object accessors.

use crate::error::OpenError;
use crate::object::{Object, ObjectRef, PdfDict};
use crate::pdf::dss::PdfDssDict;
use crate::pdf::sig_dict::{extract_signature_entries, SignatureEntry};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;

/// Depth limit when following references and page tree kids.
const MAX_DEPTH: usize = 32;

static NULL: Object = Object::Null;

/// Opens documents. Injected into the revision engine.
pub trait PdfReaderFactory {
    /// Open a document, explaining why when it cannot be read.
    fn open(&self, data: Bytes) -> Result<Box<dyn PdfDocumentReader>, OpenError>;
}

/// Read access to one revision of a document.
pub trait PdfDocumentReader {
    /// Length of the revision in bytes.
    fn len(&self) -> usize;

    /// True for an empty revision.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of the revision.
    fn data(&self) -> &[u8];

    /// Effective trailer dictionary.
    fn trailer(&self) -> &PdfDict;

    /// Latest definition of an object within this revision.
    fn object(&self, reference: ObjectRef) -> Option<&Object>;

    /// Every object defined in this revision, ascending.
    fn object_refs(&self) -> Vec<ObjectRef>;

    /// Reader over the first `end` bytes.
    fn open_revision(&self, end: usize) -> Result<Box<dyn PdfDocumentReader>, OpenError>;

    /// Follow references until a direct object. Dangling references give `Null`.
    fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        let mut current = object;
        for _ in 0..MAX_DEPTH {
            match current {
                Object::Reference(r) => match self.object(*r) {
                    Some(target) => current = target,
                    None => return &NULL,
                },
                _ => return current,
            }
        }
        log::warn!("Reference chain too deep");
        &NULL
    }

    /// Resolved dictionary entry, `None` for absent or null values.
    fn get<'a>(&'a self, dict: &'a PdfDict, key: &str) -> Option<&'a Object> {
        dict.get(key).map(|o| self.resolve(o)).filter(|o| !o.is_null())
    }

    /// Document catalog.
    fn catalog(&self) -> Option<&PdfDict> {
        self.get(self.trailer(), "Root").and_then(Object::as_dict)
    }

    /// Reference of the document catalog.
    fn catalog_ref(&self) -> Option<ObjectRef> {
        self.trailer().get("Root").and_then(Object::as_reference)
    }

    /// Signature dictionaries with the fields that use them.
    fn signature_fields(&self) -> Vec<SignatureEntry> {
        extract_signature_entries(self)
    }

    /// The catalog's `/DSS` dictionary.
    fn dss_dictionary(&self) -> Option<PdfDssDict> {
        PdfDssDict::extract(self)
    }

    /// Pages in document order.
    fn pages(&self) -> Vec<PdfPage> {
        let mut pages = Vec::new();
        let Some(root) = self.catalog().and_then(|c| c.get("Pages")) else {
            return pages;
        };
        let mut visited = HashSet::new();
        collect_pages(self, root, 0, &mut visited, &mut pages);
        pages
    }

    /// Number of pages.
    fn page_count(&self) -> usize {
        self.pages().len()
    }

    /// Annotations of the page at `page` (zero-based).
    fn annotations(&self, page: usize) -> Vec<PdfAnnotation> {
        let pages = self.pages();
        let Some(page_obj) = pages.get(page) else {
            return Vec::new();
        };
        let Some(annots) = self.get(&page_obj.dict, "Annots").and_then(Object::as_array) else {
            return Vec::new();
        };
        annots
            .iter()
            .filter_map(|entry| {
                let dict = self.resolve(entry).as_dict()?;
                Some(PdfAnnotation {
                    reference: entry.as_reference(),
                    page,
                    subtype: dict.get("Subtype").and_then(Object::as_name).map(str::to_string),
                    rect: self.get(dict, "Rect").and_then(Rect::from_object),
                })
            })
            .collect()
    }
}

fn collect_pages<R: PdfDocumentReader + ?Sized>(
    reader: &R,
    node: &Object,
    depth: usize,
    visited: &mut HashSet<ObjectRef>,
    pages: &mut Vec<PdfPage>,
) {
    if depth > MAX_DEPTH {
        log::warn!("Page tree deeper than {} levels", MAX_DEPTH);
        return;
    }
    let reference = node.as_reference();
    if let Some(r) = reference {
        if !visited.insert(r) {
            log::warn!("Page tree cycle at {}", r);
            return;
        }
    }
    let Some(dict) = reader.resolve(node).as_dict() else {
        return;
    };
    match dict.get("Kids").map(|k| reader.resolve(k)).and_then(Object::as_array) {
        Some(kids) if dict.get("Type").and_then(Object::as_name) != Some("Page") => {
            for kid in kids {
                collect_pages(reader, kid, depth + 1, visited, pages);
            }
        },
        _ => pages.push(PdfPage {
            reference,
            dict: dict.clone(),
        }),
    }
}

/// A page dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfPage {
    /// Indirect reference, when the page is not a direct object
    pub reference: Option<ObjectRef>,
    /// Page dictionary
    pub dict: PdfDict,
}

/// Rectangle in default user space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    /// Left
    pub x0: f64,
    /// Bottom
    pub y0: f64,
    /// Right
    pub x1: f64,
    /// Top
    pub y1: f64,
}

impl Rect {
    /// Normalized rectangle from two corners.
    pub fn from_points(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Read a `[x0 y0 x1 y1]` array.
    pub fn from_object(object: &Object) -> Option<Self> {
        match object.as_array()?.as_slice() {
            [a, b, c, d] => Some(Self::from_points(a.as_number()?, b.as_number()?, c.as_number()?, d.as_number()?)),
            _ => None,
        }
    }

    /// True when both rectangles share some area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && self.x1 > other.x0 && self.y0 < other.y1 && self.y1 > other.y0
    }
}

/// An annotation of a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfAnnotation {
    /// Indirect reference
    pub reference: Option<ObjectRef>,
    /// Zero-based page index
    pub page: usize,
    /// `/Subtype`
    pub subtype: Option<String>,
    /// `/Rect`
    pub rect: Option<Rect>,
}

/// Renders pages for visual comparison.
pub trait PageRasterizer {
    /// Grayscale rendering of a zero-based page, `None` when it cannot be rendered.
    fn rasterize(&self, reader: &dyn PdfDocumentReader, page: usize) -> Option<image::GrayImage>;
}
