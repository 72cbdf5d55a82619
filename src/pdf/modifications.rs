//! Differences between a signed revision and a later state of the document.
//!
//! Four finders run over a pair of readers: page count, overlapping new
//! annotations, rasterized page comparison and an object-by-object diff
//! whose entries are classified by what an incremental update is allowed
//! to do after signing.

use crate::config::ValidationConfig;
use crate::object::{Object, ObjectRef, PdfDict};
use crate::pdf::reader::{PageRasterizer, PdfAnnotation, PdfDocumentReader};
use crate::pdf::sig_dict::SignatureDictionaryKind;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

const MAX_PARENT_DEPTH: usize = 32;

/// Catalog keys an extension may touch.
const CATALOG_EXTENSION_KEYS: &[&str] = &["DSS", "Extensions"];
/// Catalog keys form filling and signing may touch.
const CATALOG_FORM_KEYS: &[&str] = &["AcroForm", "DSS", "Extensions", "Perms"];

/// How an object changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectChange {
    /// Defined only in the later state
    Created,
    /// Redefined with a different value
    Modified,
    /// Defined only in the earlier state
    Deleted,
}

/// Category of a changed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectModificationKind {
    /// Cross-reference streams, DSS, metadata and document timestamps
    Extension,
    /// Form fields, widgets and signatures
    FormFillAndSignature,
    /// Non-widget annotations
    AnnotationCreation,
    /// Anything else
    Undefined,
}

/// One changed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectModification {
    /// Object reference
    pub reference: ObjectRef,
    /// Change
    pub change: ObjectChange,
    /// Category
    pub kind: ObjectModificationKind,
    /// `/Type` of the object
    pub object_type: Option<String>,
    /// Fully qualified name when the object is a form field
    pub field_name: Option<String>,
    /// Dictionary keys whose value changed
    pub changed_keys: Vec<String>,
}

/// Page count changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageDifference {
    /// Pages in the signed revision
    pub signed_pages: usize,
    /// Pages in the later state
    pub final_pages: usize,
}

/// A new annotation covering another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationOverlap {
    /// Zero-based page
    pub page: usize,
    /// The added annotation
    pub added: Option<ObjectRef>,
    /// The annotation it covers
    pub covered: Option<ObjectRef>,
}

/// A page that renders differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisualDifference {
    /// Zero-based page
    pub page: usize,
    /// Pixels above the tolerance, or every pixel when sizes differ
    pub differing_pixels: u64,
}

/// Result of the differences finders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PdfModificationDetection {
    /// New annotations overlapping others
    pub annotation_overlaps: Vec<AnnotationOverlap>,
    /// Page count change
    pub page_differences: Option<PageDifference>,
    /// Pages rendering differently
    pub visual_differences: Vec<VisualDifference>,
    /// Changed objects
    pub object_modifications: Vec<ObjectModification>,
}

impl PdfModificationDetection {
    /// True when any finder reported something.
    pub fn has_modifications(&self) -> bool {
        !self.annotation_overlaps.is_empty()
            || self.page_differences.is_some()
            || !self.visual_differences.is_empty()
            || !self.object_modifications.is_empty()
    }

    /// Changed objects of one category.
    pub fn modifications_of(&self, kind: ObjectModificationKind) -> impl Iterator<Item = &ObjectModification> {
        self.object_modifications.iter().filter(move |m| m.kind == kind)
    }

    /// True when some change fits no allowed category.
    pub fn has_undefined_changes(&self) -> bool {
        self.modifications_of(ObjectModificationKind::Undefined).next().is_some()
    }
}

/// Runs the differences finders.
pub struct PdfModificationsFinder<'a> {
    config: &'a ValidationConfig,
    rasterizer: Option<&'a dyn PageRasterizer>,
}

impl<'a> PdfModificationsFinder<'a> {
    /// Finder without visual comparison.
    pub fn new(config: &'a ValidationConfig) -> Self {
        Self { config, rasterizer: None }
    }

    /// Use `rasterizer` for visual comparison when enabled in the config.
    pub fn with_rasterizer(mut self, rasterizer: Option<&'a dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Compare the signed revision against the later state.
    pub fn detect(&self, signed: &dyn PdfDocumentReader, later: &dyn PdfDocumentReader) -> PdfModificationDetection {
        let signed_pages = signed.page_count();
        let final_pages = later.page_count();
        let page_differences = (signed_pages != final_pages).then_some(PageDifference {
            signed_pages,
            final_pages,
        });
        if let Some(diff) = &page_differences {
            log::info!("Page count changed from {} to {}", diff.signed_pages, diff.final_pages);
        }

        let visual_differences = match self.rasterizer {
            Some(rasterizer) if self.config.enable_visual_diff => {
                visual_diff(rasterizer, signed, later, signed_pages.min(final_pages), self.config.visual_diff_tolerance)
            },
            _ => Vec::new(),
        };

        PdfModificationDetection {
            annotation_overlaps: annotation_overlaps(signed, later),
            page_differences,
            visual_differences,
            object_modifications: diff_objects(signed, later),
        }
    }
}

fn annotation_overlaps(signed: &dyn PdfDocumentReader, later: &dyn PdfDocumentReader) -> Vec<AnnotationOverlap> {
    let mut overlaps = Vec::new();
    for page in 0..later.page_count() {
        let before = signed.annotations(page);
        let after: Vec<PdfAnnotation> = later
            .annotations(page)
            .into_iter()
            .filter(|a| a.rect.is_some() && a.subtype.as_deref() != Some("Popup"))
            .collect();
        let added = after.iter().filter(|a| !before.contains(a));
        for new in added {
            let Some(rect) = new.rect else { continue };
            for other in after.iter().filter(|o| *o != new) {
                let intersects = other.rect.is_some_and(|r| r.intersects(&rect));
                let pair_seen = overlaps.iter().any(|o: &AnnotationOverlap| {
                    o.page == page && o.added == other.reference && o.covered == new.reference
                });
                if intersects && !pair_seen {
                    overlaps.push(AnnotationOverlap {
                        page,
                        added: new.reference,
                        covered: other.reference,
                    });
                }
            }
        }
    }
    if !overlaps.is_empty() {
        log::warn!("{} overlapping annotations added after signing", overlaps.len());
    }
    overlaps
}

fn visual_diff(
    rasterizer: &dyn PageRasterizer,
    signed: &dyn PdfDocumentReader,
    later: &dyn PdfDocumentReader,
    pages: usize,
    tolerance: u8,
) -> Vec<VisualDifference> {
    let mut differences = Vec::new();
    for page in 0..pages {
        let (Some(before), Some(after)) = (rasterizer.rasterize(signed, page), rasterizer.rasterize(later, page)) else {
            log::debug!("Page {} could not be rasterized, skipping visual comparison", page);
            continue;
        };
        let differing_pixels = if before.dimensions() != after.dimensions() {
            u64::from(after.width()) * u64::from(after.height())
        } else {
            before
                .pixels()
                .zip(after.pixels())
                .filter(|(a, b)| a.0[0].abs_diff(b.0[0]) > tolerance)
                .count() as u64
        };
        if differing_pixels > 0 {
            differences.push(VisualDifference { page, differing_pixels });
        }
    }
    differences
}

/// References an update may legitimately add or change without touching content.
struct ExtensionContext {
    dss: HashSet<ObjectRef>,
    timestamps: HashSet<ObjectRef>,
    signatures: HashSet<ObjectRef>,
    info: Option<ObjectRef>,
    acroform: Option<ObjectRef>,
}

impl ExtensionContext {
    fn collect(readers: [&dyn PdfDocumentReader; 2]) -> Self {
        let mut context = Self {
            dss: HashSet::new(),
            timestamps: HashSet::new(),
            signatures: HashSet::new(),
            info: None,
            acroform: None,
        };
        for reader in readers {
            if let Some(dss) = reader.dss_dictionary() {
                context.dss.extend(dss.reference);
                context.dss.extend(dss.object_refs.iter().copied());
            }
            for entry in reader.signature_fields() {
                let target = match entry.dictionary.kind() {
                    SignatureDictionaryKind::DocTimeStamp => &mut context.timestamps,
                    _ => &mut context.signatures,
                };
                target.extend(entry.dictionary.reference);
                target.extend(entry.fields.iter().filter_map(|f| f.reference));
            }
            context.info = context.info.or(reader.trailer().get("Info").and_then(Object::as_reference));
            context.acroform = context.acroform.or(reader
                .catalog()
                .and_then(|c| c.get("AcroForm"))
                .and_then(Object::as_reference));
        }
        context
    }
}

/// Diff every object between two states of a document.
pub fn diff_objects(before: &dyn PdfDocumentReader, after: &dyn PdfDocumentReader) -> Vec<ObjectModification> {
    let context = ExtensionContext::collect([before, after]);
    let catalog = after.catalog_ref().or(before.catalog_ref());
    let mut modifications = Vec::new();

    let after_refs = after.object_refs();
    let after_set: HashSet<ObjectRef> = after_refs.iter().copied().collect();
    for reference in after_refs {
        let Some(current) = after.object(reference) else { continue };
        let (change, changed_keys) = match before.object(reference) {
            None => (ObjectChange::Created, Vec::new()),
            Some(previous) if previous == current => continue,
            Some(previous) => (ObjectChange::Modified, changed_keys(previous, current)),
        };
        modifications.push(describe(after, before, reference, current, change, changed_keys, &context, catalog));
    }
    for reference in before.object_refs().into_iter().filter(|r| !after_set.contains(r)) {
        if let Some(previous) = before.object(reference) {
            modifications.push(describe(before, before, reference, previous, ObjectChange::Deleted, Vec::new(), &context, catalog));
        }
    }

    if modifications.iter().any(|m| m.kind == ObjectModificationKind::Undefined) {
        log::warn!(
            "{} objects changed outside extension, form or annotation updates",
            modifications.iter().filter(|m| m.kind == ObjectModificationKind::Undefined).count()
        );
    }
    modifications
}

#[allow(clippy::too_many_arguments)]
fn describe(
    reader: &dyn PdfDocumentReader,
    before: &dyn PdfDocumentReader,
    reference: ObjectRef,
    object: &Object,
    change: ObjectChange,
    changed_keys: Vec<String>,
    context: &ExtensionContext,
    catalog: Option<ObjectRef>,
) -> ObjectModification {
    let dict = object.as_dict();
    let field_name = dict.filter(|d| is_field(reader, d)).map(|d| qualified_name(reader, d));
    let kind = classify(reader, before, reference, object, change, &changed_keys, context, catalog);
    ObjectModification {
        reference,
        change,
        kind,
        object_type: object.dict_type().map(str::to_string),
        field_name,
        changed_keys,
    }
}

#[allow(clippy::too_many_arguments)]
fn classify(
    reader: &dyn PdfDocumentReader,
    before: &dyn PdfDocumentReader,
    reference: ObjectRef,
    object: &Object,
    change: ObjectChange,
    changed_keys: &[String],
    context: &ExtensionContext,
    catalog: Option<ObjectRef>,
) -> ObjectModificationKind {
    use ObjectModificationKind::*;

    let object_type = object.dict_type();
    if matches!(object_type, Some("XRef") | Some("ObjStm") | Some("Metadata") | Some("DSS") | Some("DocTimeStamp")) {
        return Extension;
    }
    if context.dss.contains(&reference) || context.timestamps.contains(&reference) || context.info == Some(reference) {
        return Extension;
    }
    if Some(reference) == catalog {
        return if subset_of(changed_keys, CATALOG_EXTENSION_KEYS) {
            Extension
        } else if subset_of(changed_keys, CATALOG_FORM_KEYS) {
            FormFillAndSignature
        } else {
            Undefined
        };
    }
    let Some(dict) = object.as_dict() else {
        return Undefined;
    };
    if context.signatures.contains(&reference) || object_type == Some("Sig") || context.acroform == Some(reference) {
        return FormFillAndSignature;
    }
    let subtype = dict.get("Subtype").and_then(Object::as_name);
    if subtype == Some("Widget") || is_field(reader, dict) {
        return FormFillAndSignature;
    }
    if change == ObjectChange::Created && (subtype == Some("Form") || matches!(object_type, Some("Font") | Some("FontDescriptor"))) {
        return FormFillAndSignature;
    }
    if object_type == Some("Annot") || (dict.contains_key("Rect") && subtype.is_some() && !matches!(object, Object::Stream { .. })) {
        return AnnotationCreation;
    }
    if object_type == Some("Page") && change == ObjectChange::Modified && changed_keys == ["Annots"] {
        return classify_page_annots(reader, before, reference);
    }
    Undefined
}

fn classify_page_annots(after: &dyn PdfDocumentReader, before: &dyn PdfDocumentReader, page: ObjectRef) -> ObjectModificationKind {
    let annots = |reader: &dyn PdfDocumentReader| -> Vec<Object> {
        reader
            .object(page)
            .and_then(Object::as_dict)
            .and_then(|d| reader.get(d, "Annots"))
            .and_then(Object::as_array)
            .cloned()
            .unwrap_or_default()
    };
    let previous = annots(before);
    let added: Vec<Object> = annots(after).into_iter().filter(|a| !previous.contains(a)).collect();
    let all_widgets = added.iter().all(|a| {
        after
            .resolve(a)
            .as_dict()
            .and_then(|d| d.get("Subtype"))
            .and_then(Object::as_name)
            == Some("Widget")
    });
    if all_widgets {
        ObjectModificationKind::FormFillAndSignature
    } else {
        ObjectModificationKind::AnnotationCreation
    }
}

fn is_field(reader: &dyn PdfDocumentReader, dict: &PdfDict) -> bool {
    dict.contains_key("FT")
        || (dict.contains_key("T")
            && dict
                .get("Parent")
                .map(|p| reader.resolve(p))
                .and_then(Object::as_dict)
                .is_some_and(|parent| parent.contains_key("FT") || parent.contains_key("Kids")))
}

fn qualified_name(reader: &dyn PdfDocumentReader, dict: &PdfDict) -> String {
    let mut parts = Vec::new();
    let mut current = Some(dict);
    for _ in 0..MAX_PARENT_DEPTH {
        let Some(node) = current else { break };
        if let Some(name) = reader.get(node, "T").and_then(Object::as_text) {
            parts.push(name);
        }
        current = reader.get(node, "Parent").and_then(Object::as_dict);
    }
    parts.reverse();
    parts.join(".")
}

fn changed_keys(previous: &Object, current: &Object) -> Vec<String> {
    let (Some(old), Some(new)) = (previous.as_dict(), current.as_dict()) else {
        return Vec::new();
    };
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut changed: Vec<String> = keys
        .into_iter()
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect();
    if let (Object::Stream { data: a, .. }, Object::Stream { data: b, .. }) = (previous, current) {
        if a != b {
            changed.push("[stream]".to_string());
        }
    }
    changed
}

fn subset_of(keys: &[String], allowed: &[&str]) -> bool {
    keys.iter().all(|k| allowed.contains(&k.as_str()))
}
