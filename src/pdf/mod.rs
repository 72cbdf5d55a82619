//! PDF revision analysis.
//!
//! Signed PDFs grow by incremental updates. This module reconstructs their
//! history: which signature and document timestamp covers which bytes,
//! where DSS dictionaries were added, and what changed after each signing.
//! Documents are read through the [`PdfReaderFactory`] seam; the built-in
//! [`LexicalReaderFactory`] scans object definitions directly.

pub mod byte_range;
pub mod dss;
pub mod lexical;
pub mod modifications;
pub mod permissions;
pub mod reader;
pub mod revision;
pub mod sig_dict;

pub use byte_range::{ByteRange, SignaturePlaceholder};
pub use dss::{CompositeDssDictionary, DssToken, DssTokenType, PdfDssDict, VriEntry};
pub use lexical::{LexicalReader, LexicalReaderFactory};
pub use modifications::{
    diff_objects, AnnotationOverlap, ObjectChange, ObjectModification, ObjectModificationKind, PageDifference,
    PdfModificationDetection, PdfModificationsFinder, VisualDifference,
};
pub use permissions::{CertificationPermission, FieldLock, LockAction, PdfPermissionsChecker, PermissionViolation};
pub use reader::{PageRasterizer, PdfAnnotation, PdfDocumentReader, PdfPage, PdfReaderFactory, Rect};
pub use revision::{composite_dss, PdfCmsRevision, PdfDssRevision, PdfRevision, PdfSignatureService};
pub use sig_dict::{
    parse_pdf_date, PdfSignatureDictionary, PdfSignatureField, SignatureDictionaryKind, SignatureEntry,
    SignatureReference, TransformMethod,
};
