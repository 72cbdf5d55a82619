//! Revision history of signed PDF documents.
//!
//! [`PdfSignatureService::get_revisions`] walks the signature dictionaries
//! of a document from the latest to the earliest. Each signature or
//! document timestamp opens the revision it covers, which tells which DSS
//! dictionary existed at that point; a DSS that differs from the one seen
//! in the next later revision is an update of its own and gets its own
//! [`PdfRevision::DssUpdate`].
//!
//! # Example
//!
//! ```no_run
//! use ltv_oxide::config::ValidationConfig;
//! use ltv_oxide::pdf::{LexicalReaderFactory, PdfSignatureService};
//!
//! # fn main() -> ltv_oxide::Result<()> {
//! let data = std::fs::read("signed.pdf")?;
//! let service = PdfSignatureService::new(LexicalReaderFactory, ValidationConfig::default());
//! for revision in service.get_revisions(data.into())? {
//!     println!("{:?}", revision.kind_name());
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::ValidationConfig;
use crate::error::{Error, Result};
use crate::pdf::byte_range::ByteRange;
use crate::pdf::dss::{CompositeDssDictionary, PdfDssDict};
use crate::pdf::modifications::{diff_objects, ObjectModification, PdfModificationDetection, PdfModificationsFinder};
use crate::pdf::permissions::{PdfPermissionsChecker, PermissionViolation};
use crate::pdf::reader::{PageRasterizer, PdfDocumentReader, PdfReaderFactory};
use crate::pdf::sig_dict::{PdfSignatureDictionary, PdfSignatureField, SignatureDictionaryKind, SignatureEntry};
use bytes::Bytes;

/// A signature or document timestamp revision.
#[derive(Debug, Clone)]
pub struct PdfCmsRevision {
    /// Signature dictionary as seen in the complete document
    pub signature: PdfSignatureDictionary,
    /// Fields using the dictionary
    pub fields: Vec<PdfSignatureField>,
    /// Declared byte range
    pub byte_range: ByteRange,
    /// Range lies within the document and its gap holds `/Contents`
    pub byte_range_valid: bool,
    /// Bytes covered by the range, empty when the range is invalid
    pub signed_content: Bytes,
    /// End of the signed revision, clamped to the document length
    pub revision_end: usize,
    /// The range reaches the end of the document
    pub covers_whole_document: bool,
    /// The range starts at zero and only skips the signature value
    pub cover_all_original_bytes: bool,
    /// End of the previous signed revision
    pub previous_revision_end: Option<usize>,
    /// DSS of the signed revision
    pub dss: Option<PdfDssDict>,
    /// Dictionary is unchanged between the signed revision and the complete document
    pub dictionary_consistent: bool,
    /// Changes from the signed revision to the complete document
    pub modification_detection: Option<PdfModificationDetection>,
    /// Objects changed by this revision's update
    pub changes_since_previous: Vec<ObjectModification>,
}

/// An incremental update adding or changing the DSS.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfDssRevision {
    /// DSS after the update
    pub dss: PdfDssDict,
}

/// One revision of a document.
#[derive(Debug, Clone)]
pub enum PdfRevision {
    /// Signature
    Signature(PdfCmsRevision),
    /// Document timestamp
    DocTimestamp(PdfCmsRevision),
    /// DSS update
    DssUpdate(PdfDssRevision),
}

impl PdfRevision {
    /// Signature or timestamp data.
    pub fn as_cms(&self) -> Option<&PdfCmsRevision> {
        match self {
            PdfRevision::Signature(cms) | PdfRevision::DocTimestamp(cms) => Some(cms),
            PdfRevision::DssUpdate(_) => None,
        }
    }

    /// True for a signature revision.
    pub fn is_signature(&self) -> bool {
        matches!(self, PdfRevision::Signature(_))
    }

    /// True for a document timestamp revision.
    pub fn is_doc_timestamp(&self) -> bool {
        matches!(self, PdfRevision::DocTimestamp(_))
    }

    /// True for a DSS update.
    pub fn is_dss_update(&self) -> bool {
        matches!(self, PdfRevision::DssUpdate(_))
    }

    /// Short name of the variant.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PdfRevision::Signature(_) => "Signature",
            PdfRevision::DocTimestamp(_) => "DocTimestamp",
            PdfRevision::DssUpdate(_) => "DssUpdate",
        }
    }
}

struct SignedEntry {
    entry: SignatureEntry,
    byte_range: ByteRange,
    kind: SignatureDictionaryKind,
}

/// Reconstructs the revisions of signed documents.
pub struct PdfSignatureService<F: PdfReaderFactory> {
    factory: F,
    config: ValidationConfig,
    rasterizer: Option<Box<dyn PageRasterizer>>,
}

impl<F: PdfReaderFactory> PdfSignatureService<F> {
    /// Create a service reading documents through `factory`.
    pub fn new(factory: F, config: ValidationConfig) -> Self {
        Self {
            factory,
            config,
            rasterizer: None,
        }
    }

    /// Rasterizer used for visual comparison.
    pub fn with_rasterizer(mut self, rasterizer: Box<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    /// All revisions, latest first.
    ///
    /// Fails only when the document cannot be opened or two byte ranges
    /// contradict each other. A revision that cannot be built is logged
    /// and left out.
    pub fn get_revisions(&self, data: Bytes) -> Result<Vec<PdfRevision>> {
        let reader = self.factory.open(data)?;
        let entries = self.sorted_entries(reader.as_ref())?;

        let mut revisions = Vec::with_capacity(entries.len() + 1);
        let mut newer_dss = reader.dss_dictionary();
        for (position, signed) in entries.iter().enumerate() {
            let previous_end = entries
                .get(position + 1)
                .map(|older| clamp_end(&older.byte_range, reader.len()));
            let cms = self.build_revision(reader.as_ref(), signed, previous_end);
            if newer_dss.is_some() && cms.dss != newer_dss {
                if let Some(dss) = newer_dss.take() {
                    log::debug!("DSS update after revision ending at {}", cms.revision_end);
                    revisions.push(PdfRevision::DssUpdate(PdfDssRevision { dss }));
                }
            }
            newer_dss = cms.dss.clone();
            revisions.push(match signed.kind {
                SignatureDictionaryKind::DocTimeStamp => PdfRevision::DocTimestamp(cms),
                _ => PdfRevision::Signature(cms),
            });
        }
        if let Some(dss) = newer_dss {
            revisions.push(PdfRevision::DssUpdate(PdfDssRevision { dss }));
        }

        log::info!(
            "{} revisions ({} signed) in {} bytes",
            revisions.len(),
            entries.len(),
            reader.len()
        );
        Ok(revisions)
    }

    /// Signature revisions, latest first.
    pub fn get_signatures(&self, data: Bytes) -> Result<Vec<PdfCmsRevision>> {
        Ok(self
            .get_revisions(data)?
            .into_iter()
            .filter_map(|r| match r {
                PdfRevision::Signature(cms) => Some(cms),
                _ => None,
            })
            .collect())
    }

    /// Document timestamp revisions, latest first.
    pub fn get_doc_timestamps(&self, data: Bytes) -> Result<Vec<PdfCmsRevision>> {
        Ok(self
            .get_revisions(data)?
            .into_iter()
            .filter_map(|r| match r {
                PdfRevision::DocTimestamp(cms) => Some(cms),
                _ => None,
            })
            .collect())
    }

    /// Check DocMDP and field lock permissions over revisions from [`Self::get_revisions`].
    pub fn check_permissions(&self, revisions: &[PdfRevision]) -> Vec<PermissionViolation> {
        PdfPermissionsChecker::new().check(revisions)
    }

    fn sorted_entries(&self, reader: &dyn PdfDocumentReader) -> Result<Vec<SignedEntry>> {
        let mut entries = Vec::new();
        for entry in reader.signature_fields() {
            let kind = entry.dictionary.kind();
            match (kind, entry.dictionary.byte_range) {
                (SignatureDictionaryKind::Unsupported, _) | (_, None) => {
                    let names: Vec<&str> = entry.fields.iter().map(|f| f.name.as_str()).collect();
                    log::warn!("Skipping unsupported signature dictionary of fields {:?}", names);
                },
                (kind, Some(byte_range)) => entries.push(SignedEntry { entry, byte_range, kind }),
            }
        }
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                if a.byte_range.latest_first(&b.byte_range, std::cmp::Ordering::Equal).is_none() {
                    return Err(Error::InconsistentByteRanges {
                        first: a.byte_range.to_string(),
                        second: b.byte_range.to_string(),
                    });
                }
            }
        }
        entries.sort_by(|a, b| {
            let by_date = b.entry.dictionary.signing_date.cmp(&a.entry.dictionary.signing_date);
            a.byte_range.latest_first(&b.byte_range, by_date).unwrap_or(by_date)
        });
        if entries.len() > self.config.max_revisions {
            log::warn!(
                "{} signature dictionaries, only the latest {} are processed",
                entries.len(),
                self.config.max_revisions
            );
            entries.truncate(self.config.max_revisions);
        }
        Ok(entries)
    }

    fn build_revision(&self, reader: &dyn PdfDocumentReader, signed: &SignedEntry, previous_end: Option<usize>) -> PdfCmsRevision {
        let data = reader.data();
        let len = reader.len();
        let byte_range = signed.byte_range;
        let dictionary = &signed.entry.dictionary;

        let signature_value = byte_range.signature_value(data);
        let mut byte_range_valid = match byte_range.validate(len) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Invalid byte range: {}", e);
                false
            },
        };
        if byte_range_valid && signature_value != dictionary.contents {
            log::warn!(
                "Signature value outside byte range {} differs from /Contents, possible signature wrapping",
                byte_range
            );
            byte_range_valid = false;
        }
        let signed_content = if byte_range_valid {
            byte_range.signed_content(data).map(Bytes::from).unwrap_or_default()
        } else {
            Bytes::new()
        };
        let revision_end = clamp_end(&byte_range, len);

        let view = match reader.open_revision(revision_end) {
            Ok(view) => Some(view),
            Err(e) => {
                log::warn!("Cannot open revision ending at {}: {}", revision_end, e);
                None
            },
        };

        let dss = view.as_ref().and_then(|v| v.dss_dictionary());
        let dictionary_consistent = match &view {
            Some(view) if self.config.check_dictionary_consistency => self.is_consistent(view.as_ref(), &signed.entry),
            _ => true,
        };
        let modification_detection = view.as_ref().map(|v| {
            PdfModificationsFinder::new(&self.config)
                .with_rasterizer(self.rasterizer.as_deref())
                .detect(v.as_ref(), reader)
        });
        let changes_since_previous = match (&view, previous_end) {
            (Some(view), Some(end)) => match reader.open_revision(end) {
                Ok(previous) => diff_objects(previous.as_ref(), view.as_ref()),
                Err(e) => {
                    log::warn!("Cannot open previous revision ending at {}: {}", end, e);
                    Vec::new()
                },
            },
            _ => Vec::new(),
        };

        PdfCmsRevision {
            signature: dictionary.clone(),
            fields: signed.entry.fields.clone(),
            byte_range,
            byte_range_valid,
            signed_content,
            revision_end,
            covers_whole_document: byte_range.end() == len as i64,
            cover_all_original_bytes: byte_range_valid && byte_range.start() == 0 && signature_value.is_some(),
            previous_revision_end: previous_end,
            dss,
            dictionary_consistent,
            modification_detection,
            changes_since_previous,
        }
    }

    fn is_consistent(&self, view: &dyn PdfDocumentReader, entry: &SignatureEntry) -> bool {
        let Some(field) = entry.fields.first() else {
            return true;
        };
        let local = view.signature_fields().into_iter().find(|e| e.has_field(&field.name));
        match local {
            Some(local) if local.dictionary == entry.dictionary => true,
            Some(_) => {
                log::warn!("Signature dictionary of field {} was rewritten after signing", field.name);
                false
            },
            None => {
                log::warn!("Signature field {} is missing from its own revision", field.name);
                false
            },
        }
    }
}

/// Composite of the DSS updates among `revisions`, given latest first.
pub fn composite_dss(revisions: &[PdfRevision]) -> CompositeDssDictionary {
    CompositeDssDictionary::from_revisions(revisions.iter().rev().filter_map(|r| match r {
        PdfRevision::DssUpdate(update) => Some(&update.dss),
        _ => None,
    }))
}

fn clamp_end(byte_range: &ByteRange, len: usize) -> usize {
    byte_range.end().clamp(0, len as i64) as usize
}
