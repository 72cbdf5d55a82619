//! Certification and field lock permissions.
//!
//! A certification signature (DocMDP) limits what later revisions may do
//! with a `/P` level. FieldMDP transforms and `/Lock` dictionaries of
//! signature fields freeze named fields once the field is signed, and may
//! carry their own `/P`. Violations are reported, never raised.

use crate::object::{Object, ObjectRef, PdfDict};
use crate::pdf::modifications::{ObjectModification, ObjectModificationKind};
use crate::pdf::reader::PdfDocumentReader;
use crate::pdf::revision::{PdfCmsRevision, PdfRevision};
use serde::Serialize;

/// DocMDP `/P` levels, most restrictive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificationPermission {
    /// No changes at all
    NoChanges = 1,
    /// Form filling and signing
    FormFillAndSign = 2,
    /// Form filling, signing and annotations
    FormFillSignAndAnnotate = 3,
}

impl CertificationPermission {
    /// Map a `/P` value. Values out of range fall back to level 2.
    pub fn from_value(value: i64) -> Self {
        match value {
            1 => Self::NoChanges,
            3 => Self::FormFillSignAndAnnotate,
            2 => Self::FormFillAndSign,
            other => {
                log::warn!("Unknown DocMDP permission {}, assuming 2", other);
                Self::FormFillAndSign
            },
        }
    }

    fn allows(&self, kind: ObjectModificationKind) -> bool {
        match kind {
            ObjectModificationKind::Extension => true,
            ObjectModificationKind::FormFillAndSignature => *self >= Self::FormFillAndSign,
            ObjectModificationKind::AnnotationCreation => *self >= Self::FormFillSignAndAnnotate,
            ObjectModificationKind::Undefined => false,
        }
    }
}

/// `/Action` of a field lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockAction {
    /// Every field
    All,
    /// Only the listed fields
    Include,
    /// Every field except the listed ones
    Exclude,
}

/// Field lock from a `/Lock` dictionary or FieldMDP parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLock {
    /// Lock scope
    pub action: LockAction,
    /// Listed field names
    pub fields: Vec<String>,
    /// `/P` of the lock (PDF 2.0)
    pub permission: Option<CertificationPermission>,
}

impl FieldLock {
    /// Read a lock dictionary. A missing `/Action` locks every field.
    pub fn from_dict<R: PdfDocumentReader + ?Sized>(reader: &R, dict: &PdfDict) -> Self {
        let action = match reader.get(dict, "Action").and_then(Object::as_name) {
            Some("Include") => LockAction::Include,
            Some("Exclude") => LockAction::Exclude,
            _ => LockAction::All,
        };
        let fields = reader
            .get(dict, "Fields")
            .and_then(Object::as_array)
            .map(|names| names.iter().filter_map(|n| reader.resolve(n).as_text()).collect())
            .unwrap_or_default();
        Self {
            action,
            fields,
            permission: reader
                .get(dict, "P")
                .and_then(Object::as_integer)
                .map(CertificationPermission::from_value),
        }
    }

    /// True when the fully qualified `name` is frozen by this lock.
    pub fn locks(&self, name: &str) -> bool {
        let partial = name.rsplit('.').next().unwrap_or(name);
        let listed = self.fields.iter().any(|f| f == name || f == partial);
        match self.action {
            LockAction::All => true,
            LockAction::Include => listed,
            LockAction::Exclude => !listed,
        }
    }
}

/// A change a previous signature did not allow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionViolation {
    /// Index of the offending revision in the latest-first list, `None`
    /// for changes after the last signed revision
    pub revision_index: Option<usize>,
    /// Field name of the signature imposing the restriction
    pub signature_name: String,
    /// What went wrong
    pub reason: String,
    /// Changed object, when the violation is about one
    pub reference: Option<ObjectRef>,
}

struct Restriction {
    signature_name: String,
    permission: Option<CertificationPermission>,
    locks: Vec<FieldLock>,
}

/// Evaluates DocMDP, FieldMDP and `/Lock` restrictions across revisions.
#[derive(Debug, Default)]
pub struct PdfPermissionsChecker;

impl PdfPermissionsChecker {
    /// Create a checker.
    pub fn new() -> Self {
        Self
    }

    /// Check revisions given latest first, as returned by `get_revisions`.
    pub fn check(&self, revisions: &[PdfRevision]) -> Vec<PermissionViolation> {
        let mut violations = Vec::new();
        let mut restrictions: Vec<Restriction> = Vec::new();

        for (index, revision) in revisions.iter().enumerate().rev() {
            let (cms, is_signature) = match revision {
                PdfRevision::Signature(cms) => (cms, true),
                PdfRevision::DocTimestamp(cms) => (cms, false),
                PdfRevision::DssUpdate(_) => continue,
            };
            for restriction in &restrictions {
                let no_changes = restriction.permission == Some(CertificationPermission::NoChanges);
                if no_changes && is_signature {
                    violations.push(PermissionViolation {
                        revision_index: Some(index),
                        signature_name: restriction.signature_name.clone(),
                        reason: format!(
                            "signature {} added to a document certified without changes",
                            signature_name(cms)
                        ),
                        reference: cms.signature.reference,
                    });
                }
                evaluate(restriction, &cms.changes_since_previous, Some(index), no_changes && is_signature, &mut violations);
            }
            if is_signature {
                restrictions.push(restriction_of(cms));
            }
        }

        let latest = revisions.iter().find_map(PdfRevision::as_cms);
        if let Some(detection) = latest.and_then(|cms| cms.modification_detection.as_ref()) {
            for restriction in &restrictions {
                evaluate(restriction, &detection.object_modifications, None, false, &mut violations);
            }
        }
        for violation in &violations {
            log::warn!("Permission violation: {}", violation.reason);
        }
        violations
    }
}

fn signature_name(cms: &PdfCmsRevision) -> String {
    cms.fields.first().map(|f| f.name.clone()).unwrap_or_default()
}

fn restriction_of(cms: &PdfCmsRevision) -> Restriction {
    let mut locks: Vec<FieldLock> = cms.signature.field_locks().cloned().collect();
    locks.extend(cms.fields.iter().filter_map(|f| f.lock.clone()));
    let lock_permission = locks.iter().filter_map(|l| l.permission).min();
    let permission = match (cms.signature.certification_permission(), lock_permission) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    Restriction {
        signature_name: signature_name(cms),
        permission,
        locks,
    }
}

fn evaluate(
    restriction: &Restriction,
    changes: &[ObjectModification],
    revision_index: Option<usize>,
    skip_forms: bool,
    violations: &mut Vec<PermissionViolation>,
) {
    for change in changes {
        let level = restriction.permission.unwrap_or(CertificationPermission::FormFillSignAndAnnotate);
        let forbidden_kind = match change.kind {
            ObjectModificationKind::FormFillAndSignature if skip_forms => false,
            kind => !level.allows(kind),
        };
        if forbidden_kind {
            violations.push(PermissionViolation {
                revision_index,
                signature_name: restriction.signature_name.clone(),
                reason: format!("{:?} change of object {} not permitted", change.kind, change.reference),
                reference: Some(change.reference),
            });
            continue;
        }
        let Some(name) = change.field_name.as_deref() else { continue };
        if change.kind == ObjectModificationKind::Extension || name == restriction.signature_name {
            continue;
        }
        if restriction.locks.iter().any(|lock| lock.locks(name)) {
            violations.push(PermissionViolation {
                revision_index,
                signature_name: restriction.signature_name.clone(),
                reason: format!("locked field {} changed", name),
                reference: Some(change.reference),
            });
        }
    }
}
