//! Revision reconstruction over incrementally updated PDFs.

mod common;

use common::{with_byte_range, with_contents, PdfBuilder, SignatureOptions};
use ltv_oxide::pdf::{
    composite_dss, LexicalReaderFactory, ObjectModificationKind, PdfRevision, PdfSignatureService,
};
use ltv_oxide::{Error, ValidationConfig};
use std::time::{Duration, Instant};

fn service() -> PdfSignatureService<LexicalReaderFactory> {
    PdfSignatureService::new(LexicalReaderFactory, ValidationConfig::default())
}

fn field_names(revisions: &[PdfRevision]) -> Vec<String> {
    revisions
        .iter()
        .map(|r| match r.as_cms() {
            Some(cms) => cms.fields[0].name.clone(),
            None => "DSS".to_string(),
        })
        .collect()
}

#[test]
fn test_single_signature() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Signature1"));

    let signatures = service().get_signatures(pdf.bytes()).unwrap();
    assert_eq!(signatures.len(), 1);
    let sig = &signatures[0];
    assert!(sig.byte_range_valid);
    assert!(sig.covers_whole_document);
    assert!(sig.cover_all_original_bytes);
    assert!(sig.dictionary_consistent);
    assert_eq!(sig.revision_end, pdf.len());
    assert_eq!(sig.previous_revision_end, None);
    assert!(sig.dss.is_none());
    assert_eq!(sig.signature.sub_filter.as_deref(), Some("ETSI.CAdES.detached"));
    assert!(sig.signature.signing_date.is_some());

    let expected = sig.byte_range.signed_content(&pdf.data).unwrap();
    assert_eq!(sig.signed_content.as_ref(), expected.as_slice());
    let detection = sig.modification_detection.as_ref().unwrap();
    assert!(!detection.has_modifications());
}

#[test]
fn test_revisions_are_latest_first() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Alice"))
        .sign(SignatureOptions::signature("Bob"))
        .sign(SignatureOptions::signature("Carol"));

    let revisions = service().get_revisions(pdf.bytes()).unwrap();
    assert_eq!(field_names(&revisions), ["Carol", "Bob", "Alice"]);

    let carol = revisions[0].as_cms().unwrap();
    let bob = revisions[1].as_cms().unwrap();
    let alice = revisions[2].as_cms().unwrap();
    assert!(carol.covers_whole_document);
    assert!(!bob.covers_whole_document);
    assert!(bob.byte_range_valid);
    assert_eq!(carol.previous_revision_end, Some(bob.revision_end));
    assert_eq!(bob.previous_revision_end, Some(alice.revision_end));

    // Bob's revision adds his signature and field and rewrites the AcroForm.
    assert!(!bob.changes_since_previous.is_empty());
    assert!(bob
        .changes_since_previous
        .iter()
        .all(|m| m.kind == ObjectModificationKind::FormFillAndSignature));
    assert!(alice.changes_since_previous.is_empty());
}

#[test]
fn test_revision_limit_keeps_latest() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Alice"))
        .sign(SignatureOptions::signature("Bob"))
        .sign(SignatureOptions::signature("Carol"));

    let limited = PdfSignatureService::new(LexicalReaderFactory, ValidationConfig::default().with_max_revisions(2));
    let revisions = limited.get_revisions(pdf.bytes()).unwrap();
    assert_eq!(field_names(&revisions), ["Carol", "Bob"]);
    assert_eq!(revisions[1].as_cms().unwrap().previous_revision_end, None);
}

#[test]
fn test_many_signatures_with_dss() {
    let mut pdf = PdfBuilder::new();
    for i in 0..51 {
        pdf.sign(SignatureOptions::signature(&format!("Signature{}", i)));
    }
    pdf.add_dss(&[&b"certificate one"[..], &b"certificate two"[..]]);

    let started = Instant::now();
    let revisions = service().get_revisions(pdf.bytes()).unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(revisions.len(), 52);
    assert!(revisions[0].is_dss_update());
    assert_eq!(revisions.iter().filter(|r| r.is_signature()).count(), 51);
    assert_eq!(revisions[1].as_cms().unwrap().fields[0].name, "Signature50");
    assert_eq!(revisions[51].as_cms().unwrap().fields[0].name, "Signature0");
    assert!(revisions.iter().filter_map(PdfRevision::as_cms).all(|c| c.byte_range_valid));

    let signatures = service().get_signatures(pdf.bytes()).unwrap();
    assert_eq!(signatures.len(), 51);
}

#[test]
fn test_dss_update_between_signatures() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("First"))
        .add_dss(&[&b"signer certificate"[..]])
        .sign(SignatureOptions::timestamp("Archive"))
        .add_dss(&[&b"signer certificate"[..], &b"tsa certificate"[..]]);

    let revisions = service().get_revisions(pdf.bytes()).unwrap();
    assert_eq!(revisions.len(), 4);
    assert!(revisions[0].is_dss_update());
    assert!(revisions[1].is_doc_timestamp());
    assert!(revisions[2].is_dss_update());
    assert!(revisions[3].is_signature());

    let timestamp = revisions[1].as_cms().unwrap();
    assert!(timestamp.dss.is_some());
    assert!(!timestamp.covers_whole_document);
    // DSS and document timestamp objects are extensions, not content changes.
    let detection = timestamp.modification_detection.as_ref().unwrap();
    assert!(detection
        .object_modifications
        .iter()
        .all(|m| m.kind == ObjectModificationKind::Extension));

    let composite = composite_dss(&revisions);
    assert_eq!(composite.certificates.len(), 2);
    let first: Vec<usize> = composite.certificates.values().map(|t| t.first_revision).collect();
    assert_eq!(first, [0, 1]);
    let signer = composite.certificates.values().next().unwrap();
    assert_eq!(signer.revisions, [0, 1]);

    let timestamps = service().get_doc_timestamps(pdf.bytes()).unwrap();
    assert_eq!(timestamps.len(), 1);
    assert_eq!(timestamps[0].signature.sub_filter.as_deref(), Some("ETSI.RFC3161"));
}

#[test]
fn test_signature_wrapping_is_detected() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Victim"));
    pdf.rewrite_signature("Victim", |text| with_contents(text, &"AB".repeat(32)));

    let signatures = service().get_signatures(pdf.bytes()).unwrap();
    assert_eq!(signatures.len(), 1);
    assert!(!signatures[0].byte_range_valid);
    assert!(signatures[0].signed_content.is_empty());
    assert!(!signatures[0].cover_all_original_bytes);
}

#[test]
fn test_byte_range_beyond_document() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Overreach"));
    let end = pdf.len() as i64;
    pdf.rewrite_signature("Overreach", |text| with_byte_range(text, [0, 10, 20, end * 4]));

    let signatures = service().get_signatures(pdf.bytes()).unwrap();
    assert_eq!(signatures.len(), 1);
    assert!(!signatures[0].byte_range_valid);
    assert!(signatures[0].signed_content.is_empty());
    assert!(!signatures[0].covers_whole_document);
    assert_eq!(signatures[0].revision_end, pdf.len());
}

#[test]
fn test_crossing_byte_ranges_are_rejected() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("A")).sign(SignatureOptions::signature("B"));
    let end = pdf.len() as i64;
    // Neither range contains the other.
    pdf.rewrite_signature("B", |text| with_byte_range(text, [0, 10, 20, end - 40]));

    match service().get_revisions(pdf.bytes()) {
        Err(Error::InconsistentByteRanges { .. }) => {},
        other => panic!("expected inconsistent byte ranges, got {:?}", other.map(|r| r.len())),
    }
}

#[test]
fn test_rewritten_dictionary_is_inconsistent() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Signer"));
    pdf.rewrite_signature("Signer", |text| text.replacen("/M ", "/Reason (Approved later) /M ", 1));

    let signatures = service().get_signatures(pdf.bytes()).unwrap();
    let sig = &signatures[0];
    assert!(sig.byte_range_valid);
    assert!(!sig.dictionary_consistent);
    assert_eq!(sig.signature.reason.as_deref(), Some("Approved later"));
    let detection = sig.modification_detection.as_ref().unwrap();
    assert!(detection
        .object_modifications
        .iter()
        .any(|m| m.reference.id == pdf.signature_id("Signer")));
}

#[test]
fn test_not_a_pdf() {
    let result = service().get_revisions(bytes::Bytes::from_static(b"hello world"));
    assert!(result.is_err());
}

#[test]
fn test_annotation_after_signing() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Signer"))
        .annotate([100, 100, 200, 200])
        .annotate([150, 150, 250, 250]);

    let sig = &service().get_signatures(pdf.bytes()).unwrap()[0];
    let detection = sig.modification_detection.as_ref().unwrap();
    assert!(detection.has_modifications());
    assert!(!detection.has_undefined_changes());
    assert_eq!(
        detection
            .modifications_of(ObjectModificationKind::AnnotationCreation)
            .count(),
        3
    );
    assert_eq!(detection.annotation_overlaps.len(), 1);
    assert!(detection.page_differences.is_none());
}

#[test]
fn test_content_change_after_signing() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Signer"));
    pdf.rewrite(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Rotate 90 >>");

    let sig = &service().get_signatures(pdf.bytes()).unwrap()[0];
    let detection = sig.modification_detection.as_ref().unwrap();
    assert!(detection.has_undefined_changes());
    let page = detection
        .modifications_of(ObjectModificationKind::Undefined)
        .next()
        .unwrap();
    assert_eq!(page.changed_keys, ["Rotate"]);
}

#[test]
fn test_permissions_no_changes() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Author").certify(1))
        .sign(SignatureOptions::signature("Approver"));

    let service = service();
    let revisions = service.get_revisions(pdf.bytes()).unwrap();
    let violations = service.check_permissions(&revisions);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].signature_name, "Author");
    assert_eq!(violations[0].revision_index, Some(0));
    assert!(violations[0].reason.contains("Approver"));
}

#[test]
fn test_permissions_form_fill_forbids_annotations() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Author").certify(2))
        .sign(SignatureOptions::signature("Approver"))
        .annotate([10, 10, 40, 40]);

    let service = service();
    let revisions = service.get_revisions(pdf.bytes()).unwrap();
    let violations = service.check_permissions(&revisions);
    assert!(!violations.is_empty());
    assert!(violations.iter().all(|v| v.revision_index.is_none()));
    assert!(violations.iter().any(|v| v.signature_name == "Author"));
    assert!(violations.iter().all(|v| v.reason.contains("AnnotationCreation")));
}

#[test]
fn test_permissions_annotations_allowed() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Author").certify(3))
        .annotate([10, 10, 40, 40])
        .sign(SignatureOptions::signature("Approver"));

    let service = service();
    let revisions = service.get_revisions(pdf.bytes()).unwrap();
    assert!(service.check_permissions(&revisions).is_empty());
}

#[test]
fn test_permissions_undefined_change_always_violates() {
    let mut pdf = PdfBuilder::new();
    pdf.sign(SignatureOptions::signature("Author").certify(3));
    pdf.rewrite(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] >>");

    let service = service();
    let revisions = service.get_revisions(pdf.bytes()).unwrap();
    let violations = service.check_permissions(&revisions);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].reason.contains("Undefined"));
}

#[test]
fn test_permissions_field_lock() {
    let mut pdf = PdfBuilder::new();
    pdf.text_field("amount", "100")
        .text_field("comment", "none")
        .sign(SignatureOptions::signature("Signer").lock("<< /Type /SigFieldLock /Action /Include /Fields [(amount)] >>"))
        .fill_field("comment", "looks good");

    let service = service();
    let revisions = service.get_revisions(pdf.bytes()).unwrap();
    assert!(service.check_permissions(&revisions).is_empty());

    pdf.fill_field("amount", "1000000");
    let revisions = service.get_revisions(pdf.bytes()).unwrap();
    let violations = service.check_permissions(&revisions);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].reason.contains("amount"));
    assert_eq!(violations[0].signature_name, "Signer");
}
