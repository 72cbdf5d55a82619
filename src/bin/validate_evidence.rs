//! Evidence record validation binary.
//!
//! Validates an evidence record against detached data files and prints the
//! diagnostic data and simple report as JSON. With `--pdf`, the document is
//! also used as archived data and its revision history is printed.
//!
//! Usage: `validate_evidence <er-file> [--data <file>]... [--pdf <file>]`

use ltv_oxide::config::ValidationConfig;
use ltv_oxide::evidence::{parse_evidence_record, CmsTimestampVerifier, DetachedContent, EvidenceRecordReports, EvidenceRecordValidator};
use ltv_oxide::pdf::{LexicalReaderFactory, PdfRevision, PdfSignatureService};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Revision line of the PDF summary
#[derive(Debug, Serialize)]
struct RevisionSummary {
    kind: &'static str,
    field: Option<String>,
    byte_range: Option<String>,
    byte_range_valid: Option<bool>,
    covers_whole_document: Option<bool>,
    dictionary_consistent: Option<bool>,
    undefined_changes: Option<bool>,
}

#[derive(Debug, Default)]
struct Args {
    record: PathBuf,
    data: Vec<PathBuf>,
    pdf: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut record = None;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--data" => args.data.push(iter.next().ok_or("--data needs a file")?.into()),
            "--pdf" => args.pdf = Some(iter.next().ok_or("--pdf needs a file")?.into()),
            other if other.starts_with("--") => return Err(format!("unknown option {}", other)),
            other if record.is_none() => record = Some(PathBuf::from(other)),
            other => return Err(format!("unexpected argument {}", other)),
        }
    }
    args.record = record.ok_or("missing evidence record file")?;
    Ok(args)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn summarize(revision: &PdfRevision) -> RevisionSummary {
    let cms = revision.as_cms();
    RevisionSummary {
        kind: revision.kind_name(),
        field: cms.and_then(|c| c.fields.first()).map(|f| f.name.clone()),
        byte_range: cms.map(|c| c.byte_range.to_string()),
        byte_range_valid: cms.map(|c| c.byte_range_valid),
        covers_whole_document: cms.map(|c| c.covers_whole_document),
        dictionary_consistent: cms.map(|c| c.dictionary_consistent),
        undefined_changes: cms
            .and_then(|c| c.modification_detection.as_ref())
            .map(|d| d.has_undefined_changes()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("Error: {}", message);
            eprintln!("Usage: validate_evidence <er-file> [--data <file>]... [--pdf <file>]");
            std::process::exit(2);
        },
    };

    let record = parse_evidence_record(&std::fs::read(&args.record)?)?;
    let mut documents = Vec::new();
    for path in &args.data {
        documents.push(DetachedContent::new(file_name(path), std::fs::read(path)?).expected());
    }

    let config = ValidationConfig::default();
    if let Some(path) = &args.pdf {
        let data = std::fs::read(path)?;
        documents.push(DetachedContent::new(file_name(path), data.clone()).expected());
        let service = PdfSignatureService::new(LexicalReaderFactory, config.clone());
        let revisions = service.get_revisions(data.into())?;
        let violations = service.check_permissions(&revisions);
        let summary: Vec<RevisionSummary> = revisions.iter().map(summarize).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "revisions": summary,
                "permission_violations": violations,
            }))?
        );
    }

    let verifier = CmsTimestampVerifier;
    let validated = EvidenceRecordValidator::new(&record, &verifier)
        .with_config(config)
        .with_detached_contents(documents)
        .validate()?;
    println!("{}", EvidenceRecordReports::new(&validated).to_json()?);

    if validated.indication() != ltv_oxide::evidence::Indication::Passed {
        std::process::exit(1);
    }
    Ok(())
}
