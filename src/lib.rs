// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # LTV Oxide
//!
//! Long-term validation building blocks in Rust: evidence record
//! verification and PDF signature revision analysis.
//!
//! ## Evidence Records
//! - **RFC 4998** DER records and **RFC 6283** XML records decoded into one model
//! - **Hash trees**: reduced hash tree recomputation with orphan detection
//! - **Renewals**: timestamp and hash-tree renewal chains checked in order
//! - **Indications**: ETSI PASSED / FAILED / INDETERMINATE with sub-indications
//! - **ASiC**: evidence records correlated with container entries through manifests
//!
//! ## PDF Revisions
//! - **Revision history**: signatures, document timestamps and DSS updates, latest first
//! - **Byte ranges**: bounds checks and signature wrapping detection
//! - **Modifications**: object, page, annotation and visual diffs after signing
//! - **Permissions**: DocMDP, FieldMDP and `/Lock` evaluation
//! - **Pluggable backends**: documents are read through [`pdf::PdfReaderFactory`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use ltv_oxide::config::ValidationConfig;
//! use ltv_oxide::pdf::{LexicalReaderFactory, PdfSignatureService};
//!
//! # fn main() -> ltv_oxide::Result<()> {
//! let service = PdfSignatureService::new(LexicalReaderFactory, ValidationConfig::default());
//! let signatures = service.get_signatures(std::fs::read("signed.pdf")?.into())?;
//! println!("{} signatures", signatures.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]

// Error handling
pub mod error;

// Configuration
pub mod config;

// Digests shared by both engines
pub mod digest;

// Core PDF parsing
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;

// Evidence records
pub mod asic;
pub mod evidence;

// PDF revisions
pub mod pdf;

pub use config::ValidationConfig;
pub use error::{Error, OpenError, Result};
