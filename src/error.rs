//! Error types for the validation library.
//!
//! Only structural failures are errors. Missing data, digest mismatches and
//! per-revision PDF anomalies are recorded in validation results instead.

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while parsing or validating.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)] // "Invalid" prefix is intentional for clarity
pub enum Error {
    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Referenced object not found
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// The PDF could not be opened by the configured backend
    #[error("Cannot open PDF: {0}")]
    Open(#[from] OpenError),

    /// Two signature byte ranges neither envelop nor equal each other
    #[error("Inconsistent byte ranges: {first} and {second}")]
    InconsistentByteRanges {
        /// First byte range, formatted as a PDF array
        first: String,
        /// Second byte range, formatted as a PDF array
        second: String,
    },

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Malformed evidence record structure
    #[error("Invalid evidence record: {0}")]
    InvalidEvidenceRecord(String),

    /// Malformed or unreadable timestamp token
    #[error("Invalid timestamp token: {0}")]
    InvalidTimestamp(String),

    /// Digest algorithm OID or URI not supported
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),

    /// Malformed ASiC manifest
    #[error("Invalid manifest {name}: {reason}")]
    InvalidManifest {
        /// Container entry name of the manifest
        name: String,
        /// Reason for failure
        reason: String,
    },

    /// DER decoding error
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// XML decoding error
    #[error("XML error: {0}")]
    Xml(String),

    /// Base64 decoding error
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Xml(e.to_string())
    }
}

/// Reasons a PDF backend refuses to open a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    /// Input does not start with a PDF header
    #[error("not a PDF document (header: {0:?})")]
    NotPdf(String),

    /// Input ends before any usable object or trailer
    #[error("truncated document ({0} bytes)")]
    Truncated(usize),

    /// Structure present but unusable
    #[error("malformed document: {0}")]
    Malformed(String),
}
