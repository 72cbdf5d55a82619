//! Configuration for evidence record and PDF revision validation.

use crate::digest::DigestAlgorithm;

/// Validation configuration.
///
/// # Example
///
/// ```
/// use ltv_oxide::config::ValidationConfig;
///
/// let config = ValidationConfig::default()
///     .with_require_all_archive_data_objects(false)
///     .with_visual_diff(true);
/// assert!(config.enable_visual_diff);
/// ```
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Every archived data object must be supplied to validation.
    ///
    /// When set, a single unresolved data object digest makes the record
    /// INDETERMINATE/SIGNED_DATA_NOT_FOUND. When cleared, orphans are
    /// tolerated as long as at least one data object was found.
    pub require_all_archive_data_objects: bool,

    /// Algorithm assumed for container manifest digests that do not name
    /// one.
    pub default_digest_algorithm: DigestAlgorithm,

    /// Maximum number of signature dictionaries processed per document
    pub max_revisions: usize,

    /// Compare rasterized pages between signed and final revisions
    pub enable_visual_diff: bool,

    /// Per-pixel luminance difference ignored by the visual diff
    pub visual_diff_tolerance: u8,

    /// Compare each signature dictionary against its revision-local copy
    pub check_dictionary_consistency: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self::strict()
    }
}

impl ValidationConfig {
    /// Strict mode: all archived data must be present.
    pub fn strict() -> Self {
        Self {
            require_all_archive_data_objects: true,
            default_digest_algorithm: DigestAlgorithm::Sha256,
            max_revisions: 1000,
            enable_visual_diff: false,
            visual_diff_tolerance: 0,
            check_dictionary_consistency: true,
        }
    }

    /// Lenient mode: partially supplied archives are accepted.
    pub fn lenient() -> Self {
        Self {
            require_all_archive_data_objects: false,
            visual_diff_tolerance: 8,
            ..Self::strict()
        }
    }

    /// Set the archive data completeness policy.
    pub fn with_require_all_archive_data_objects(mut self, enable: bool) -> Self {
        self.require_all_archive_data_objects = enable;
        self
    }

    /// Set the fallback digest algorithm.
    pub fn with_default_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.default_digest_algorithm = algorithm;
        self
    }

    /// Limit the number of processed signature dictionaries.
    pub fn with_max_revisions(mut self, max: usize) -> Self {
        self.max_revisions = max;
        self
    }

    /// Enable visual diffing.
    pub fn with_visual_diff(mut self, enable: bool) -> Self {
        self.enable_visual_diff = enable;
        self
    }

    /// Set the visual diff tolerance.
    pub fn with_visual_diff_tolerance(mut self, tolerance: u8) -> Self {
        self.visual_diff_tolerance = tolerance;
        self
    }

    /// Enable or disable signature dictionary consistency checks.
    pub fn with_dictionary_consistency_check(mut self, enable: bool) -> Self {
        self.check_dictionary_consistency = enable;
        self
    }
}
