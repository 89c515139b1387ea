//! TEAIM PII Detection and Redaction
//!
//! This crate scrubs personally identifiable information from free text:
//! - Email, SSN, phone, date of birth, credit card, routing number,
//!   passport, driver's license and street address detection
//! - Strict (token replacement) and mask (partial reveal) modes
//! - A per-call summary of what was found
//!
//! Detectors run as an ordered pipeline. Each stage sees the output of the
//! stage before it, so earlier categories win overlapping spans.

pub mod detector;
pub mod redactor;

pub use detector::{PIIType, PatternDetector, RegexPIIDetector};
pub use redactor::{
    MASK_GLYPH, PIIRedactor, PiiPolicy, PiiSummary, RedactionMode, RedactionOutcome,
    StandardRedactor, mask,
};

use once_cell::sync::Lazy;
use thiserror::Error;

/// Errors raised while building detectors
#[derive(Debug, Error)]
pub enum PiiError {
    /// A detector pattern failed to compile
    #[error("Invalid pattern for {pii_type:?}: {source}")]
    InvalidPattern {
        pii_type: PIIType,
        #[source]
        source: regex::Error,
    },
}

static DEFAULT_REDACTOR: Lazy<StandardRedactor> = Lazy::new(|| {
    StandardRedactor::new().expect("built-in PII patterns are valid regular expressions")
});

/// Redact `text` with the process-wide redactor built from the built-in patterns
pub fn redact(text: &str, policy: &PiiPolicy) -> RedactionOutcome {
    DEFAULT_REDACTOR.redact(text, policy)
}
