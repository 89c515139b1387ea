//! Standard PII redactor implementation

use crate::PiiError;
use crate::detector::{PIIType, PatternDetector, RegexPIIDetector};
use crate::redactor::{PIIRedactor, PiiPolicy, PiiSummary, RedactionMode, RedactionOutcome, mask};
use regex::Captures;

/// Runs the detector pipeline and rewrites matches according to a [`PiiPolicy`]
pub struct StandardRedactor {
    detector: RegexPIIDetector,
}

impl StandardRedactor {
    /// Create a redactor over the built-in detector pipeline
    pub fn new() -> Result<Self, PiiError> {
        Ok(Self::with_detector(RegexPIIDetector::new()?))
    }

    /// Create a redactor over an existing detector pipeline
    pub fn with_detector(detector: RegexPIIDetector) -> Self {
        Self { detector }
    }

    /// Apply one pipeline stage, returning the rewritten text and match count
    fn apply_stage(&self, stage: &PatternDetector, text: &str, policy: &PiiPolicy) -> (String, usize) {
        let mut found = 0usize;

        let rewritten = stage.regex.replace_all(text, |caps: &Captures<'_>| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();

            if stage.pii_type == PIIType::Email {
                let domain = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                if policy.allows_email_domain(domain) {
                    return whole.to_string();
                }
                found += 1;
                return match policy.mode {
                    RedactionMode::Mask => format!("***@{}", domain),
                    _ => PIIType::Email.redaction_token().to_string(),
                };
            }

            let (start, end) = stage.value_span(caps);
            let Some(len) = stage.accepted_len(&whole[start..end]) else {
                return whole.to_string();
            };
            let end = start + len;
            let value = &whole[start..end];
            found += 1;

            let replacement = match policy.mode {
                RedactionMode::Mask => mask(value, stage.pii_type.mask_keep()),
                _ => stage.pii_type.redaction_token().to_string(),
            };
            format!("{}{}{}", &whole[..start], replacement, &whole[end..])
        });

        (rewritten.into_owned(), found)
    }
}

impl PIIRedactor for StandardRedactor {
    fn redact(&self, text: &str, policy: &PiiPolicy) -> RedactionOutcome {
        if text.is_empty() || policy.mode == RedactionMode::Disabled {
            return RedactionOutcome::untouched(text);
        }

        let mut summary = PiiSummary::new();
        let mut current = text.to_string();

        for stage in self.detector.stages() {
            let (rewritten, found) = self.apply_stage(stage, &current, policy);
            for _ in 0..found {
                summary.record(stage.pii_type);
            }
            current = rewritten;
        }

        let had_pii = !summary.is_empty();
        RedactionOutcome {
            redacted: current,
            summary,
            had_pii,
        }
    }
}
