//! PII redaction

mod standard_redactor;

pub use standard_redactor::StandardRedactor;

use crate::detector::PIIType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Glyph written over masked characters
pub const MASK_GLYPH: char = '●';

/// Redaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// Replace every match with a `[REDACTED:<TAG>]` token
    Strict,

    /// Reveal a short suffix, mask the rest
    #[default]
    Mask,

    /// Leave text untouched; no scanning happens
    #[serde(rename = "none")]
    Disabled,
}

impl RedactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionMode::Strict => "strict",
            RedactionMode::Mask => "mask",
            RedactionMode::Disabled => "none",
        }
    }
}

impl std::str::FromStr for RedactionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(RedactionMode::Strict),
            "mask" => Ok(RedactionMode::Mask),
            "none" => Ok(RedactionMode::Disabled),
            other => Err(format!(
                "unknown redaction mode '{}', expected strict, mask or none",
                other
            )),
        }
    }
}

/// Caller-supplied redaction policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiiPolicy {
    /// How matches are rewritten
    #[serde(default)]
    pub mode: RedactionMode,

    /// Email domains that are never redacted (suffix match, case-insensitive)
    #[serde(default, alias = "allow_email_domains")]
    pub allow_email_domains: Vec<String>,
}

impl PiiPolicy {
    pub fn strict() -> Self {
        Self {
            mode: RedactionMode::Strict,
            allow_email_domains: Vec::new(),
        }
    }

    pub fn mask() -> Self {
        Self {
            mode: RedactionMode::Mask,
            allow_email_domains: Vec::new(),
        }
    }

    /// Add allow-listed email domains
    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_email_domains
            .extend(domains.into_iter().map(Into::into));
        self
    }

    /// Whether an email domain is covered by the allow-list
    pub fn allows_email_domain(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        self.allow_email_domains.iter().any(|allowed| {
            let allowed = allowed.trim().trim_start_matches('@').to_lowercase();
            !allowed.is_empty() && domain.ends_with(&allowed)
        })
    }
}

/// Per-call count of matches by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PiiSummary(BTreeMap<PIIType, usize>);

impl PiiSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one match of `pii_type`
    pub fn record(&mut self, pii_type: PIIType) {
        *self.0.entry(pii_type).or_insert(0) += 1;
    }

    /// Matches found for `pii_type` (zero when absent)
    pub fn get(&self, pii_type: PIIType) -> usize {
        self.0.get(&pii_type).copied().unwrap_or(0)
    }

    pub fn contains(&self, pii_type: PIIType) -> bool {
        self.0.contains_key(&pii_type)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of categories found
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Matches across all categories
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PIIType, usize)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

/// Result of one redaction call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionOutcome {
    pub redacted: String,
    pub summary: PiiSummary,
    pub had_pii: bool,
}

impl RedactionOutcome {
    /// Outcome for text that was not scanned
    pub fn untouched(text: &str) -> Self {
        Self {
            redacted: text.to_string(),
            summary: PiiSummary::new(),
            had_pii: false,
        }
    }
}

/// Trait for redacting PII from text
pub trait PIIRedactor: Send + Sync {
    /// Redact PII from text according to the policy
    fn redact(&self, text: &str, policy: &PiiPolicy) -> RedactionOutcome;
}

/// Mask all but the last `keep` characters with [`MASK_GLYPH`].
///
/// Strings no longer than `keep` are masked entirely.
pub fn mask(value: &str, keep: usize) -> String {
    let len = value.chars().count();
    if len <= keep {
        return MASK_GLYPH.to_string().repeat(len);
    }

    let hidden = len - keep;
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { MASK_GLYPH } else { c })
        .collect()
}
