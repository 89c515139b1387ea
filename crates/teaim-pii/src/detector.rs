//! PII detectors

mod regex_detector;

pub use regex_detector::RegexPIIDetector;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Types of PII that can be detected
///
/// Variant order is pipeline order; summaries iterate in this order too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PIIType {
    /// Email address
    Email,

    /// Social Security Number
    #[serde(rename = "ssn")]
    SSN,

    /// Phone number
    Phone,

    /// Labelled date of birth
    #[serde(rename = "dob")]
    DateOfBirth,

    /// Luhn-valid card number
    #[serde(rename = "card")]
    CreditCard,

    /// Nine digit bank routing number
    #[serde(rename = "routing")]
    RoutingNumber,

    /// Labelled passport number
    Passport,

    /// Labelled driver's license number
    DriversLicense,

    /// Street address
    #[serde(rename = "address")]
    StreetAddress,
}

impl PIIType {
    /// Every category, in pipeline order
    pub const ALL: [PIIType; 9] = [
        PIIType::Email,
        PIIType::SSN,
        PIIType::Phone,
        PIIType::DateOfBirth,
        PIIType::CreditCard,
        PIIType::RoutingNumber,
        PIIType::Passport,
        PIIType::DriversLicense,
        PIIType::StreetAddress,
    ];

    /// Summary key for this category
    pub fn as_str(&self) -> &'static str {
        match self {
            PIIType::Email => "email",
            PIIType::SSN => "ssn",
            PIIType::Phone => "phone",
            PIIType::DateOfBirth => "dob",
            PIIType::CreditCard => "card",
            PIIType::RoutingNumber => "routing",
            PIIType::Passport => "passport",
            PIIType::DriversLicense => "drivers_license",
            PIIType::StreetAddress => "address",
        }
    }

    /// Token written in place of a match in strict mode
    pub fn redaction_token(&self) -> &'static str {
        match self {
            PIIType::Email => "[REDACTED:EMAIL]",
            PIIType::SSN => "[REDACTED:SSN]",
            PIIType::Phone => "[REDACTED:PHONE]",
            PIIType::DateOfBirth => "[REDACTED:DOB]",
            PIIType::CreditCard => "[REDACTED:CARD]",
            PIIType::RoutingNumber => "[REDACTED:ROUTING]",
            PIIType::Passport => "[REDACTED:PASSPORT]",
            PIIType::DriversLicense => "[REDACTED:DL]",
            PIIType::StreetAddress => "[REDACTED:ADDRESS]",
        }
    }

    /// Trailing characters left visible in mask mode
    pub fn mask_keep(&self) -> usize {
        match self {
            PIIType::SSN
            | PIIType::Phone
            | PIIType::RoutingNumber
            | PIIType::Passport
            | PIIType::DriversLicense => 2,
            _ => 4,
        }
    }
}

impl std::fmt::Display for PIIType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage of the detection pipeline
pub struct PatternDetector {
    /// Category this stage reports
    pub pii_type: PIIType,

    /// Candidate pattern
    pub regex: Regex,

    /// Capture group holding the sensitive value. `None` means the whole match;
    /// text outside the group (a label such as `DOB:`) is preserved.
    pub value_group: Option<usize>,

    /// Extra check on the sensitive value; rejected candidates are left as-is
    pub validate: Option<fn(&str) -> bool>,

    /// On rejection, retry the value cut back at each space or dash and keep
    /// the longest prefix that validates. Catches a card followed by an
    /// expiry or another short number.
    pub shrink_on_reject: bool,
}

impl PatternDetector {
    /// Span of the sensitive value relative to the start of the whole match
    pub fn value_span(&self, caps: &Captures<'_>) -> (usize, usize) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        match self.value_group.and_then(|g| caps.get(g)) {
            Some(value) => (value.start() - whole.0, value.end() - whole.0),
            None => (0, whole.1 - whole.0),
        }
    }

    /// Whether a candidate value passes this stage's validation
    pub fn accepts(&self, value: &str) -> bool {
        self.validate.is_none_or(|validate| validate(value))
    }

    /// Byte length of the part of `value` to redact, or `None` to leave it
    pub fn accepted_len(&self, value: &str) -> Option<usize> {
        if self.accepts(value) {
            return Some(value.len());
        }
        if !self.shrink_on_reject {
            return None;
        }
        value
            .char_indices()
            .rev()
            .filter(|(_, c)| *c == ' ' || *c == '-')
            .map(|(i, _)| i)
            .find(|&i| self.accepts(&value[..i]))
    }
}

impl std::fmt::Debug for PatternDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternDetector")
            .field("pii_type", &self.pii_type)
            .field("regex", &self.regex.as_str())
            .field("value_group", &self.value_group)
            .field("validated", &self.validate.is_some())
            .finish()
    }
}
