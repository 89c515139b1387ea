//! Regex-based PII detector pipeline

use crate::PiiError;
use crate::detector::{PIIType, PatternDetector};
use regex::Regex;

// Email: local part and domain captured separately so mask mode can keep the domain
const EMAIL_PATTERN: &str = r"\b([A-Za-z0-9._%+-]+)@([A-Za-z0-9.-]+\.[A-Za-z]{2,})\b";

// SSN: 123-45-6789
const SSN_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";

// Phone numbers: (555) 123-4567, 555-123-4567, 555.123.4567, +1 555 123 4567
const PHONE_PATTERN: &str = r"(?:(?:\+|\b)1[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]\d{4}\b";

// Date of birth, only when labelled: "DOB: 03/14/1990", "born on 1990-03-14"
const DOB_PATTERN: &str = concat!(
    r"(?i)\b(?:dob|d\.o\.b\.?|date\s+of\s+birth|birth\s*date|born(?:\s+on)?)\s*[:#-]?\s*",
    r"(\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}|\d{4}-\d{1,2}-\d{1,2}",
    r"|(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4})",
);

// Credit cards: 13-19 digits with optional single space/dash separators
const CARD_PATTERN: &str = r"\b(?:\d[ -]?){12,18}\d\b";

// ABA routing numbers: bare 9 digit runs
const ROUTING_PATTERN: &str = r"\b\d{9}\b";

const PASSPORT_PATTERN: &str =
    r"(?i)\bpassport(?:\s*(?:no\.?|num(?:ber)?\.?|#))?\s*[:#]?\s*([A-Z0-9]{6,9})\b";

const DRIVERS_LICENSE_PATTERN: &str = concat!(
    r"(?i)\b(?:driver(?:'|’)?s?\s+licen[cs]e|DL)(?:\s*(?:no\.?|num(?:ber)?\.?|#))?",
    r"\s*[:#]?\s*([A-Z0-9][A-Z0-9-]{4,15})\b",
);

// Street addresses: house number, up to four name words, street suffix
const ADDRESS_PATTERN: &str = concat!(
    r"(?i)\b\d{1,6}\s+(?:[A-Z0-9.'-]+\s+){0,4}?",
    r"(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|way",
    r"|place|pl|terrace|ter|circle|cir|parkway|pkwy|highway|hwy)\b\.?",
);

/// Ordered regex pipeline covering every [`PIIType`]
pub struct RegexPIIDetector {
    detectors: Vec<PatternDetector>,
}

impl RegexPIIDetector {
    /// Compile the built-in pipeline
    pub fn new() -> Result<Self, PiiError> {
        let detectors = vec![
            stage(PIIType::Email, EMAIL_PATTERN, None, None)?,
            stage(PIIType::SSN, SSN_PATTERN, None, None)?,
            stage(PIIType::Phone, PHONE_PATTERN, None, None)?,
            stage(PIIType::DateOfBirth, DOB_PATTERN, Some(1), None)?,
            stage(
                PIIType::CreditCard,
                CARD_PATTERN,
                None,
                Some(validate_credit_card),
            )?,
            stage(PIIType::RoutingNumber, ROUTING_PATTERN, None, None)?,
            stage(PIIType::Passport, PASSPORT_PATTERN, Some(1), Some(has_digit))?,
            stage(
                PIIType::DriversLicense,
                DRIVERS_LICENSE_PATTERN,
                Some(1),
                Some(has_digit),
            )?,
            stage(PIIType::StreetAddress, ADDRESS_PATTERN, None, None)?,
        ];

        Ok(Self { detectors })
    }

    /// Pipeline stages in the order they must be applied
    pub fn stages(&self) -> &[PatternDetector] {
        &self.detectors
    }

    /// Look up the stage for a category
    pub fn stage(&self, pii_type: PIIType) -> Option<&PatternDetector> {
        self.detectors.iter().find(|d| d.pii_type == pii_type)
    }
}

fn stage(
    pii_type: PIIType,
    pattern: &str,
    value_group: Option<usize>,
    validate: Option<fn(&str) -> bool>,
) -> Result<PatternDetector, PiiError> {
    let regex =
        Regex::new(pattern).map_err(|source| PiiError::InvalidPattern { pii_type, source })?;
    Ok(PatternDetector {
        pii_type,
        regex,
        value_group,
        validate,
        shrink_on_reject: pii_type == PIIType::CreditCard,
    })
}

/// Validate a potential credit card number using Luhn algorithm
pub fn validate_credit_card(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }

    let checksum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();

    checksum % 10 == 0
}

/// Labelled identifiers must carry at least one digit, which keeps words
/// like "passport office" from being redacted
fn has_digit(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_digit())
}
