//! IBAN and BIC validation
//!
//! IBANs are checked for structure, registry length and the ISO 13616 MOD-97
//! checksum. BICs are checked structurally against ISO 9362, country codes
//! against the ISO 3166 alpha-2 shape.

use regex::Regex;
use thiserror::Error;

/// Reason an identifier was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("bad length: expected {expected}, got {actual}")]
    BadLength { expected: String, actual: usize },

    #[error("bad checksum")]
    BadChecksum,
}

/// IBAN lengths by country, from the SWIFT IBAN registry
const IBAN_LENGTHS: &[(&str, usize)] = &[
    ("AD", 24), ("AE", 23), ("AL", 28), ("AT", 20), ("AZ", 28), ("BA", 20),
    ("BE", 16), ("BG", 22), ("BH", 22), ("BI", 27), ("BR", 29), ("BY", 28),
    ("CH", 21), ("CR", 22), ("CY", 28), ("CZ", 24), ("DE", 22), ("DJ", 27),
    ("DK", 18), ("DO", 28), ("EE", 20), ("EG", 29), ("ES", 24), ("FI", 18),
    ("FK", 18), ("FO", 18), ("FR", 27), ("GB", 22), ("GE", 22), ("GI", 23),
    ("GL", 18), ("GR", 27), ("GT", 28), ("HR", 21), ("HU", 28), ("IE", 22),
    ("IL", 23), ("IQ", 23), ("IS", 26), ("IT", 27), ("JO", 30), ("KW", 30),
    ("KZ", 20), ("LB", 28), ("LC", 32), ("LI", 21), ("LT", 20), ("LU", 20),
    ("LV", 21), ("LY", 25), ("MC", 27), ("MD", 24), ("ME", 22), ("MK", 19),
    ("MN", 20), ("MR", 27), ("MT", 31), ("MU", 30), ("NI", 28), ("NL", 18),
    ("NO", 15), ("OM", 23), ("PK", 24), ("PL", 28), ("PS", 29), ("PT", 25),
    ("QA", 29), ("RO", 24), ("RS", 22), ("RU", 33), ("SA", 24), ("SC", 31),
    ("SD", 18), ("SE", 24), ("SI", 19), ("SK", 24), ("SM", 27), ("SO", 23),
    ("ST", 25), ("SV", 28), ("TL", 23), ("TN", 24), ("TR", 26), ("UA", 29),
    ("VA", 22), ("VG", 24), ("XK", 20), ("YE", 30),
];

/// Stateless identifier validator.
#[derive(Debug, Clone)]
pub struct IdentifierValidator {
    iban_regex: Regex,
    bic_regex: Regex,
    country_regex: Regex,
}

impl Default for IdentifierValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierValidator {
    pub fn new() -> Self {
        Self {
            iban_regex: Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z0-9]+$").expect("Invalid IBAN pattern"),
            bic_regex: Regex::new(r"^[A-Z]{6}[A-Z0-9]{2}([A-Z0-9]{3})?$")
                .expect("Invalid BIC pattern"),
            country_regex: Regex::new(r"^[A-Z]{2}$").expect("Invalid country pattern"),
        }
    }

    /// Validate an IBAN and return its electronic form (no spaces, upper case).
    pub fn validate_iban(&self, value: &str) -> Result<String, IdentifierError> {
        let iban: String = value
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        if !self.iban_regex.is_match(&iban) {
            return Err(IdentifierError::BadFormat(
                "expected country code, check digits and alphanumeric BBAN".to_string(),
            ));
        }

        let country = &iban[..2];
        let expected = IBAN_LENGTHS
            .iter()
            .find(|(code, _)| *code == country)
            .map(|(_, len)| *len)
            .ok_or_else(|| IdentifierError::BadFormat(format!("unknown country code {country}")))?;

        if iban.len() != expected {
            return Err(IdentifierError::BadLength {
                expected: expected.to_string(),
                actual: iban.len(),
            });
        }

        if mod97(&iban) != 1 {
            return Err(IdentifierError::BadChecksum);
        }

        Ok(iban)
    }

    /// Validate a BIC and return it upper-cased.
    pub fn validate_bic(&self, value: &str) -> Result<String, IdentifierError> {
        let bic = value.trim().to_ascii_uppercase();

        if bic.len() != 8 && bic.len() != 11 {
            return Err(IdentifierError::BadLength {
                expected: "8 or 11".to_string(),
                actual: bic.chars().count(),
            });
        }

        if !self.bic_regex.is_match(&bic) {
            return Err(IdentifierError::BadFormat(
                "expected 4 letter bank, 2 letter country, 2 character location and optional branch"
                    .to_string(),
            ));
        }

        Ok(bic)
    }

    /// Validate an ISO 3166 alpha-2 country code and return it upper-cased.
    pub fn validate_country(&self, value: &str) -> Result<String, IdentifierError> {
        let country = value.trim().to_ascii_uppercase();
        if !self.country_regex.is_match(&country) {
            return Err(IdentifierError::BadFormat(
                "expected two letter country code".to_string(),
            ));
        }
        Ok(country)
    }
}

/// MOD-97 of the rearranged IBAN, folded digit by digit.
///
/// Input must be ASCII alphanumeric.
fn mod97(iban: &str) -> u32 {
    let rearranged = iban[4..].bytes().chain(iban[..4].bytes());

    rearranged.fold(0u32, |acc, b| match b {
        b'0'..=b'9' => (acc * 10 + u32::from(b - b'0')) % 97,
        // A = 10 ... Z = 35, always two digits
        _ => (acc * 100 + u32::from(b - b'A') + 10) % 97,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ibans() {
        let validator = IdentifierValidator::new();
        assert_eq!(
            validator.validate_iban("DE89370400440532013000").unwrap(),
            "DE89370400440532013000"
        );
        assert!(validator.validate_iban("GB29NWBK60161331926819").is_ok());
        assert!(validator.validate_iban("NL91ABNA0417164300").is_ok());
        assert!(validator.validate_iban("FR1420041010050500013M02606").is_ok());
    }

    #[test]
    fn test_iban_spaces_and_case_normalized() {
        let validator = IdentifierValidator::new();
        assert_eq!(
            validator.validate_iban("gb29 nwbk 6016 1331 9268 19").unwrap(),
            "GB29NWBK60161331926819"
        );
    }

    #[test]
    fn test_iban_bad_checksum() {
        let validator = IdentifierValidator::new();
        assert_eq!(
            validator.validate_iban("DE89370400440532013001"),
            Err(IdentifierError::BadChecksum)
        );
    }

    #[test]
    fn test_iban_bad_length() {
        let validator = IdentifierValidator::new();
        assert!(matches!(
            validator.validate_iban("DE8937040044053201300"),
            Err(IdentifierError::BadLength { actual: 21, .. })
        ));
    }

    #[test]
    fn test_iban_bad_format() {
        let validator = IdentifierValidator::new();
        assert!(matches!(
            validator.validate_iban("invalid"),
            Err(IdentifierError::BadFormat(_))
        ));
        assert!(matches!(
            validator.validate_iban(""),
            Err(IdentifierError::BadFormat(_))
        ));
        assert!(matches!(
            validator.validate_iban("DE89-3704-0044"),
            Err(IdentifierError::BadFormat(_))
        ));
        // Unknown country
        assert!(matches!(
            validator.validate_iban("ZZ89370400440532013000"),
            Err(IdentifierError::BadFormat(_))
        ));
    }

    #[test]
    fn test_iban_non_ascii_does_not_panic() {
        let validator = IdentifierValidator::new();
        assert!(validator.validate_iban("DE89ü70400440532013000").is_err());
    }

    #[test]
    fn test_bic_validation() {
        let validator = IdentifierValidator::new();
        assert_eq!(validator.validate_bic("nwbkgb2l").unwrap(), "NWBKGB2L");
        assert!(validator.validate_bic("CHASUS33XXX").is_ok());
        assert!(matches!(
            validator.validate_bic("BANK"),
            Err(IdentifierError::BadLength { actual: 4, .. })
        ));
        assert!(matches!(
            validator.validate_bic("1234GB2L"),
            Err(IdentifierError::BadFormat(_))
        ));
    }

    #[test]
    fn test_country_validation() {
        let validator = IdentifierValidator::new();
        assert_eq!(validator.validate_country(" ir ").unwrap(), "IR");
        assert!(validator.validate_country("IRN").is_err());
        assert!(validator.validate_country("1R").is_err());
    }
}
