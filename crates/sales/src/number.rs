//! Year-scoped sequential document numbers.
//!
//! Format: `PREFIX-YYYY-NNNNN` (e.g. `INV-2026-00042`). Sequences are scoped
//! per document kind and calendar year and assigned inside the same
//! transaction that inserts the document, backed by a store-level uniqueness
//! constraint.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult};

/// A parsed or freshly assigned document number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentNumber {
    prefix: String,
    year: i32,
    sequence: u32,
}

impl DocumentNumber {
    pub fn new(prefix: impl Into<String>, year: i32, sequence: u32) -> DomainResult<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::validation(
                "document number prefix must be non-empty ASCII uppercase",
            ));
        }
        if !(1000..=9999).contains(&year) {
            return Err(DomainError::validation("document number year must be four digits"));
        }
        if sequence == 0 {
            return Err(DomainError::validation("document number sequence starts at 1"));
        }
        Ok(Self {
            prefix,
            year,
            sequence,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{:04}-{:05}", self.prefix, self.year, self.sequence)
    }
}

impl FromStr for DocumentNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let (prefix, year, sequence) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(y), Some(n)) => (p, y, n),
            _ => {
                return Err(DomainError::validation(format!(
                    "malformed document number '{s}'"
                )));
            }
        };
        if year.len() != 4 || sequence.len() < 5 {
            return Err(DomainError::validation(format!(
                "malformed document number '{s}'"
            )));
        }
        let year: i32 = year
            .parse()
            .map_err(|_| DomainError::validation(format!("malformed document number '{s}'")))?;
        let sequence: u32 = sequence
            .parse()
            .map_err(|_| DomainError::validation(format!("malformed document number '{s}'")))?;
        Self::new(prefix, year, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_zero_padding() {
        let number = DocumentNumber::new("INV", 2026, 42).unwrap();
        assert_eq!(number.to_string(), "INV-2026-00042");
    }

    #[test]
    fn wide_sequences_keep_all_digits() {
        let number = DocumentNumber::new("ORD", 2026, 123_456).unwrap();
        assert_eq!(number.to_string(), "ORD-2026-123456");
    }

    #[test]
    fn parse_round_trips() {
        let number = DocumentNumber::new("INV", 2026, 7).unwrap();
        let parsed: DocumentNumber = number.to_string().parse().unwrap();
        assert_eq!(parsed, number);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(DocumentNumber::new("", 2026, 1).is_err());
        assert!(DocumentNumber::new("inv", 2026, 1).is_err());
        assert!(DocumentNumber::new("INV", 26, 1).is_err());
        assert!(DocumentNumber::new("INV", 2026, 0).is_err());
        assert!("INV-26-00001".parse::<DocumentNumber>().is_err());
        assert!("INV-2026-1".parse::<DocumentNumber>().is_err());
        assert!("INV2026-00001".parse::<DocumentNumber>().is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: every formatted number matches `^[A-Z]+-\d{4}-\d{5,}$`
            /// and survives a parse round trip.
            #[test]
            fn format_shape_holds(
                prefix in "[A-Z]{1,6}",
                year in 1000i32..=9999,
                sequence in 1u32..=999_999
            ) {
                let number = DocumentNumber::new(prefix.clone(), year, sequence).unwrap();
                let text = number.to_string();

                let mut parts = text.splitn(3, '-');
                let p = parts.next().unwrap();
                let y = parts.next().unwrap();
                let n = parts.next().unwrap();
                prop_assert_eq!(p, prefix.as_str());
                prop_assert!(p.chars().all(|c| c.is_ascii_uppercase()));
                prop_assert_eq!(y.len(), 4);
                prop_assert!(y.chars().all(|c| c.is_ascii_digit()));
                prop_assert!(n.len() >= 5);
                prop_assert!(n.chars().all(|c| c.is_ascii_digit()));

                let parsed: DocumentNumber = text.parse().unwrap();
                prop_assert_eq!(parsed, number);
            }
        }
    }
}
