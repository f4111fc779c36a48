//! Typed confirmation phrases for destructive operations.
//!
//! # Invariants
//! - Comparison is exact byte equality: no trimming, no case folding.
//! - Verification never touches storage.

use crate::model::closure::AcademicYear;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Operator typed something other than the expected phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationMismatch {
    pub expected: String,
}

impl Display for ConfirmationMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "confirmation phrase mismatch; type exactly `{}`", self.expected)
    }
}

impl Error for ConfirmationMismatch {}

/// Phrase that authorizes closing `year`.
pub fn closure_phrase(year: &AcademicYear) -> String {
    format!("CERRAR AÑO {year}")
}

/// Phrase that authorizes restoring `year` from its archive.
pub fn restore_phrase(year: &AcademicYear) -> String {
    format!("RESTAURAR AÑO {year}")
}

pub fn verify_phrase(input: &str, expected: &str) -> Result<(), ConfirmationMismatch> {
    if input.as_bytes() == expected.as_bytes() {
        return Ok(());
    }
    Err(ConfirmationMismatch {
        expected: expected.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{closure_phrase, restore_phrase, verify_phrase};
    use crate::model::closure::AcademicYear;

    fn year() -> AcademicYear {
        AcademicYear::parse("2024").expect("valid year")
    }

    #[test]
    fn phrases_embed_the_year() {
        assert_eq!(closure_phrase(&year()), "CERRAR AÑO 2024");
        assert_eq!(restore_phrase(&year()), "RESTAURAR AÑO 2024");
    }

    #[test]
    fn only_exact_input_passes() {
        let expected = closure_phrase(&year());
        assert!(verify_phrase("CERRAR AÑO 2024", &expected).is_ok());
        for input in [
            "cerrar año 2024",
            "CERRAR ANO 2024",
            " CERRAR AÑO 2024",
            "CERRAR AÑO 2024 ",
            "CERRAR AÑO 2023",
            "",
        ] {
            let err = verify_phrase(input, &expected).expect_err("must reject");
            assert_eq!(err.expected, expected);
        }
    }
}
