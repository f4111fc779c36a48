//! Field validation shared by model types.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static ACADEMIC_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}$").expect("valid academic year regex"));
static SESSION_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{4}-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])$")
        .expect("valid session date regex")
});

/// Validation failures for model values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Entity id is blank.
    EmptyId(&'static str),
    /// Academic year is not a four-digit token.
    InvalidAcademicYear(String),
    /// Attendance session date is not `YYYY-MM-DD`.
    InvalidSessionDate { session_id: String, date: String },
    /// Workshop capacity of zero.
    ZeroCapacity(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId(entity) => write!(f, "{entity} id must not be blank"),
            Self::InvalidAcademicYear(value) => {
                write!(f, "academic year must be four digits, got `{value}`")
            }
            Self::InvalidSessionDate { session_id, date } => write!(
                f,
                "attendance session {session_id} has invalid date `{date}`; expected YYYY-MM-DD"
            ),
            Self::ZeroCapacity(id) => {
                write!(f, "workshop {id} declares max_participants = 0")
            }
        }
    }
}

impl Error for ValidationError {}

pub(crate) fn is_academic_year(value: &str) -> bool {
    ACADEMIC_YEAR_RE.is_match(value)
}

pub(crate) fn is_session_date(value: &str) -> bool {
    SESSION_DATE_RE.is_match(value)
}

pub(crate) fn ensure_id(entity: &'static str, id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId(entity));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{is_academic_year, is_session_date};

    #[test]
    fn academic_year_requires_four_digits() {
        assert!(is_academic_year("2024"));
        assert!(!is_academic_year("24"));
        assert!(!is_academic_year("2024-2025"));
        assert!(!is_academic_year(" 2024"));
    }

    #[test]
    fn session_date_rejects_out_of_range_month() {
        assert!(is_session_date("2024-03-15"));
        assert!(!is_session_date("2024-13-01"));
        assert!(!is_session_date("15/03/2024"));
    }
}
