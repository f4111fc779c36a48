//! Grade ladder and promotion resolver.
//!
//! # Responsibility
//! - Model the fixed ladder PRIMERO → SEGUNDO → TERCERO → CUARTO → QUINTO →
//!   GRADUADO as a closed enum.
//! - Resolve a stored grade token into an explicit promotion outcome.
//!
//! # Invariants
//! - `Grade::next` is total and monotonic; `GRADUADO` is terminal.
//! - Tokens are compared upper-cased; anything outside the ladder resolves to
//!   [`Promotion::Unchanged`], never to a default grade.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One rung of the grade ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    Primero,
    Segundo,
    Tercero,
    Cuarto,
    Quinto,
    /// Terminal state reached after `Quinto`.
    Graduado,
}

impl Grade {
    /// Ladder in promotion order.
    pub const LADDER: [Grade; 6] = [
        Grade::Primero,
        Grade::Segundo,
        Grade::Tercero,
        Grade::Cuarto,
        Grade::Quinto,
        Grade::Graduado,
    ];

    /// Canonical stored token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primero => "PRIMERO",
            Self::Segundo => "SEGUNDO",
            Self::Tercero => "TERCERO",
            Self::Cuarto => "CUARTO",
            Self::Quinto => "QUINTO",
            Self::Graduado => "GRADUADO",
        }
    }

    /// Parses a stored token, ignoring letter case.
    pub fn parse(token: &str) -> Option<Self> {
        let upper = token.to_uppercase();
        Self::LADDER
            .into_iter()
            .find(|grade| grade.as_str() == upper)
    }

    /// Successor on the ladder. `Graduado` maps to itself.
    pub fn next(self) -> Self {
        match self {
            Self::Primero => Self::Segundo,
            Self::Segundo => Self::Tercero,
            Self::Tercero => Self::Cuarto,
            Self::Cuarto => Self::Quinto,
            Self::Quinto | Self::Graduado => Self::Graduado,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Graduado)
    }
}

impl Display for Grade {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one student's grade at year end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// Move to the given non-terminal grade.
    Advance(Grade),
    /// Leave the ladder (`QUINTO` → `GRADUADO`).
    Graduate,
    /// Unknown token or already graduated; the record is not touched.
    Unchanged,
}

/// Resolves the promotion outcome for a stored grade token.
pub fn resolve_promotion(token: &str) -> Promotion {
    match Grade::parse(token) {
        None | Some(Grade::Graduado) => Promotion::Unchanged,
        Some(grade) => match grade.next() {
            Grade::Graduado => Promotion::Graduate,
            next => Promotion::Advance(next),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_promotion, Grade, Promotion};

    #[test]
    fn next_walks_the_ladder_in_order() {
        let mut grade = Grade::Primero;
        let mut visited = vec![grade];
        while !grade.is_terminal() {
            grade = grade.next();
            visited.push(grade);
        }
        assert_eq!(visited, Grade::LADDER.to_vec());
    }

    #[test]
    fn graduado_is_a_fixed_point() {
        assert_eq!(Grade::Graduado.next(), Grade::Graduado);
        assert_eq!(resolve_promotion("GRADUADO"), Promotion::Unchanged);
    }

    #[test]
    fn parse_ignores_case() {
        assert_eq!(Grade::parse("tercero"), Some(Grade::Tercero));
        assert_eq!(Grade::parse("CuArTo"), Some(Grade::Cuarto));
        assert_eq!(Grade::parse("SEXTO"), None);
        assert_eq!(Grade::parse(""), None);
    }

    #[test]
    fn quinto_graduates() {
        assert_eq!(resolve_promotion("quinto"), Promotion::Graduate);
    }
}
