use schoolyear_core::{ClosureRepoError, ClosureServiceError, DbError, RepoError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Failure of one CLI command.
#[derive(Debug)]
pub enum CliError {
    Db(DbError),
    Repo(RepoError),
    Closure(ClosureServiceError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json(serde_json::Error),
    Logging(String),
}

impl CliError {
    /// Process exit code. Distinct codes let scripts tell refusals apart.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Closure(ClosureServiceError::InvalidYear(_))
            | Self::Closure(ClosureServiceError::ConfirmationMismatch { .. }) => 2,
            Self::Closure(ClosureServiceError::AlreadyClosed { .. }) => 3,
            Self::Closure(ClosureServiceError::ClosureInProgress { .. }) => 4,
            Self::Closure(ClosureServiceError::PhaseFailed { .. }) => 5,
            Self::Closure(ClosureServiceError::RestoreUnsupported { .. }) => 6,
            _ => 1,
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "database error: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Closure(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(f, "cannot read `{}`: {source}", path.display()),
            Self::Json(err) => write!(f, "invalid JSON: {err}"),
            Self::Logging(message) => write!(f, "{message}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Closure(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            Self::Logging(_) => None,
        }
    }
}

impl From<DbError> for CliError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for CliError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<ClosureServiceError> for CliError {
    fn from(value: ClosureServiceError) -> Self {
        Self::Closure(value)
    }
}

impl From<ClosureRepoError> for CliError {
    fn from(value: ClosureRepoError) -> Self {
        Self::Closure(ClosureServiceError::from(value))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::CliError;
    use schoolyear_core::{AcademicYear, ClosureServiceError};

    #[test]
    fn refusals_map_to_distinct_exit_codes() {
        let year = AcademicYear::parse("2024").expect("year");
        let mismatch = CliError::from(ClosureServiceError::ConfirmationMismatch {
            expected: "CERRAR AÑO 2024".to_string(),
        });
        let restore = CliError::from(ClosureServiceError::RestoreUnsupported { year });
        assert_eq!(mismatch.exit_code(), 2);
        assert_eq!(restore.exit_code(), 6);
        assert_eq!(CliError::Logging("x".to_string()).exit_code(), 1);
    }
}
