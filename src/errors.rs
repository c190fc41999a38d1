use crate::models::FailureKind;
use std::fmt;
use thiserror::Error;

/// Application-level error types.
///
/// These are run-level failures. Row-level persistence problems are carried by
/// [`StoreError`] and recorded as failure records instead of aborting the run.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors (connect, schema, run bookkeeping).
    DatabaseError(sqlx::Error),
    /// A persistence error the store considers fatal for the run.
    StoreError(StoreError),
    /// The source directory is missing or is not a directory.
    SourceNotFound(String),
    /// Invalid configuration or command-line input.
    BadRequest(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::StoreError(e) => write!(f, "Store error: {}", e),
            AppError::SourceNotFound(path) => write!(f, "Source directory not found: {}", path),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Process exit code for this error.
    ///
    /// * `2` - source directory missing
    /// * `3` - database unreachable or a fatal store failure
    /// * `1` - anything else
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::SourceNotFound(_) => 2,
            AppError::DatabaseError(_) | AppError::StoreError(_) => 3,
            AppError::WithContext { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StoreError(err)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}

/// Typed persistence error, produced by the store implementations.
///
/// The engine never inspects error text itself: it asks the error for its
/// [`FailureKind`] and whether the run can continue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid date: {0}")]
    DateParse(String),
    #[error("store connection lost: {0}")]
    Connection(String),
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::Duplicate(_) => FailureKind::Duplicate,
            StoreError::Validation(_) => FailureKind::Validation,
            StoreError::DateParse(_) => FailureKind::DateParse,
            StoreError::Connection(_) | StoreError::Other(_) => FailureKind::Other,
        }
    }

    /// Fatal errors abort the run even when raised by a single row write.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    /// Builds an error from a message that carries no structured code.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match FailureKind::from_message(&message) {
            FailureKind::Duplicate => StoreError::Duplicate(message),
            FailureKind::Validation => StoreError::Validation(message),
            FailureKind::DateParse => StoreError::DateParse(message),
            FailureKind::Other => StoreError::Other(message),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    /// Maps Postgres SQLSTATE codes onto the failure taxonomy, falling back to
    /// message inspection for errors that carry no code.
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                match db.code().as_deref() {
                    Some("23505") => StoreError::Duplicate(message),
                    Some("23502") | Some("23503") | Some("23514") | Some("22001") => {
                        StoreError::Validation(message)
                    }
                    Some("22007") | Some("22008") => StoreError::DateParse(message),
                    Some(code) if code.starts_with("08") => StoreError::Connection(message),
                    _ => StoreError::from_message(message),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Connection(err.to_string()),
            _ => StoreError::from_message(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_error_tier() {
        assert_eq!(AppError::SourceNotFound("/nope".into()).exit_code(), 2);
        assert_eq!(
            AppError::StoreError(StoreError::Connection("reset".into())).exit_code(),
            3
        );
        assert_eq!(AppError::BadRequest("x".into()).exit_code(), 1);

        let wrapped: Result<(), AppError> = Err(AppError::SourceNotFound("/data".into()));
        let err = wrapped.context("Step 1: checking source").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().starts_with("Step 1: checking source"));
    }

    #[test]
    fn uncoded_messages_are_classified() {
        assert_eq!(
            StoreError::from_message("duplicate key value violates unique constraint").kind(),
            FailureKind::Duplicate
        );
        assert_eq!(
            StoreError::from_message("null value in column \"full_name\"").kind(),
            FailureKind::Validation
        );
        assert_eq!(
            StoreError::from_message("invalid input syntax for type date").kind(),
            FailureKind::DateParse
        );
        assert_eq!(StoreError::from_message("boom").kind(), FailureKind::Other);
    }

    #[test]
    fn constraint_errors_on_date_columns_are_validation() {
        assert_eq!(
            StoreError::from_message("null value in column \"updated_at\" violates not-null constraint").kind(),
            FailureKind::Validation
        );
        assert_eq!(
            StoreError::from_message("new row violates check constraint \"birth_date_range\"").kind(),
            FailureKind::Validation
        );
        assert_eq!(
            StoreError::from_message("date/time field value out of range").kind(),
            FailureKind::DateParse
        );
    }

    #[test]
    fn pool_errors_are_fatal() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_fatal());
        assert!(!StoreError::Duplicate("x".into()).is_fatal());
    }
}
