use thiserror::Error;

/// Extended SQLite result codes share their low byte with the primary code.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` has already been filled")]
    BucketAlreadyFilled(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("bucket `{0}` has no values left")]
    BucketExhausted(String),
    #[error("bucket `{0}` is archived and read-only")]
    BucketArchived(String),
    #[error("no pairs match the specified filters")]
    NoMatchingPairs,
    #[error("database is busy")]
    Busy(#[source] sqlx::Error),
    #[error("{0} did not finish before its deadline")]
    DeadlineExceeded(&'static str),
    #[error("{operation} transaction failed: {cause} ({})", describe_rollback(.rollback))]
    TransactionFailure {
        operation: &'static str,
        #[source]
        cause: Box<ServiceError>,
        rollback: Option<sqlx::Error>,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Classify a raw storage error, separating lock contention from other failures.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            ServiceError::Busy(err)
        } else {
            ServiceError::Sqlx(err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::BucketNotFound(_))
    }
}

fn describe_rollback(rollback: &Option<sqlx::Error>) -> String {
    match rollback {
        None => "rolled back".to_string(),
        Some(err) => format!("rollback failed: {}", err),
    }
}

/// Return true if the error means another connection holds the lock.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
                || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_counts_as_busy() {
        assert!(matches!(
            ServiceError::from_sqlx(sqlx::Error::PoolTimedOut),
            ServiceError::Busy(_)
        ));
        assert!(matches!(
            ServiceError::from_sqlx(sqlx::Error::RowNotFound),
            ServiceError::Sqlx(_)
        ));
    }

    #[test]
    fn transaction_failure_reports_rollback_outcome() {
        let err = ServiceError::TransactionFailure {
            operation: "pop_bucket_value",
            cause: Box::new(ServiceError::Sqlx(sqlx::Error::RowNotFound)),
            rollback: None,
        };
        let message = err.to_string();
        assert!(message.starts_with("pop_bucket_value transaction failed"));
        assert!(message.ends_with("(rolled back)"));

        let err = ServiceError::TransactionFailure {
            operation: "fill_bucket",
            cause: Box::new(ServiceError::NoMatchingPairs),
            rollback: Some(sqlx::Error::PoolClosed),
        };
        assert!(err.to_string().contains("rollback failed"));
    }
}
