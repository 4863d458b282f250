use thiserror::Error;

/// Outcome of [`crate::transaction::run_in_transaction`] when it does not succeed.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] anyhow::Error),

    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] anyhow::Error),

    /// The unit of work failed. Its error is passed through untouched.
    #[error(transparent)]
    Work(anyhow::Error),
}

impl TransactionError {
    #[must_use]
    pub const fn is_begin(&self) -> bool {
        matches!(self, Self::Begin(_))
    }

    #[must_use]
    pub const fn is_commit(&self) -> bool {
        matches!(self, Self::Commit(_))
    }

    #[must_use]
    pub const fn is_work(&self) -> bool {
        matches!(self, Self::Work(_))
    }

    /// ## Summary
    /// Returns the unit-of-work error, or `self` if the failure came from the
    /// transaction itself.
    ///
    /// ## Errors
    /// Returns `self` unchanged for begin and commit failures.
    pub fn into_work_error(self) -> Result<anyhow::Error, Self> {
        match self {
            Self::Work(e) => Ok(e),
            other => Err(other),
        }
    }
}

pub type TxResult<T> = std::result::Result<T, TransactionError>;

/// Postgres adapter errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] diesel::result::Error),

    #[error("Pool error: {0}")]
    PoolError(#[from] diesel_async::pooled_connection::bb8::RunError),

    #[error("Transaction {0} already finished")]
    TransactionFinished(uuid::Uuid),

    #[error(transparent)]
    CoreError(#[from] txnest_core::error::CoreError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_commit_messages_name_the_operation() {
        let begin = TransactionError::Begin(anyhow::anyhow!("connection refused"));
        let commit = TransactionError::Commit(anyhow::anyhow!("serialization failure"));

        assert_eq!(begin.to_string(), "Failed to begin transaction: connection refused");
        assert_eq!(commit.to_string(), "Failed to commit transaction: serialization failure");
        assert!(begin.is_begin() && !begin.is_work());
        assert!(commit.is_commit() && !commit.is_begin());
    }

    #[test]
    fn test_work_error_is_transparent() {
        let err = TransactionError::Work(anyhow::anyhow!("row not found"));
        assert_eq!(err.to_string(), "row not found");
        assert!(err.into_work_error().is_ok_and(|e| e.to_string() == "row not found"));
    }

    #[test]
    fn test_into_work_error_keeps_transaction_failures() {
        let err = TransactionError::Commit(anyhow::anyhow!("disk full"));
        assert!(matches!(err.into_work_error(), Err(TransactionError::Commit(_))));
    }

    #[test]
    fn test_finished_transaction_message() {
        let id = uuid::Uuid::nil();
        let err = DbError::TransactionFinished(id);
        assert_eq!(err.to_string(), format!("Transaction {id} already finished"));
    }

    #[test]
    fn test_cancellation_maps_into_db_error() {
        let err = DbError::from(txnest_core::error::CoreError::Cancelled);
        assert_eq!(err.to_string(), "Context cancelled");
    }
}
