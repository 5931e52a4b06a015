//! Storage-specific error type wrapping sqlx errors.

use mimic_domain::error::MimicError;

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<StorageError> for MimicError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_wrap_as_storage_error_when_converted() {
        let err: MimicError = StorageError::Database(sqlx::Error::RowNotFound).into();
        assert!(matches!(err, MimicError::Storage(_)));
        assert_eq!(err.to_string(), "storage error");
    }
}
