/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unknown account: {0}")]
    AccountNotFound(i64),

    #[error("Lease does not match the current assignment for account {0}")]
    LeaseConflict(i64),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
