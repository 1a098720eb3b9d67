//! Error types for tally storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (pool, allocation, ...).
        entity: &'static str,
        /// The missing id.
        id: String,
    },

    /// The active allocation cannot cover the requested deduction.
    #[error("insufficient credits: remaining={remaining_milli}, required={required_milli}")]
    InsufficientCredits {
        /// Remaining budget in milli-credits.
        remaining_milli: i64,
        /// Requested amount in milli-credits.
        required_milli: i64,
    },

    /// The pool has too few unallocated credits for the requested allocation.
    /// Distinct from `InsufficientCredits`: this is an admin-time error.
    #[error("pool exhausted: available={available_milli}, requested={requested_milli}")]
    PoolExhausted {
        /// Unallocated credits in milli-credits.
        available_milli: i64,
        /// Requested allocation in milli-credits.
        requested_milli: i64,
    },

    /// The active allocation has expired.
    #[error("allocation expired for principal {principal_id} in pool {pool_id}")]
    AllocationExpired {
        /// The pool.
        pool_id: String,
        /// The principal.
        principal_id: String,
    },

    /// A negative amount was passed to a ledger mutation.
    #[error("invalid amount: {0} milli-credits")]
    InvalidAmount(i64),
}
