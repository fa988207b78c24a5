use async_trait::async_trait;

use crate::domain::order::Order;
use crate::utils::IsTransient;

// ============================================================================
// Order Repository
// ============================================================================
//
// Storage seam for the order aggregate. An order is written once, as a whole,
// inside one transaction; there is no update or delete.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// order_uid or track_number already taken
    #[error("Duplicate order: {0}")]
    Conflict(String),

    /// Check, foreign key or not-null constraint rejected a row
    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl IsTransient for RepositoryError {
    fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &err {
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation => RepositoryError::Conflict(db.message().to_string()),
                ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => {
                    RepositoryError::Constraint(db.message().to_string())
                }
                _ => RepositoryError::Database(db.message().to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => RepositoryError::Unavailable(err.to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist delivery, payment, order and items atomically
    async fn save(&self, order: &Order) -> Result<(), RepositoryError>;

    /// `Ok(None)` when no order has this identifier
    async fn get_by_id(&self, order_uid: &str) -> Result<Option<Order>, RepositoryError>;

    /// Every persisted order; one follow-up item query per order.
    /// Only meant for cache rehydration at startup.
    async fn get_all(&self) -> Result<Vec<Order>, RepositoryError>;

    /// Number of rows in the orders table
    async fn count(&self) -> Result<i64, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}
