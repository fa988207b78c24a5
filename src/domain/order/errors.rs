use super::validation::ValidationErrors;
use crate::db::RepositoryError;
use crate::utils::IsTransient;

// ============================================================================
// Order Pipeline Errors
// ============================================================================
//
// A read miss is not an error: lookups return `Ok(None)`.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order failed validation: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Order persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

impl OrderError {
    pub fn is_validation(&self) -> bool {
        matches!(self, OrderError::Validation(_))
    }
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            OrderError::Validation(_) => false,
            OrderError::Persistence(e) => e.is_transient(),
        }
    }
}
