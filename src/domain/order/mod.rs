// ============================================================================
// Order Domain
// ============================================================================
//
// - model:      Order aggregate (Order, Delivery, Payment, Item)
// - validation: declarative constraint schema, itemized violations
// - errors:     OrderError taxonomy for the ingestion pipeline
//
// ============================================================================

pub mod errors;
pub mod model;
pub mod validation;

pub use errors::*;
pub use model::*;
pub use validation::{validate, Rule, ValidationErrors, Violation};

#[cfg(test)]
pub(crate) use model::fixtures;
