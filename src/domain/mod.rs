// ============================================================================
// Domain Layer
// ============================================================================
//
// Order aggregate, its validation rules and the pipeline error taxonomy.
//
// ============================================================================

pub mod order;
