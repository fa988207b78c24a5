pub mod postgres;
pub mod repository;

#[cfg(test)]
pub(crate) mod memory;

pub use postgres::PgOrderRepository;
pub use repository::{OrderRepository, RepositoryError};
