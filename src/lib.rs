// ============================================================================
// Order Stream
// ============================================================================
//
// Ingests orders from a Kafka topic, validates them, persists each order
// atomically in PostgreSQL and serves lookups from an in-memory cache that
// is rebuilt from storage on startup.
//
//   Kafka --> OrderConsumer --> OrderService --> PgOrderRepository
//                                     |
//                                     +--------> OrderCache <-- HTTP /order
//
// ============================================================================

pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod health;
pub mod http;
pub mod messaging;
pub mod metrics;
pub mod service;
pub mod utils;
