//! Lattice core: schema reflection, role-scoped GraphQL synthesis, query
//! planning and mutation execution over PostgreSQL.
//!
//! The binary in `main.rs` wires these pieces to an axum server; everything
//! else lives here so integration tests can drive the layers directly.

pub mod cache;
pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod fetch;
pub mod graphql;
pub mod meta;
pub mod mutate;
pub mod schema_registry;
pub mod sql;
