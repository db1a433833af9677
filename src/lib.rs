//! Schema-agnostic row access and row-level-security policy lifecycle for `PostgreSQL`.
//!
//! Untyped request parameters become parameterized SQL against tables
//! discovered at runtime, and policy metadata is kept in step with the
//! `CREATE POLICY` objects `PostgreSQL` enforces.
#![warn(missing_docs)]

/// Ad-hoc SQL classification, write gate and execution.
pub mod adhoc;
/// Schema introspection.
pub mod catalog;
/// Command-line and environment configuration.
pub mod config;
/// Process-wide operation entry point.
pub mod context;
/// Session traits, the `PostgreSQL` engine and migrations.
pub mod engine;
/// Error types.
pub mod error;
/// Row-level-security policy records and lifecycle.
pub mod policy;
/// Request-parameter parsing and SQL translation.
pub mod query;
/// Generic row queries and mutations.
pub mod rows;
/// Identifier quoting, statement building and bind values.
pub mod sql;

pub use context::Context;
pub use error::{Error, Result};
