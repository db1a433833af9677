/// Embedded schema migrations and their runner.
pub mod migrations;
/// PostgreSQL implementation backed by diesel and r2d2.
pub mod postgres;
/// Session and engine traits the rest of the crate is written against.
pub mod session;
