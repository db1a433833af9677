/// Read-only versus mutating classification.
pub mod classifier;
/// Gated execution and command tags.
pub mod executor;
/// Principals and the write-policy gate.
pub mod gate;
