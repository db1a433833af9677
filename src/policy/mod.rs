/// `CREATE POLICY`, `DROP POLICY` and definition validation.
pub mod ddl;
/// Transactional policy lifecycle.
pub mod manager;
/// Policy records, requests and actions.
pub mod model;
