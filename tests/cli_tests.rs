use std::process::{Command, Output};

fn rowgate(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rowgate"))
        .args(args)
        .env_remove("DATABASE_URL")
        .env_remove("RUST_LOG")
        .output()
        .expect("should run rowgate binary")
}

#[test]
fn help_lists_row_and_policy_commands() {
    let output = rowgate(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["rows", "insert", "sql", "policies", "migrate"] {
        assert!(stdout.contains(command), "missing {command} in:\n{stdout}");
    }
}

#[test]
fn policy_create_requires_its_fields() {
    let output = rowgate(&["policies", "create", "--name", "p1", "--table", "orders"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--action"), "stderr:\n{stderr}");
}

#[test]
fn malformed_row_parameters_are_usage_errors() {
    let output = rowgate(&["rows", "users", "--param", "active"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("expected KEY=VALUE"), "stderr:\n{stderr}");
}

#[test]
fn policy_ids_must_be_uuids() {
    let output = rowgate(&["policies", "get", "not-a-uuid"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unreachable_database_exits_with_failure() {
    let output = rowgate(&[
        "--db-host",
        "127.0.0.1",
        "--db-port",
        "1",
        "--db-checkout-timeout",
        "1",
        "tables",
    ]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error connecting to database"), "stderr:\n{stderr}");
}
