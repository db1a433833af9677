#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use rowgate::config::QueryConfig;
use rowgate::engine::session::{Engine, Session};
use rowgate::error::EngineError;
use rowgate::sql::statement::Statement;
use rowgate::sql::value::{GenericRow, SqlValue};
use rowgate::Context;

pub(crate) const POLICY_ID: &str = "6f1c2a9e-8d4b-4c1e-9a63-2f0b7d5e4c11";

/// What a scripted session saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Begin,
    Commit,
    Rollback,
    Query(String, Vec<SqlValue>),
    Execute(String, Vec<SqlValue>),
    Batch(String),
}

impl Event {
    pub(crate) fn sql(&self) -> Option<&str> {
        match self {
            Event::Query(sql, _) | Event::Execute(sql, _) | Event::Batch(sql) => Some(sql),
            _ => None,
        }
    }
}

/// Scripted answer to one statement.
pub(crate) enum Reply {
    Rows(Vec<GenericRow>),
    Affected(u64),
    Fail(EngineError),
}

type Responder = dyn Fn(&Statement) -> Reply + Send + Sync;

/// Engine whose sessions answer from a closure and record every call.
#[derive(Clone)]
pub(crate) struct ScriptedEngine {
    log: Arc<Mutex<Vec<Event>>>,
    responder: Arc<Responder>,
}

impl ScriptedEngine {
    pub(crate) fn new(responder: impl Fn(&Statement) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    /// SQL text of every statement, transaction events excluded.
    pub(crate) fn statements(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(Event::sql)
            .map(str::to_string)
            .collect()
    }

    /// Position of the first statement containing `needle`.
    pub(crate) fn position(&self, needle: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|event| event.sql().is_some_and(|sql| sql.contains(needle)))
    }
}

impl Engine for ScriptedEngine {
    type Session = ScriptedSession;

    fn session(&self) -> Result<Self::Session, EngineError> {
        Ok(ScriptedSession {
            log: Arc::clone(&self.log),
            responder: Arc::clone(&self.responder),
        })
    }
}

pub(crate) struct ScriptedSession {
    log: Arc<Mutex<Vec<Event>>>,
    responder: Arc<Responder>,
}

impl ScriptedSession {
    fn record(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }
}

impl Session for ScriptedSession {
    fn execute(&mut self, statement: &Statement) -> Result<u64, EngineError> {
        self.record(Event::Execute(
            statement.sql().to_string(),
            statement.args().to_vec(),
        ));
        match (self.responder)(statement) {
            Reply::Rows(rows) => Ok(rows.len() as u64),
            Reply::Affected(count) => Ok(count),
            Reply::Fail(error) => Err(error),
        }
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<GenericRow>, EngineError> {
        self.record(Event::Query(
            statement.sql().to_string(),
            statement.args().to_vec(),
        ));
        match (self.responder)(statement) {
            Reply::Rows(rows) => Ok(rows),
            Reply::Affected(_) => Ok(Vec::new()),
            Reply::Fail(error) => Err(error),
        }
    }

    fn batch_execute(&mut self, sql: &str) -> Result<(), EngineError> {
        self.record(Event::Batch(sql.to_string()));
        Ok(())
    }

    fn begin(&mut self) -> Result<(), EngineError> {
        self.record(Event::Begin);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), EngineError> {
        self.record(Event::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), EngineError> {
        self.record(Event::Rollback);
        Ok(())
    }
}

pub(crate) fn context(engine: &ScriptedEngine) -> Context<ScriptedEngine> {
    Context::new(engine.clone(), QueryConfig::default())
}

pub(crate) fn row(value: Value) -> GenericRow {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub(crate) fn rows(values: impl IntoIterator<Item = Value>) -> Reply {
    Reply::Rows(values.into_iter().map(row).collect())
}

/// Catalog answers for a schema with the given tables, each keyed by `id`.
pub(crate) fn catalog_reply(statement: &Statement, tables: &[&str]) -> Option<Reply> {
    let sql = statement.sql();
    if sql.starts_with("SELECT EXISTS (SELECT 1 FROM information_schema.tables") {
        let present = statement
            .args()
            .iter()
            .any(|arg| matches!(arg, SqlValue::Text(name) if tables.contains(&name.as_str())));
        return Some(rows([json!({ "present": present })]));
    }
    if sql.contains("i.indisprimary") {
        return Some(rows([json!({ "column_name": "id" })]));
    }
    None
}

pub(crate) fn policy_row(name: &str, table: &str, action: &str, roles: &[&str], definition: &str) -> Value {
    json!({
        "id": POLICY_ID,
        "name": name,
        "table_name": table,
        "action": action,
        "roles": roles,
        "definition": definition,
        "description": null,
        "created_at": "2026-01-05T10:00:00+00:00",
        "updated_at": "2026-01-05T10:00:00+00:00"
    })
}
