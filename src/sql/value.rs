use serde_json::{Map, Value};

/// One tuple from any table: column name → dynamically typed value, in column
/// order.
pub type GenericRow = Map<String, Value>;

/// A bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// `boolean`.
    Bool(bool),
    /// `bigint`.
    Int(i64),
    /// `double precision`.
    Float(f64),
    /// `text`.
    Text(String),
    /// `jsonb`.
    Json(Value),
    /// Text of unknown type; PostgreSQL infers the parameter type from where
    /// it is used. `None` is `NULL`.
    Untyped(Option<String>),
}

impl SqlValue {
    /// Map a JSON value from a request body onto the closest bind type.
    ///
    /// Arrays and objects are bound as `jsonb`.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Int)
                .or_else(|| n.as_f64().map(SqlValue::Float))
                .unwrap_or_else(|| SqlValue::Text(n.to_string())),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    /// Map a JSON argument onto an [`SqlValue::Untyped`] value: strings keep
    /// their text, other scalars and documents use their JSON rendering.
    pub fn untyped_from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Untyped(None),
            Value::String(s) => SqlValue::Untyped(Some(s.clone())),
            other => SqlValue::Untyped(Some(other.to_string())),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        SqlValue::Json(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_keeps_scalar_types() {
        assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from_json(&json!(true)), SqlValue::Bool(true));
        assert_eq!(SqlValue::from_json(&json!(42)), SqlValue::Int(42));
        assert_eq!(SqlValue::from_json(&json!(1.5)), SqlValue::Float(1.5));
        assert_eq!(
            SqlValue::from_json(&json!("x")),
            SqlValue::Text("x".to_string())
        );
        assert_eq!(
            SqlValue::from_json(&json!(["a"])),
            SqlValue::Json(json!(["a"]))
        );
    }

    #[test]
    fn untyped_arguments_keep_their_text() {
        assert_eq!(SqlValue::untyped_from_json(&json!("1")), SqlValue::Untyped(Some("1".to_string())));
        assert_eq!(SqlValue::untyped_from_json(&json!(30)), SqlValue::Untyped(Some("30".to_string())));
        assert_eq!(SqlValue::untyped_from_json(&json!(false)), SqlValue::Untyped(Some("false".to_string())));
        assert_eq!(
            SqlValue::untyped_from_json(&json!({"k": 1})),
            SqlValue::Untyped(Some(r#"{"k":1}"#.to_string()))
        );
        assert_eq!(SqlValue::untyped_from_json(&json!(null)), SqlValue::Untyped(None));
    }
}
