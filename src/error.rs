use thiserror::Error;

/// Failure reported by the relational engine or the connection pool.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A connection could not be checked out of the pool in time.
    #[error("connection pool: {0}")]
    Pool(String),
    /// A statement violated a unique constraint.
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    /// Any other error reported by the database server or driver.
    #[error("{0}")]
    Database(String),
    /// A result row could not be decoded into the expected shape.
    #[error("could not decode result row: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Decode(error.to_string())
    }
}

/// Errors surfaced by every public operation.
///
/// The first four variants are caller mistakes or policy outcomes; only
/// [`Error::Execution`] carries an engine failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed request fields.
    #[error("{0}")]
    Validation(String),
    /// No matching row, table, or policy.
    #[error("{0}")]
    NotFound(String),
    /// Duplicate policy name on the same table.
    #[error("{0}")]
    Conflict(String),
    /// Rejected by the write-policy gate.
    #[error("{0}")]
    AccessDenied(String),
    /// Engine-reported failure, wrapped with the operation that hit it.
    #[error("{context}: {source}")]
    Execution {
        /// What the crate was doing when the engine failed.
        context: String,
        /// The underlying engine failure.
        #[source]
        source: EngineError,
    },
}

impl Error {
    /// Wrap an engine failure with operation context.
    pub fn execution(context: impl Into<String>, source: EngineError) -> Self {
        Error::Execution {
            context: context.into(),
            source,
        }
    }

    /// `true` for errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Error::Execution { .. })
    }
}

impl From<EngineError> for Error {
    fn from(source: EngineError) -> Self {
        Error::execution("transaction", source)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Attach operation context to engine results.
pub(crate) trait EngineResultExt<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> EngineResultExt<T> for std::result::Result<T, EngineError> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| Error::execution(context(), source))
    }
}
