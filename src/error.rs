//! Error types for schema compilation

use thiserror::Error;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema compilation errors
///
/// Resolution misses (unknown references, malformed pointers) are *not*
/// errors at the resolver level; they surface as `Ok(None)` so callers can
/// fall back, fetch and retry. `MissingRef` is raised only when a `$ref`
/// keyword is compiled and its target is still unknown.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema already registered: {id}")]
    AlreadyRegistered { id: String },

    #[error("duplicate embedded $id: {0}")]
    DuplicateId(String),

    #[error("can't resolve reference {reference}")]
    MissingRef { reference: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("schema compilation failed: {message}")]
    Compile {
        message: String,
        /// Partial emitted trace, kept when source retention is enabled
        emitted: Option<String>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    /// The unresolved reference, if this is a `MissingRef`
    ///
    /// An async loader collaborator uses this to fetch and register the
    /// missing schema before retrying the compile.
    pub fn missing_ref(&self) -> Option<&str> {
        match self {
            SchemaError::MissingRef { reference } => Some(reference),
            _ => None,
        }
    }
}
