use std::fmt;
use thiserror::Error;

/// Structural errors in a form definition. These abort construction:
/// a malformed definition is a programming error, not user input.
///
/// `Display`/`Error` are hand-written rather than derived via `thiserror`
/// because the `UnknownField` variant carries a plain field-id named
/// `source`, which `thiserror` would otherwise treat as an underlying
/// `std::error::Error` source. These are leaf errors with no source.
#[derive(Debug)]
pub enum BuildError {
    DuplicateField(String),
    UnknownField { source: String, target: String },
    CyclicEvents { path: Vec<String> },
    InvalidSpec(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::DuplicateField(id) => write!(f, "duplicate field id '{id}'"),
            BuildError::UnknownField { source, target } => {
                write!(f, "binding on '{target}' references unknown field '{source}'")
            }
            BuildError::CyclicEvents { path } => {
                write!(f, "event cycle through fields: {}", path.join(" -> "))
            }
            BuildError::InvalidSpec(msg) => write!(f, "invalid form definition: {msg}"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Runtime misuse of a built form.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown field '{0}'")]
    NotFound(String),
    #[error("event cascade revisited '{field}' within one publish cycle")]
    CyclicEvent { field: String },
    #[error("field '{field}' has no tree node '{node}'")]
    UnknownNode { field: String, node: String },
}
