//! Reactive form-field engine: a typed field registry, an init/change
//! event bus, remote data loading with last-writer-wins supersession,
//! and submit-time validation over visible fields, driven by
//! declarative form definitions against a JSON-envelope gateway.

pub mod context;
pub mod error;
pub mod events;
pub mod fields;
pub mod form;
pub mod forms;
pub mod model;
pub mod services;
pub mod validate;

pub use context::RunContext;
pub use error::{BuildError, EngineError};
pub use fields::{FieldData, FieldState, FieldValue, OptionItem};
pub use form::{Effect, Form, FormBuilder, Notice, SubmitOutcome};
