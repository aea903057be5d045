//! Custom error types for the personality.
//!
//! This module defines the primary error type, `PersonalityError`, shared by the header
//! assembly path, the command dispatcher and the query server. Using the `thiserror`
//! crate, it gives every failure a stable variant so callers can decide which ones are
//! fatal and which are absorbed at a request boundary.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Definition`**: malformed or missing configuration. Fatal at
//!   initialization; no partially loaded header-definition table is ever usable.
//! - **`MissingStatusKey`**: an alias required by a header field is absent from its
//!   status dictionary. Local to one field; the builder either aborts or substitutes
//!   according to its `MissingKeyPolicy`.
//! - **`UnknownCommand`**: the dispatcher has no operation registered under a name.
//! - **`AmbiguousParameters`**: mutually exclusive command parameters were supplied.
//! - **`InvalidRequest`** / **`InvalidArgument`**: malformed request text or arguments.
//! - **`Orchestrator`**: failures reported by the external orchestration layer.
//! - **`Io`**: wraps `std::io::Error`, covering sockets and definition files.
//!
//! Per-request failures are caught at the query server and dispatcher boundary and
//! turned into a response or a logged no-op; they never stop a background task.

use thiserror::Error;

/// Convenience alias for results using the personality error type.
pub type AppResult<T> = std::result::Result<T, PersonalityError>;

#[derive(Error, Debug)]
pub enum PersonalityError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Header definition error in {source_name}: {message}")]
    Definition {
        source_name: String,
        message: String,
    },

    #[error("Status key '{0}' missing from status dictionary")]
    MissingStatusKey(String),

    #[error("No such command in subsystem: {0}")]
    UnknownCommand(String),

    #[error("Ambiguous parameters: {0}")]
    AmbiguousParameters(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("External command failed: {0}")]
    ExternalCommand(String),

    #[error("Background task '{0}' did not stop cleanly")]
    TaskStop(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<PersonalityError>),
}

impl PersonalityError {
    pub(crate) fn definition(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Definition {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that must stop initialization rather than a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Configuration(_) | Self::Definition { .. }
        )
    }
}
