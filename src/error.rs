//! Error types for the provisioning registry
//!
//! Every failure is reported to the caller. The registry never retries on its
//! own; [`Error::is_retryable`] tells an external caller whether re-reading the
//! entity and trying again can succeed.

use crate::entity::EntityType;
use thiserror::Error;

/// Unified error type for the registry
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("{entity_type} not found: {key}")]
    NotFound { entity_type: EntityType, key: String },

    #[error("Detail not found on {uuid}: {name}={value}")]
    DetailNotFound {
        uuid: String,
        name: String,
        value: String,
    },

    // =========================================================================
    // Registration Errors
    // =========================================================================
    #[error("{entity_type} already exists: {key}")]
    Duplicate { entity_type: EntityType, key: String },

    #[error("Invalid parent reference {parent_type}/{parent}: {reason}")]
    Reference {
        parent_type: EntityType,
        parent: String,
        reason: String,
    },

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("{entity_type} {uuid} still has {count} live {child_type} dependents")]
    HasDependents {
        entity_type: EntityType,
        uuid: String,
        child_type: EntityType,
        count: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("Invalid {entity_type} transition from {from} to {to}")]
    InvalidTransition {
        entity_type: EntityType,
        from: String,
        to: String,
    },

    #[error("Unknown {entity_type} state: {state}")]
    UnknownState { entity_type: EntityType, state: String },

    #[error("{entity_type} {uuid} is retired")]
    Retired { entity_type: EntityType, uuid: String },

    #[error("Concurrent modification of {entity_type} {uuid}: expected {expected}, found {actual}")]
    ConcurrentModification {
        entity_type: EntityType,
        uuid: String,
        expected: String,
        actual: String,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced entity or detail absent
    NotFound,
    /// Uniqueness violation on register
    Duplicate,
    /// Parent reference missing or retired
    Reference,
    /// Overlapping ranges or live dependents
    Conflict,
    /// State edge not permitted
    InvalidTransition,
    /// Losing side of a compare-and-swap
    ConcurrentModification,
    /// Malformed request
    Validation,
    /// Configuration or IO failure outside the registry core
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Duplicate => write!(f, "duplicate"),
            ErrorKind::Reference => write!(f, "reference"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::InvalidTransition => write!(f, "invalid_transition"),
            ErrorKind::ConcurrentModification => write!(f, "concurrent_modification"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } | Error::DetailNotFound { .. } => ErrorKind::NotFound,
            Error::Duplicate { .. } => ErrorKind::Duplicate,
            Error::Reference { .. } => ErrorKind::Reference,
            Error::Conflict(_) | Error::HasDependents { .. } => ErrorKind::Conflict,
            // Mutating a retired entity is an edge out of a terminal state
            Error::InvalidTransition { .. }
            | Error::UnknownState { .. }
            | Error::Retired { .. } => ErrorKind::InvalidTransition,
            Error::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Error::InvalidArgument(_) => ErrorKind::Validation,
            Error::Configuration(_)
            | Error::YamlParse(_)
            | Error::JsonParse(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if a caller may succeed by re-reading and retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConcurrentModification)
    }
}

/// Result type alias for the registry
pub type Result<T> = std::result::Result<T, Error>;
