//! Error types for liftql.

use thiserror::Error;

/// The main error type for liftql operations.
#[derive(Debug, Error)]
pub enum LiftError {
    /// Failed to parse a pipeline string.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// A condition mapping or metadata entry was malformed.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// The operator tree references a relation that is not registered.
    #[error("Unknown relation: '{0}'")]
    UnknownRelation(String),

    /// A type filter targets a type the metadata cannot resolve.
    #[error("Cannot resolve type '{subtype}': {reason}")]
    Resolution { subtype: String, reason: String },

    /// A skip/take in the caller's tree has no order to truncate by.
    #[error("{operator} requires ordered input; add a sort below it")]
    UnorderedTruncation { operator: &'static str },

    /// The rewriter produced a tree that breaks its own invariants.
    #[error("Internal compiler error: {0}")]
    InvariantViolation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML decoding error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LiftError {
    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Create a type resolution error.
    pub fn resolution(subtype: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            subtype: subtype.into(),
            reason: reason.into(),
        }
    }

    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

/// Result type alias for liftql operations.
pub type LiftResult<T> = Result<T, LiftError>;
