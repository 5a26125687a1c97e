//! Error types for chance-constrained packing.
//!
//! Instance problems (`MalformedInstance`, `InfeasibleItem`, `NumericDomain`) are fatal
//! for the instance at hand. Solver problems (`SolverUnavailable`, `SolveFailed`) mean
//! the instance stays unsolved; they are never treated as infeasibility.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum ChancePackError {
    #[error("Malformed instance: {0}")]
    MalformedInstance(String),

    #[error(
        "Item {index} cannot be packed alone: load {load} exceeds capacity {capacity}"
    )]
    InfeasibleItem {
        index: usize,
        load: f64,
        capacity: f64,
    },

    #[error("Numeric domain error: {0}")]
    NumericDomain(String),

    #[error("Exact solver unavailable: {0}")]
    SolverUnavailable(String),

    #[error("Solve failed: {0}")]
    SolveFailed(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChancePackError {
    /// Wraps an IO error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context: path.into().display().to_string(),
            source,
        }
    }

    /// Whether the error leaves the instance unsolved rather than invalid.
    pub fn is_unsolved(&self) -> bool {
        matches!(self, Self::SolverUnavailable(_) | Self::SolveFailed(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChancePackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_errors_are_unsolved_not_invalid() {
        assert!(ChancePackError::SolveFailed("no incumbent".into()).is_unsolved());
        assert!(ChancePackError::SolverUnavailable("missing".into()).is_unsolved());
        assert!(!ChancePackError::MalformedInstance("x".into()).is_unsolved());
    }

    #[test]
    fn infeasible_item_message_names_index() {
        let err = ChancePackError::InfeasibleItem {
            index: 3,
            load: 12.5,
            capacity: 10.0,
        };
        assert!(err.to_string().contains("Item 3"));
    }
}
