//! Error type shared by every wellsim component.
//!
//! Configuration problems are reported at construction or first use and are
//! never retried. Adversary contract breaks surface as
//! [`Error::InvariantViolation`]; callers must treat them as fatal.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed well id `{id}`: expected row letters followed by a 1-based column number")]
    MalformedWellId { id: String },

    #[error("duplicate well `{well}` in plate batch")]
    DuplicateWell { well: String },

    #[error("channel correlation matrix is not positive definite: {reason}")]
    NotPositiveDefinite { reason: String },

    #[error("invalid channel correlation matrix: {reason}")]
    InvalidCorrelation { reason: String },

    #[error("unknown adversary type `{name}` (valid: {})", valid.join(", "))]
    UnknownAdversary { name: String, valid: Vec<String> },

    #[error("invalid parameters for adversary `{kind}`: {reason}")]
    AdversaryParams { kind: String, reason: String },

    #[error("invalid measurement key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("ambiguous measurement key `{key}` (candidates: {})", candidates.join(", "))]
    AmbiguousKey { key: String, candidates: Vec<String> },

    #[error("measurement key `{key}` is not present in any well")]
    MissingKey { key: String },

    #[error("adversary `{adversary}` broke the batch contract: {detail}")]
    InvariantViolation { adversary: String, detail: String },

    #[error("batch shape mismatch: {detail}")]
    ShapeMismatch { detail: String },

    #[error("invalid configuration field `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_adversary_lists_valid_names() {
        let err = Error::UnknownAdversary {
            name: "Nope".to_string(),
            valid: vec!["EdgeEffect".to_string(), "SpatialGradient".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("`Nope`"));
        assert!(msg.contains("EdgeEffect, SpatialGradient"));
    }

    #[test]
    fn malformed_id_names_offending_string() {
        let err = Error::MalformedWellId { id: "Z0x".to_string() };
        assert!(err.to_string().contains("`Z0x`"));
    }
}
