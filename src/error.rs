//! Error taxonomy shared by every pipeline component.
//!
//! Component-local failures (one unreadable file, one sentence the scorer
//! could not handle, one metric the evaluator left blank) are absorbed and
//! logged where they happen. Only request-level failures travel up as a
//! [`PipelineError`], and the HTTP boundary turns them into
//! `{"error": {"code", "message"}}` using [`PipelineError::code`].
//!
//! Query functions that may legitimately find nothing return [`Lookup`]
//! instead of raising, so "no interactions in this window" is a value the
//! caller matches on rather than an error it has to catch.

use thiserror::Error;

/// Typed failure kinds raised by the core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Malformed caller input. Never retried.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// The requested target set is empty (no documents, no interactions).
    #[error("{0}")]
    NotFound(String),

    /// An external collaborator (embedder, scorer, generator, evaluator) failed.
    #[error("{component} failed: {message}")]
    Dependency {
        component: &'static str,
        message: String,
    },

    /// A persisted record could not be decoded.
    #[error("corrupt record: {0}")]
    DataIntegrity(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        PipelineError::NotFound(message.into())
    }

    pub fn dependency(component: &'static str, message: impl std::fmt::Display) -> Self {
        PipelineError::Dependency {
            component,
            message: message.to_string(),
        }
    }

    /// Machine-readable error code used in structured responses.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } => "validation_error",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Dependency { .. } => "dependency_error",
            PipelineError::DataIntegrity(_) => "data_integrity_error",
            PipelineError::Storage(_) => "storage_error",
            PipelineError::Internal(_) => "internal",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Outcome of a query that may legitimately match nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    Empty,
}

impl<T> Lookup<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Lookup::Empty)
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Empty => None,
        }
    }

    /// Escalate an empty result into a [`PipelineError::NotFound`].
    ///
    /// Used at request boundaries where an empty target set means the
    /// whole operation cannot proceed.
    pub fn or_not_found(self, message: impl Into<String>) -> Result<T> {
        match self {
            Lookup::Found(value) => Ok(value),
            Lookup::Empty => Err(PipelineError::not_found(message)),
        }
    }
}

impl<T> Lookup<Vec<T>> {
    pub fn from_vec(items: Vec<T>) -> Self {
        if items.is_empty() {
            Lookup::Empty
        } else {
            Lookup::Found(items)
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Lookup::Found(v),
            None => Lookup::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            PipelineError::validation("limit", "too big").code(),
            "validation_error"
        );
        assert_eq!(PipelineError::not_found("x").code(), "not_found");
        assert_eq!(
            PipelineError::dependency("embedder", "timeout").code(),
            "dependency_error"
        );
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = PipelineError::validation("question", "must be at least 3 characters");
        assert_eq!(
            err.to_string(),
            "invalid question: must be at least 3 characters"
        );
    }

    #[test]
    fn test_lookup_from_vec() {
        assert!(Lookup::<Vec<i32>>::from_vec(vec![]).is_empty());
        assert_eq!(Lookup::from_vec(vec![1, 2]).found(), Some(vec![1, 2]));
    }

    #[test]
    fn test_lookup_or_not_found() {
        let empty: Lookup<u8> = Lookup::Empty;
        let err = empty.or_not_found("nothing here").unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert_eq!(Lookup::Found(3).or_not_found("x").unwrap(), 3);
    }
}
