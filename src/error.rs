//! The error taxonomy. Kept deliberately small: misuse of the Blueprint
//! protocol, a missing context key, and resource release failures.

use thiserror::Error;

/// Errors surfaced across the crate's public API.
#[derive(Debug, Error, Clone)]
pub enum ReactiveError {
    /// `use`, `provide`, or `consume` was attempted outside a running
    /// Blueprint body.
    #[error("use/provide/consume called outside of a running blueprint body")]
    NotInBlueprint,

    /// A context key was consumed without ever having been provided by an
    /// enclosing scope.
    #[error("no value provided for context key `{0}`")]
    MissingContext(String),

    /// An async effect maker failed. Never returned to a caller; only ever
    /// logged and recorded for tests that opt into `FailurePolicy::Propagate`.
    #[error("effect maker failed: {0}")]
    EffectFailed(String),

    /// Wraps a failure that occurred while releasing a [`crate::Resource`].
    #[error(transparent)]
    Release(#[from] ReleaseError),
}

/// Failure releasing one or more [`crate::Resource`]s.
#[derive(Debug, Error, Clone)]
pub enum ReleaseError {
    /// Exactly one underlying release failed.
    #[error("{0}")]
    Single(Box<ReactiveError>),

    /// More than one underlying release failed; all are retained.
    #[error("{} release errors occurred", .0.len())]
    Aggregate(Vec<ReactiveError>),
}

impl ReleaseError {
    /// Build a `ReleaseError` from a list of failures collected out of a
    /// `parallel` or `sequential` composition. Panics if `errors` is empty —
    /// callers are expected to check for that case themselves, since "no
    /// errors" isn't a release failure at all.
    pub(crate) fn from_many(mut errors: Vec<ReactiveError>) -> ReleaseError {
        if errors.len() == 1 {
            ReleaseError::Single(Box::new(errors.pop().unwrap()))
        } else {
            ReleaseError::Aggregate(errors)
        }
    }
}
