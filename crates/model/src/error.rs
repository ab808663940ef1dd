//! Engine error types

use thiserror::Error;

/// Errors raised by a platform registry backend.
///
/// A failed match-class query is transient: the scanner logs it and continues
/// with the remaining classes rather than aborting the scan.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A registry match query failed
    #[error("registry query failed: {0}")]
    Query(String),

    /// The registry backend could not be opened at all
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// A notification subscription could not be registered
    #[error("subscription failed: {0}")]
    Subscription(String),
}

/// Errors raised by overlay store mutations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The mutation would violate a relation invariant (self-parenting,
    /// heritage cycle). Nothing was changed.
    #[error("invalid relation: {0}")]
    InvalidRelation(String),

    /// The in-memory relation was updated but writing it back failed.
    /// The caller may retry; re-issuing the same mutation is safe.
    #[error("failed to persist relation `{relation}`: {reason}")]
    Persist { relation: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::InvalidRelation("device cannot inherit from itself".into());
        assert!(format!("{}", err).contains("invalid relation"));

        let err = StoreError::Persist {
            relation: "renamed".into(),
            reason: "disk full".into(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("renamed"));
        assert!(msg.contains("disk full"));
    }
}
