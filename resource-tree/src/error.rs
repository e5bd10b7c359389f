//! Error types for the resource tree

use thiserror::Error;

/// Errors raised while building or mutating a resource tree
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A sibling with the same name already exists
    #[error("resource '{parent}' already has a child named '{name}'")]
    DuplicateChild { parent: String, name: String },

    /// Names must be non-empty and must not contain the path separator
    #[error("invalid resource name '{0}'")]
    InvalidName(String),

    /// The node is being notified on this thread; updating it again would recurse
    #[error("re-entrant update of '{0}' while its observers are running")]
    Reentrant(String),

    /// No node exists at the given canonical name
    #[error("no resource at '{0}'")]
    NotFound(String),
}

/// Result type for resource tree operations
pub type Result<T> = std::result::Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResourceError::DuplicateChild {
            parent: "mgmt".to_string(),
            name: "firmware".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "resource 'mgmt' already has a child named 'firmware'"
        );

        let err = ResourceError::Reentrant("mgmt.firmware.state".to_string());
        assert!(err.to_string().contains("mgmt.firmware.state"));
    }
}
