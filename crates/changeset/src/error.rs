//! Error types for change detection

use std::path::PathBuf;
use thiserror::Error;

/// A revision range that cannot be diffed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    /// The reference does not resolve to a commit
    #[error("invalid revision reference: {reference}")]
    Invalid { reference: String },

    /// Both references exist but have no merge base
    #[error("{base} and {head} have no common history")]
    Unrelated { base: String, head: String },
}

/// Errors that can occur while detecting changes
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Configuration root is missing or not a directory
    #[error("configuration root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// Configuration root does not live inside the repository
    #[error("{} is not inside repository {}", .path.display(), .repo.display())]
    OutsideRepository { path: PathBuf, repo: PathBuf },

    /// A git invocation failed for a reason other than a bad reference
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    /// Changed-files list could not be read
    #[error("failed to read changed-files list {}: {source}", .path.display())]
    ChangedFilesList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for change detection
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_error_messages() {
        let err: Error = ReferenceError::Invalid {
            reference: "origin/nope".into(),
        }
        .into();
        assert_eq!(err.to_string(), "invalid revision reference: origin/nope");
        assert!(matches!(err, Error::Reference(ReferenceError::Invalid { .. })));

        let err = ReferenceError::Unrelated {
            base: "a1".into(),
            head: "b2".into(),
        };
        assert_eq!(err.to_string(), "a1 and b2 have no common history");
    }

    #[test]
    fn test_root_not_found_is_structural() {
        let err = Error::RootNotFound(PathBuf::from("/srv/infra/toronto"));
        assert!(err.to_string().contains("/srv/infra/toronto"));
    }
}
