//! Error types for the ab-core crate.
//!
//! This module provides the [`ConfigError`] type for configuration-related errors
//! that can occur across the workspace. A configuration error is fatal to the
//! setup of the project it concerns and never to its siblings.

use camino::Utf8PathBuf;

/// Errors that can occur during configuration loading and validation.
///
/// This error type covers all configuration-related failures including
/// path validation, missing directories, malformed declarations and
/// parsing errors.
///
/// # Examples
///
/// ```
/// use ab_core::ConfigError;
/// use camino::Utf8PathBuf;
///
/// let error = ConfigError::MissingDirectory(Utf8PathBuf::from("/some/path"));
/// assert!(error.to_string().contains("/some/path"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The provided path is invalid or malformed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The invalid path.
        path: Utf8PathBuf,
        /// Explanation of why the path is invalid.
        reason: String,
    },

    /// A required directory does not exist.
    #[error("missing required directory: {0}")]
    MissingDirectory(Utf8PathBuf),

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// A project declaration is malformed.
    #[error("invalid project '{project}': {reason}")]
    InvalidProject {
        /// The declared project name (may be empty).
        project: String,
        /// Explanation of what is wrong with the declaration.
        reason: String,
    },

    /// Two declarations share the same project name.
    #[error("project '{0}' is declared more than once")]
    DuplicateProject(String),

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidProject`] error.
    #[inline]
    pub fn invalid_project(project: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProject {
            project: project.into(),
            reason: reason.into(),
        }
    }

    /// Returns the project name this error concerns, if any.
    #[must_use]
    pub fn project(&self) -> Option<&str> {
        match self {
            Self::InvalidProject { project, .. } | Self::DuplicateProject(project) => {
                Some(project)
            }
            Self::InvalidPath { .. }
            | Self::MissingDirectory(_)
            | Self::InvalidOption { .. }
            | Self::Io(_)
            | Self::Parse(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_display() {
        let error = ConfigError::InvalidPath {
            path: Utf8PathBuf::from("/invalid/path"),
            reason: "path contains invalid characters".to_owned(),
        };
        let msg = error.to_string();
        assert!(msg.contains("/invalid/path"));
        assert!(msg.contains("invalid characters"));
    }

    #[test]
    fn test_missing_directory_display() {
        let error = ConfigError::MissingDirectory(Utf8PathBuf::from("/missing/dir"));
        assert!(error.to_string().contains("/missing/dir"));
    }

    #[test]
    fn test_invalid_option_display() {
        let error = ConfigError::InvalidOption {
            option: "quiet_period_ms".to_owned(),
            reason: "must be positive".to_owned(),
        };
        let msg = error.to_string();
        assert!(msg.contains("quiet_period_ms"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_invalid_project_carries_name() {
        let error = ConfigError::invalid_project("api", "main must be relative");
        assert_eq!(error.project(), Some("api"));
        assert_eq!(
            error.to_string(),
            "invalid project 'api': main must be relative"
        );
    }

    #[test]
    fn test_duplicate_project_display() {
        let error = ConfigError::DuplicateProject("web".to_owned());
        assert_eq!(error.project(), Some("web"));
        assert!(error.to_string().contains("more than once"));
    }
}
