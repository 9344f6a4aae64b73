//! Error types for the ab-watcher crate.

use camino::Utf8PathBuf;

/// Errors that can occur while setting up or running a change detector.
///
/// # Error Recovery Strategy
///
/// - **Notify errors** ([`WatchError::Notify`]): Fatal - the detector cannot start
/// - **Path not found** ([`WatchError::PathNotFound`]): Fatal - the target must exist
/// - **Walk errors** ([`WatchError::Walk`]): Fatal - the directory snapshot is incomplete
/// - **Channel closed** ([`WatchError::ChannelClosed`]): Fatal - the accumulator is gone
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): Recoverable - the event is skipped
/// - **I/O errors** ([`WatchError::Io`]): Fatal - propagate immediately
///
/// # Examples
///
/// ```
/// use ab_watcher::WatchError;
///
/// let err = WatchError::path_not_found("/srv/api/src");
/// assert!(err.is_fatal());
/// assert_eq!(err.to_string(), "path does not exist: /srv/api/src");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize the notify watcher or register a directory.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The watch target does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// Failed to enumerate the directories of the watched tree.
    #[error("directory walk error: {0}")]
    Walk(#[from] ignore::Error),

    /// The accumulator task stopped unexpectedly.
    #[error("event channel closed unexpectedly")]
    ChannelClosed,

    /// A path is not valid UTF-8.
    ///
    /// Events for such paths are logged and dropped.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An I/O error occurred while resolving the target.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Returns `true` if watching can continue after this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NonUtf8Path(_))
    }

    /// Returns `true` if this error is fatal (watching should stop).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path) => Some(path),
            Self::Notify(_)
            | Self::Walk(_)
            | Self::ChannelClosed
            | Self::NonUtf8Path(_)
            | Self::Io(_) => None,
        }
    }
}
