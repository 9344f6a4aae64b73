//! Path filtering for raw change notifications.
//!
//! Filters run on the notify thread, before a notification is counted by the
//! accumulator. A path that does not pass never contributes to a rebuild
//! signal.
//!
//! # Examples
//!
//! ```
//! use ab_watcher::{FileFilter, TempFileFilter};
//! use camino::Utf8Path;
//!
//! let filter = TempFileFilter::default();
//!
//! assert!(filter.should_process(Utf8Path::new("src/main.go")));
//! assert!(!filter.should_process(Utf8Path::new("src/.main.go.swp")));
//! assert!(!filter.should_process(Utf8Path::new("src/main.go~")));
//! ```

use camino::Utf8Path;
use smallvec::SmallVec;

/// A filter for determining which changed paths count as changes.
///
/// # Thread Safety
///
/// Filters must be [`Send`] and [`Sync`] because they are called from the
/// notify thread. They must also be `'static` to be moved into its handler.
///
/// # Examples
///
/// ```
/// use ab_watcher::FileFilter;
/// use camino::Utf8Path;
///
/// struct GoSources;
///
/// impl FileFilter for GoSources {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         path.extension() == Some("go")
///     }
/// }
/// ```
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if a change to `path` should be counted.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts all paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// A filter that drops editor scratch files.
///
/// Saving a file in most editors touches a swap or backup file next to it;
/// those writes would otherwise count as source changes. A path is dropped
/// when its file name ends with one of the configured suffixes or starts
/// with `.#` (Emacs lock files).
///
/// # Examples
///
/// ```
/// use ab_watcher::{FileFilter, TempFileFilter};
/// use camino::Utf8Path;
///
/// let filter = TempFileFilter::new(["~", ".bak"]);
/// assert!(!filter.should_process(Utf8Path::new("main.go.bak")));
/// assert!(filter.should_process(Utf8Path::new("main.go")));
/// ```
#[derive(Debug, Clone)]
pub struct TempFileFilter {
    suffixes: SmallVec<[String; 4]>,
}

impl TempFileFilter {
    /// Creates a filter dropping file names ending with any of `suffixes`.
    #[must_use]
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }
}

impl Default for TempFileFilter {
    fn default() -> Self {
        Self::new(ab_core::WatchConfig::default().ignore_suffixes)
    }
}

impl FileFilter for TempFileFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        let Some(name) = path.file_name() else {
            return true;
        };
        if name.starts_with(".#") {
            return false;
        }
        !self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }
}

/// A filter that accepts one file name, in any directory.
///
/// Used to watch a single file through its parent directory, which keeps
/// working when an editor replaces the file instead of writing it in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameFilter {
    name: String,
}

impl FileNameFilter {
    /// Creates a filter accepting paths whose file name is `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl FileFilter for FileNameFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        path.file_name() == Some(self.name.as_str())
    }
}

/// A composite filter that combines multiple filters with AND logic.
///
/// # Examples
///
/// ```
/// use ab_watcher::{CompositeFilter, FileFilter, TempFileFilter};
/// use camino::Utf8Path;
///
/// struct NoVendor;
/// impl FileFilter for NoVendor {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         !path.as_str().contains("/vendor/")
///     }
/// }
///
/// let filter = CompositeFilter::new()
///     .and(TempFileFilter::default())
///     .and(NoVendor);
///
/// assert!(filter.should_process(Utf8Path::new("src/app/main.go")));
/// assert!(!filter.should_process(Utf8Path::new("src/vendor/lib/lib.go")));
/// ```
pub struct CompositeFilter {
    filters: Vec<Box<dyn FileFilter>>,
}

impl CompositeFilter {
    /// Creates a new empty composite filter, which accepts all paths.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Adds a filter to the composite.
    #[must_use]
    pub fn and<F: FileFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Default for CompositeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FileFilter for CompositeFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        self.filters.iter().all(|f| f.should_process(path))
    }
}

impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

impl<F: FileFilter + ?Sized> FileFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all_filter() {
        let filter = AcceptAllFilter;
        assert!(filter.should_process(Utf8Path::new("anything.txt")));
        assert!(filter.should_process(Utf8Path::new("")));
    }

    #[test]
    fn test_temp_file_filter_defaults() {
        let filter = TempFileFilter::default();

        assert!(filter.should_process(Utf8Path::new("src/main.go")));
        assert!(filter.should_process(Utf8Path::new("src/handlers/user.go")));

        assert!(!filter.should_process(Utf8Path::new("src/main.go~")));
        assert!(!filter.should_process(Utf8Path::new("src/.main.go.swp")));
        assert!(!filter.should_process(Utf8Path::new("src/.main.go.swx")));
        assert!(!filter.should_process(Utf8Path::new("src/upload.tmp")));
        assert!(!filter.should_process(Utf8Path::new("src/.#main.go")));
    }

    #[test]
    fn test_temp_file_filter_ignores_empty_suffix() {
        let filter = TempFileFilter::new(["", ".bak"]);
        assert!(filter.should_process(Utf8Path::new("main.go")));
        assert!(!filter.should_process(Utf8Path::new("main.go.bak")));
    }

    #[test]
    fn test_temp_file_filter_directory_events() {
        // Paths without a file name (the watched root itself) pass.
        let filter = TempFileFilter::default();
        assert!(filter.should_process(Utf8Path::new("/")));
    }

    #[test]
    fn test_file_name_filter() {
        let filter = FileNameFilter::new("projects.json");
        assert!(filter.should_process(Utf8Path::new("/etc/ab/projects.json")));
        assert!(!filter.should_process(Utf8Path::new("/etc/ab/projects.json.swp")));
        assert!(!filter.should_process(Utf8Path::new("/etc/ab/other.json")));
    }

    #[test]
    fn test_composite_filter_empty() {
        let filter = CompositeFilter::new();
        assert!(filter.should_process(Utf8Path::new("anything")));
    }

    #[test]
    fn test_composite_filter_and() {
        let filter = CompositeFilter::new()
            .and(TempFileFilter::default())
            .and(FileNameFilter::new("main.go"));

        assert!(filter.should_process(Utf8Path::new("src/main.go")));
        assert!(!filter.should_process(Utf8Path::new("src/util.go")));
    }

    #[test]
    fn test_boxed_and_arc_filters() {
        let boxed: Box<dyn FileFilter> = Box::new(FileNameFilter::new("a.go"));
        assert!(boxed.should_process(Utf8Path::new("x/a.go")));

        let shared = std::sync::Arc::new(TempFileFilter::default());
        assert!(!shared.should_process(Utf8Path::new("x/a.go~")));
    }
}
