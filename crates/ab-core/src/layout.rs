//! Filesystem layout of a supervised project.
//!
//! Every project follows the same on-disk convention:
//!
//! ```text
//! <root>/
//! ├── src/              watched source tree
//! ├── bin/<exe>         produced executable (build and install strategies)
//! ├── _log_/error.html  present iff the last build failed
//! └── install.sh        generated build script (install.bat on Windows)
//! ```
//!
//! [`ProjectLayout`] resolves these paths once, as absolute paths, so no
//! operation ever depends on the process working directory.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::ConfigError;
use crate::project::{BuildStrategy, ProjectDecl};

/// Name of the directory whose presence flags a failed build.
pub const ERROR_DIR_NAME: &str = "_log_";

/// Name of the rendered error document inside [`ERROR_DIR_NAME`].
pub const ERROR_FILE_NAME: &str = "error.html";

/// Name of the generated build script.
#[cfg(windows)]
pub const SCRIPT_FILE_NAME: &str = "install.bat";

/// Name of the generated build script.
#[cfg(not(windows))]
pub const SCRIPT_FILE_NAME: &str = "install.sh";

/// Suffix of executables on this platform (`.exe` on Windows).
pub const EXE_SUFFIX: &str = std::env::consts::EXE_SUFFIX;

/// Absolute paths derived from a [`ProjectDecl`].
///
/// # Examples
///
/// ```no_run
/// use ab_core::{BuildStrategy, ProjectDecl, ProjectLayout};
///
/// let decl = ProjectDecl::new("api", "/srv/api")
///     .with_strategy(BuildStrategy::Build)
///     .with_main("main.go");
/// let layout = ProjectLayout::resolve(&decl)?;
///
/// assert_eq!(layout.src_dir.as_str(), "/srv/api/src");
/// assert_eq!(layout.main_target, "src/main.go");
/// # Ok::<(), ab_core::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectLayout {
    /// Canonical project root.
    pub root: Utf8PathBuf,

    /// Watched source tree, `<root>/src`.
    pub src_dir: Utf8PathBuf,

    /// Output directory, `<root>/bin`.
    pub bin_dir: Utf8PathBuf,

    /// Error artifact directory, `<root>/_log_`.
    pub error_dir: Utf8PathBuf,

    /// Rendered error document, `<root>/_log_/error.html`.
    pub error_file: Utf8PathBuf,

    /// Generated build script, `<root>/install.sh` or `<root>/install.bat`.
    pub script_path: Utf8PathBuf,

    /// What the build script compiles, relative to the root.
    ///
    /// `src/<main>` for the run and build strategies; for install, the
    /// package directory of `main` or the project name when `main` is empty.
    pub main_target: String,

    /// Produced executable; `None` for the run strategy.
    pub executable: Option<Utf8PathBuf>,

    /// Process name used to find stray instances by name; `None` for the
    /// run strategy.
    pub process_name: Option<String>,
}

impl ProjectLayout {
    /// Resolves the layout of `decl`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDirectory`] when the root does not exist
    /// or is not a directory, and [`ConfigError::InvalidPath`] when it cannot
    /// be canonicalized as UTF-8.
    pub fn resolve(decl: &ProjectDecl) -> Result<Self, ConfigError> {
        if !decl.root.is_dir() {
            return Err(ConfigError::MissingDirectory(decl.root.clone()));
        }
        let root = decl
            .root
            .canonicalize_utf8()
            .map_err(|e| ConfigError::InvalidPath {
                path: decl.root.clone(),
                reason: e.to_string(),
            })?;

        let bin_dir = root.join("bin");
        let error_dir = root.join(ERROR_DIR_NAME);
        let main_target = main_target(decl);

        let process_name = match decl.strategy {
            BuildStrategy::Run => None,
            BuildStrategy::Build => Some(decl.name.clone()),
            BuildStrategy::Install => Some(
                Utf8Path::new(&main_target)
                    .file_name()
                    .unwrap_or(decl.name.as_str())
                    .to_owned(),
            ),
        };
        let executable = process_name
            .as_ref()
            .map(|name| bin_dir.join(format!("{name}{EXE_SUFFIX}")));

        Ok(Self {
            src_dir: root.join("src"),
            error_file: error_dir.join(ERROR_FILE_NAME),
            script_path: root.join(SCRIPT_FILE_NAME),
            root,
            bin_dir,
            error_dir,
            main_target,
            executable,
            process_name,
        })
    }

    /// Returns the executable path relative to the root, as the build script
    /// should write it.
    #[must_use]
    pub fn relative_executable(&self) -> Option<Utf8PathBuf> {
        self.executable
            .as_ref()
            .and_then(|exe| exe.strip_prefix(&self.root).ok())
            .map(Utf8Path::to_path_buf)
    }
}

fn main_target(decl: &ProjectDecl) -> String {
    match decl.strategy {
        BuildStrategy::Run | BuildStrategy::Build => {
            Utf8Path::new("src").join(&decl.main).into_string()
        }
        BuildStrategy::Install => {
            if decl.main.is_empty() {
                return decl.name.clone();
            }
            match Utf8Path::new(&decl.main).parent() {
                Some(dir) if !dir.as_str().is_empty() => dir.as_str().to_owned(),
                _ => decl.name.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project_root() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        (dir, root)
    }

    #[test]
    fn test_build_layout() {
        let (_dir, root) = project_root();
        let decl = ProjectDecl::new("p1", root.clone())
            .with_strategy(BuildStrategy::Build)
            .with_main("main.go");

        let layout = ProjectLayout::resolve(&decl).unwrap();
        assert_eq!(layout.src_dir, root.join("src"));
        assert_eq!(layout.error_dir, root.join("_log_"));
        assert_eq!(layout.error_file, root.join("_log_").join("error.html"));
        assert_eq!(layout.script_path, root.join(SCRIPT_FILE_NAME));
        assert_eq!(layout.main_target, Utf8Path::new("src").join("main.go").as_str());
        assert_eq!(
            layout.executable,
            Some(root.join("bin").join(format!("p1{EXE_SUFFIX}")))
        );
        assert_eq!(
            layout.relative_executable(),
            Some(Utf8Path::new("bin").join(format!("p1{EXE_SUFFIX}")))
        );
        assert_eq!(layout.process_name.as_deref(), Some("p1"));
    }

    #[test]
    fn test_install_layout_uses_package_dir() {
        let (_dir, root) = project_root();
        let decl = ProjectDecl::new("suite", root.clone()).with_main("cmd/server/main.go");

        let layout = ProjectLayout::resolve(&decl).unwrap();
        assert_eq!(layout.main_target, "cmd/server");
        assert_eq!(layout.process_name.as_deref(), Some("server"));

        let bare = ProjectDecl::new("suite", root);
        let layout = ProjectLayout::resolve(&bare).unwrap();
        assert_eq!(layout.main_target, "suite");
        assert_eq!(layout.process_name.as_deref(), Some("suite"));
    }

    #[test]
    fn test_run_layout_has_no_executable() {
        let (_dir, root) = project_root();
        let decl = ProjectDecl::new("web", root)
            .with_strategy(BuildStrategy::Run)
            .with_main("main.go");

        let layout = ProjectLayout::resolve(&decl).unwrap();
        assert!(layout.executable.is_none());
        assert!(layout.process_name.is_none());
        assert!(layout.relative_executable().is_none());
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let decl = ProjectDecl::new("ghost", "/nonexistent/autobuild/root");
        assert!(matches!(
            ProjectLayout::resolve(&decl),
            Err(ConfigError::MissingDirectory(_))
        ));
    }
}
