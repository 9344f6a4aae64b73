//! Project declarations.
//!
//! A [`ProjectDecl`] is one entry of the configuration document: the name,
//! root and build settings of a source tree to supervise. Declarations are
//! plain data; [`ProjectLayout`](crate::ProjectLayout) derives the absolute
//! paths the supervisor works with.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a project's sources are turned into a running process.
///
/// # Examples
///
/// ```
/// use ab_core::BuildStrategy;
///
/// let strategy: BuildStrategy = serde_json::from_str(r#""build""#).unwrap();
/// assert_eq!(strategy, BuildStrategy::Build);
/// assert!(strategy.produces_binary());
/// assert!(!BuildStrategy::Run.produces_binary());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategy {
    /// The build script compiles and runs the program in one step.
    ///
    /// There is no separate binary; the script itself is the supervised
    /// process.
    Run,

    /// The build script compiles `src/<main>` into `bin/<name>`, which is
    /// then started.
    Build,

    /// The build script installs a package into `bin/`, which is then
    /// started.
    #[default]
    Install,
}

impl BuildStrategy {
    /// Returns `true` if this strategy leaves an executable in `bin/`.
    #[inline]
    #[must_use]
    pub const fn produces_binary(self) -> bool {
        !matches!(self, Self::Run)
    }

    /// Returns `true` if the build script is itself the supervised process.
    #[inline]
    #[must_use]
    pub const fn is_direct(self) -> bool {
        matches!(self, Self::Run)
    }

    /// Returns the configuration keyword for this strategy.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Build => "build",
            Self::Install => "install",
        }
    }
}

impl fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const fn default_daemon() -> bool {
    true
}

/// One supervised project as declared in the configuration document.
///
/// Field names follow the configuration keys; the aliases accept the keys
/// of the older project list format (`go_way`, `deamon`).
///
/// # Examples
///
/// ```
/// use ab_core::{BuildStrategy, ProjectDecl};
///
/// let json = r#"{"name": "api", "root": "/srv/api", "go_way": "build", "main": "main.go"}"#;
/// let decl: ProjectDecl = serde_json::from_str(json).unwrap();
///
/// assert_eq!(decl.strategy, BuildStrategy::Build);
/// assert!(decl.daemon);
/// assert!(decl.depends.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDecl {
    /// Project name, also the basename of the produced executable.
    pub name: String,

    /// Project root directory. Relative roots are resolved against the
    /// directory of the configuration file.
    pub root: Utf8PathBuf,

    /// Build strategy.
    #[serde(default, alias = "go_way", alias = "build")]
    pub strategy: BuildStrategy,

    /// Entry file of the program, relative to `src/`.
    ///
    /// For [`BuildStrategy::Install`] this names the package to install
    /// (its directory is used); when empty the project name is used.
    #[serde(default)]
    pub main: String,

    /// Whether the program is expected to run indefinitely (a server)
    /// rather than exit after producing output.
    #[serde(default = "default_daemon", alias = "deamon")]
    pub daemon: bool,

    /// Names of other projects this one needs to build.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Arguments passed to the program on every start.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ProjectDecl {
    /// Creates a declaration with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            strategy: BuildStrategy::default(),
            main: String::new(),
            daemon: true,
            depends: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Sets the build strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BuildStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the main entry.
    #[must_use]
    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = main.into();
        self
    }

    /// Sets the daemon flag.
    #[must_use]
    pub fn with_daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Sets the dependency list.
    #[must_use]
    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the program arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the declaration for problems that do not need the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidProject`] when the name is empty or
    /// contains a path separator, when `main` is absolute, or when the
    /// project depends on itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ConfigError::invalid_project(&self.name, "name is empty"));
        }
        if name.contains(['/', '\\']) {
            return Err(ConfigError::invalid_project(
                &self.name,
                "name must not contain path separators",
            ));
        }
        if is_absolute_like(&self.main) {
            return Err(ConfigError::invalid_project(
                &self.name,
                format!("main '{}' must be relative to the src directory", self.main),
            ));
        }
        if self.depends.iter().any(|dep| dep == &self.name) {
            return Err(ConfigError::invalid_project(
                &self.name,
                "project depends on itself",
            ));
        }
        Ok(())
    }

    /// Resolves a relative root against `base`.
    pub fn resolve_root(&mut self, base: &Utf8Path) {
        if self.root.is_relative() {
            self.root = base.join(&self.root);
        }
    }
}

/// Absolute on this platform, or rooted in the POSIX or Windows sense.
fn is_absolute_like(path: &str) -> bool {
    Utf8Path::new(path).is_absolute() || path.starts_with('/') || path.starts_with('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_labels() {
        assert_eq!(BuildStrategy::Run.to_string(), "run");
        assert_eq!(BuildStrategy::Build.to_string(), "build");
        assert_eq!(BuildStrategy::Install.to_string(), "install");
        assert_eq!(BuildStrategy::default(), BuildStrategy::Install);
    }

    #[test]
    fn test_decl_defaults_from_minimal_json() {
        let decl: ProjectDecl =
            serde_json::from_str(r#"{"name": "tools", "root": "../tools"}"#).unwrap();
        assert_eq!(decl.strategy, BuildStrategy::Install);
        assert!(decl.daemon);
        assert!(decl.main.is_empty());
        assert!(decl.args.is_empty());
    }

    #[test]
    fn test_decl_accepts_legacy_keys() {
        let json = r#"{
            "name": "web",
            "root": "/srv/web",
            "go_way": "run",
            "deamon": false,
            "main": "web/main.go",
            "depends": ["tools"]
        }"#;
        let decl: ProjectDecl = serde_json::from_str(json).unwrap();
        assert_eq!(decl.strategy, BuildStrategy::Run);
        assert!(!decl.daemon);
        assert_eq!(decl.depends, vec!["tools"]);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let json = r#"{"name": "x", "root": "/x", "strategy": "compile"}"#;
        assert!(serde_json::from_str::<ProjectDecl>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_absolute_main() {
        let decl = ProjectDecl::new("api", "/srv/api").with_main("/abs/main.go");
        let err = decl.validate().unwrap_err();
        assert!(err.to_string().contains("must be relative"));
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        assert!(ProjectDecl::new("", "/x").validate().is_err());
        assert!(ProjectDecl::new("a/b", "/x").validate().is_err());
        assert!(
            ProjectDecl::new("a", "/x")
                .with_depends(["a"])
                .validate()
                .is_err()
        );
        assert!(ProjectDecl::new("a", "/x").with_main("cmd/a/main.go").validate().is_ok());
    }

    #[test]
    fn test_resolve_root() {
        let mut decl = ProjectDecl::new("api", "projects/api");
        decl.resolve_root(Utf8Path::new("/etc/autobuild"));
        assert_eq!(decl.root, Utf8PathBuf::from("/etc/autobuild/projects/api"));

        let mut decl = ProjectDecl::new("api", "/srv/api");
        decl.resolve_root(Utf8Path::new("/etc/autobuild"));
        assert_eq!(decl.root, Utf8PathBuf::from("/srv/api"));
    }
}
