//! Configuration structures for autobuild.
//!
//! This module provides configuration types for all components:
//!
//! - [`WatchConfig`] - Change detection (quiet period, directory tracking)
//! - [`BuildConfig`] - Build pipeline (success sentinel, timeout, templates)
//! - [`ProcessConfig`] - Process supervision (settle delay, stop grace)
//! - [`ReloadConfig`] - Configuration hot reload
//! - [`Settings`] - All of the above
//! - [`Config`] - Settings plus the declared projects
//!
//! All configuration types implement [`Default`]. The configuration document
//! is JSON and comes in two shapes: a bare array of project declarations, or
//! an object with `settings` and `projects` keys.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FxHashSet;
use crate::error::ConfigError;
use crate::project::ProjectDecl;

/// Configuration for source change detection.
///
/// # Examples
///
/// ```
/// use ab_core::WatchConfig;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.quiet_period_ms, 500);
/// assert!(!config.track_new_dirs);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet window in milliseconds.
    ///
    /// A burst of changes is reported once no change has been seen for
    /// this long.
    pub quiet_period_ms: u64,

    /// Watch directories created after the watch started.
    ///
    /// When `false`, the directory tree is snapshotted once when watching
    /// begins and later subdirectories are not observed.
    pub track_new_dirs: bool,

    /// File name suffixes whose changes are ignored (editor temp files).
    pub ignore_suffixes: Vec<String>,
}

impl WatchConfig {
    /// Returns the quiet window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 500,
            track_new_dirs: false,
            ignore_suffixes: vec![
                "~".to_owned(),
                ".swp".to_owned(),
                ".swx".to_owned(),
                ".tmp".to_owned(),
            ],
        }
    }
}

/// Configuration for the build pipeline.
///
/// # Examples
///
/// ```
/// use ab_core::BuildConfig;
///
/// let config = BuildConfig::default();
/// assert_eq!(config.success_sentinel, "finished");
/// assert_eq!(config.timeout().map(|t| t.as_secs()), Some(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// The exact (trimmed) output a build script prints on success.
    pub success_sentinel: String,

    /// Upper bound on a single build, in seconds. `None` waits forever.
    pub timeout_secs: Option<u64>,

    /// Build script template file. Uses the built-in template when unset.
    pub script_template: Option<Utf8PathBuf>,

    /// Error page template file. Uses the built-in template when unset.
    pub error_template: Option<Utf8PathBuf>,
}

impl BuildConfig {
    /// Returns the build timeout, if any.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            success_sentinel: "finished".to_owned(),
            timeout_secs: Some(300),
            script_template: None,
            error_template: None,
        }
    }
}

/// Configuration for process supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// How long a directly-run build script may run before its captured
    /// output is inspected, in milliseconds.
    pub settle_ms: u64,

    /// How long a terminated process gets to exit before it is killed,
    /// in milliseconds.
    pub stop_grace_ms: u64,
}

impl ProcessConfig {
    /// Returns the settle delay as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Returns the stop grace period as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            settle_ms: 300,
            stop_grace_ms: 2000,
        }
    }
}

/// Configuration for reloading the configuration file itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Whether changes to the configuration file are applied while running.
    pub enabled: bool,

    /// Quiet window for configuration file changes, in milliseconds.
    pub quiet_period_ms: u64,
}

impl ReloadConfig {
    /// Returns the quiet window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quiet_period_ms: 200,
        }
    }
}

/// Process-wide settings shared by every project.
///
/// Settings are immutable once loaded; a changed settings block on reload
/// replaces every supervised project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Change detection settings.
    pub watch: WatchConfig,

    /// Build pipeline settings.
    pub build: BuildConfig,

    /// Process supervision settings.
    pub process: ProcessConfig,

    /// Configuration reload settings.
    pub reload: ReloadConfig,
}

impl Settings {
    /// Checks option values that serde cannot constrain.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for an empty success sentinel
    /// or a zero quiet period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.success_sentinel.trim().is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "build.success_sentinel".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.watch.quiet_period_ms == 0 {
            return Err(ConfigError::InvalidOption {
                option: "watch.quiet_period_ms".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.reload.quiet_period_ms == 0 {
            return Err(ConfigError::InvalidOption {
                option: "reload.quiet_period_ms".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

/// Root configuration: settings plus the declared projects.
///
/// # Examples
///
/// ```
/// use ab_core::Config;
///
/// let json = r#"[{"name": "api", "root": "/srv/api", "go_way": "build", "main": "main.go"}]"#;
/// let (config, rejected) = Config::parse(json, None).unwrap();
///
/// assert_eq!(config.projects.len(), 1);
/// assert!(rejected.is_empty());
/// assert_eq!(config.settings.build.success_sentinel, "finished");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared settings.
    pub settings: Settings,

    /// Declared projects, in declaration order.
    pub projects: Vec<ProjectDecl>,
}

impl Config {
    /// Parses a configuration document.
    ///
    /// Each project declaration is parsed and validated on its own: a
    /// malformed declaration is returned in the second element and does not
    /// affect its siblings. Relative project roots are resolved against
    /// `base_dir` when given.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not JSON, is neither an array
    /// nor an object, or carries invalid settings.
    pub fn parse(
        text: &str,
        base_dir: Option<&Utf8Path>,
    ) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        let document: Value = serde_json::from_str(text)?;

        let (settings, entries) = match document {
            Value::Array(entries) => (Settings::default(), entries),
            Value::Object(mut object) => {
                let settings = match object.remove("settings") {
                    Some(value) => serde_json::from_value(value)?,
                    None => Settings::default(),
                };
                let entries = match object.remove("projects") {
                    Some(Value::Array(entries)) => entries,
                    Some(_) => {
                        return Err(ConfigError::InvalidOption {
                            option: "projects".to_owned(),
                            reason: "must be an array of project declarations".to_owned(),
                        });
                    }
                    None => Vec::new(),
                };
                (settings, entries)
            }
            _ => {
                return Err(ConfigError::InvalidOption {
                    option: "<document>".to_owned(),
                    reason: "expected an array of projects or an object".to_owned(),
                });
            }
        };
        settings.validate()?;

        let mut projects = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();
        let mut seen = FxHashSet::default();

        for entry in entries {
            let declared_name = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();

            let mut decl: ProjectDecl = match serde_json::from_value(entry) {
                Ok(decl) => decl,
                Err(e) => {
                    rejected.push(ConfigError::invalid_project(declared_name, e.to_string()));
                    continue;
                }
            };
            if let Err(e) = decl.validate() {
                rejected.push(e);
                continue;
            }
            if !seen.insert(decl.name.clone()) {
                rejected.push(ConfigError::DuplicateProject(decl.name));
                continue;
            }
            if let Some(base) = base_dir {
                decl.resolve_root(base);
            }
            projects.push(decl);
        }

        Ok((Self { settings, projects }, rejected))
    }

    /// Reads and parses the configuration file at `path`.
    ///
    /// Relative project roots are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise
    /// the errors of [`Config::parse`].
    pub fn load(path: &Utf8Path) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let base = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Self::parse(&text, Some(base))
    }

    /// Returns the declaration named `name`.
    #[must_use]
    pub fn project(&self, name: &str) -> Option<&ProjectDecl> {
        self.projects.iter().find(|decl| decl.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::BuildStrategy;

    #[test]
    fn test_watch_config_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.quiet_period(), Duration::from_millis(500));
        assert!(!config.track_new_dirs);
        assert!(config.ignore_suffixes.iter().any(|s| s == ".swp"));
    }

    #[test]
    fn test_process_and_reload_defaults() {
        let process = ProcessConfig::default();
        assert_eq!(process.settle(), Duration::from_millis(300));
        assert_eq!(process.stop_grace(), Duration::from_secs(2));

        let reload = ReloadConfig::default();
        assert!(reload.enabled);
        assert_eq!(reload.quiet_period(), Duration::from_millis(200));
    }

    #[test]
    fn test_parse_bare_array() {
        let json = r#"[
            {"name": "tools", "root": "/src/tools"},
            {"name": "web", "root": "/src/web", "go_way": "run", "main": "main.go", "depends": ["tools"]}
        ]"#;
        let (config, rejected) = Config::parse(json, None).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.projects.len(), 2);
        assert_eq!(config.projects[1].strategy, BuildStrategy::Run);
        assert_eq!(config.project("tools").map(|p| p.root.as_str()), Some("/src/tools"));
    }

    #[test]
    fn test_parse_object_with_settings() {
        let json = r#"{
            "settings": {"watch": {"quiet_period_ms": 250}, "build": {"timeout_secs": null}},
            "projects": [{"name": "api", "root": "api", "strategy": "build"}]
        }"#;
        let (config, rejected) = Config::parse(json, Some(Utf8Path::new("/etc/ab"))).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(config.settings.watch.quiet_period_ms, 250);
        assert_eq!(config.settings.build.timeout(), None);
        // Untouched sections keep their defaults
        assert_eq!(config.settings.build.success_sentinel, "finished");
        assert_eq!(config.projects[0].root, Utf8PathBuf::from("/etc/ab/api"));
    }

    #[test]
    fn test_parse_isolates_bad_declarations() {
        let json = r#"[
            {"name": "good", "root": "/a"},
            {"name": "bad", "root": "/b", "strategy": "compile"},
            {"name": "abs", "root": "/c", "main": "/etc/main.go"},
            {"name": "good", "root": "/d"}
        ]"#;
        let (config, rejected) = Config::parse(json, None).unwrap();
        assert_eq!(config.projects.len(), 1);
        assert_eq!(rejected.len(), 3);
        let names: Vec<_> = rejected.iter().filter_map(ConfigError::project).collect();
        assert_eq!(names, vec!["bad", "abs", "good"]);
    }

    #[test]
    fn test_parse_rejects_scalar_document() {
        assert!(matches!(
            Config::parse("42", None),
            Err(ConfigError::InvalidOption { .. })
        ));
        assert!(matches!(Config::parse("{", None), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_parse_rejects_empty_sentinel() {
        let json = r#"{"settings": {"build": {"success_sentinel": "  "}}, "projects": []}"#;
        let err = Config::parse(json, None).unwrap_err();
        assert!(err.to_string().contains("success_sentinel"));
    }

    #[test]
    fn test_load_resolves_roots_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap();
        let path = base.join("projects.json");
        std::fs::write(&path, r#"[{"name": "api", "root": "api"}]"#).unwrap();

        let (config, _) = Config::load(&path).unwrap();
        assert_eq!(config.projects[0].root, base.join("api"));
    }

    #[test]
    fn test_settings_serialization() {
        insta::assert_json_snapshot!(Settings::default(), @r#"
        {
          "watch": {
            "quiet_period_ms": 500,
            "track_new_dirs": false,
            "ignore_suffixes": [
              "~",
              ".swp",
              ".swx",
              ".tmp"
            ]
          },
          "build": {
            "success_sentinel": "finished",
            "timeout_secs": 300,
            "script_template": null,
            "error_template": null
          },
          "process": {
            "settle_ms": 300,
            "stop_grace_ms": 2000
          },
          "reload": {
            "enabled": true,
            "quiet_period_ms": 200
          }
        }
        "#);
    }
}
