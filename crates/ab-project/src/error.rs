//! Error types for the ab-project crate.
//!
//! Each concern has its own error type; [`ProjectError`] wraps them for the
//! orchestration layer.
//!
//! # Error Recovery Strategy
//!
//! - **Config / template / script errors**: Fatal to that project's setup
//! - **Syntax failures** ([`BuildError::Syntax`], [`BuildError::TimedOut`]):
//!   Expected - recorded as the error artifact, process untouched
//! - **Process control errors** ([`ProcessError`]): Surfaced - a restart aborts
//!   without starting a second instance
//! - **Watch errors** ([`ab_watcher::WatchError`]): Fatal to that project's
//!   supervision

use std::time::Duration;

use ab_core::ConfigError;
use ab_watcher::WatchError;
use camino::Utf8PathBuf;

/// Errors from loading or rendering templates.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// A template override file could not be read.
    #[error("failed to read template {path}: {source}")]
    Load {
        /// The template file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A template did not parse.
    #[error("invalid {name} template: {source}")]
    Parse {
        /// Which template (`script` or `error page`).
        name: &'static str,
        /// The underlying parse error.
        source: Box<handlebars::TemplateError>,
    },

    /// A template failed to render.
    #[error("failed to render {name} template: {source}")]
    Render {
        /// Which template (`script` or `error page`).
        name: &'static str,
        /// The underlying render error.
        source: Box<handlebars::RenderError>,
    },
}

/// Errors from running the build pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The build script has not been generated.
    #[error("build script missing: {0}")]
    ScriptMissing(Utf8PathBuf),

    /// The build script could not be executed.
    #[error("failed to run build script {script}: {source}")]
    Invoke {
        /// The build script.
        script: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The build output did not match the success sentinel.
    ///
    /// The diagnostics were written to `artifact`.
    #[error("syntax error, see {artifact}")]
    Syntax {
        /// The rendered error document.
        artifact: Utf8PathBuf,
    },

    /// The build did not finish in time and was killed.
    #[error("build timed out after {}s, see {artifact}", after.as_secs())]
    TimedOut {
        /// The configured timeout.
        after: Duration,
        /// The rendered error document.
        artifact: Utf8PathBuf,
    },

    /// The error artifact could not be written or removed.
    #[error("failed to update error artifact {path}: {source}")]
    Artifact {
        /// The artifact directory or file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The error page could not be rendered.
    #[error(transparent)]
    Render(#[from] TemplateError),
}

impl BuildError {
    /// Returns `true` for failures caused by the project's sources, which
    /// are reported through the error artifact and leave the running
    /// process alone.
    #[must_use]
    pub const fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. } | Self::TimedOut { .. })
    }

    /// Returns the error artifact written for this failure, if any.
    #[must_use]
    pub fn artifact(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Syntax { artifact } | Self::TimedOut { artifact, .. } => Some(artifact),
            Self::ScriptMissing(_)
            | Self::Invoke { .. }
            | Self::Artifact { .. }
            | Self::Render(_) => None,
        }
    }
}

/// Errors from starting and stopping supervised processes.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable or script could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// The program that was spawned.
        program: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A tracked process is still running; stop it first.
    #[error("process {pid} is still running")]
    AlreadyRunning {
        /// The running process.
        pid: u32,
    },

    /// Name-based termination found no matching process.
    #[error("no running process named {name}")]
    NotFound {
        /// The process name looked up.
        name: String,
    },

    /// There is no handle and no process name to stop by.
    #[error("no process tracked for {project}")]
    Untracked {
        /// The project.
        project: String,
    },

    /// Termination was attempted and failed.
    #[error("failed to stop {target}: {reason}")]
    KillFailed {
        /// The pid or process name.
        target: String,
        /// What went wrong.
        reason: String,
    },

    /// The new instance could not bind its address, even after the previous
    /// instance was killed.
    #[error("address already in use")]
    AddressInUse {
        /// Captured error output of the failed start.
        output: String,
    },

    /// An I/O error occurred while waiting on a process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Returns `true` if there was nothing to stop.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Untracked { .. })
    }
}

/// Errors from supervising a project.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// The declaration is invalid or its root is missing.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A template could not be loaded or rendered.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The build script could not be written.
    #[error("failed to write build script {path}: {source}")]
    Script {
        /// The build script.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A build failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Starting or stopping the process failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The source tree could not be watched.
    #[error(transparent)]
    Watch(#[from] WatchError),
}

impl ProjectError {
    /// Returns `true` for failures reported through the error artifact.
    #[must_use]
    pub const fn is_syntax(&self) -> bool {
        match self {
            Self::Build(err) => err.is_syntax(),
            Self::Config(_)
            | Self::Template(_)
            | Self::Script { .. }
            | Self::Process(_)
            | Self::Watch(_) => false,
        }
    }

    /// Returns `true` if this error prevents the project from being
    /// supervised at all.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Template(_) | Self::Script { .. } | Self::Watch(_)
        )
    }
}
