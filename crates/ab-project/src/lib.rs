//! Build pipeline, process supervision, and project orchestration for
//! autobuild.
//!
//! # Overview
//!
//! The main entry point is [`Registry`], which owns one [`Project`] per
//! declaration. A project combines:
//!
//! - [`Templates`]: the generated build script and the HTML error page
//! - [`BuildPipeline`]: runs the script and [`classify`]s its output against
//!   the success sentinel
//! - [`ErrorArtifact`]: `<root>/_log_/error.html`, present iff the last build
//!   failed
//! - [`ProcessSupervisor`]: start, stop and restart of the built program, or
//!   of the script itself for the run strategy
//! - an [`ab_watcher::ChangeDetector`] on `<root>/src`, driving one rebuild
//!   cycle per burst of changes
//!
//! # Example
//!
//! ```ignore
//! use ab_core::{Config, ProjectDecl, BuildStrategy};
//! use ab_project::Registry;
//! use camino::Utf8Path;
//!
//! let (config, _rejected) = Config::load(Utf8Path::new("config/projects.json"))?;
//! let mut registry = Registry::new(config.settings.clone())?;
//!
//! // Idempotent: a second call with the same declaration does nothing.
//! let decl = ProjectDecl::new("api", "/srv/api").with_strategy(BuildStrategy::Build);
//! registry.watch_project(decl.clone()).await?;
//! registry.watch_project(decl).await?;
//! assert_eq!(registry.len(), 1);
//!
//! // Status snapshots for tooling
//! if let Some(status) = registry.status("api") {
//!     println!("{:?} after {} cycles", status.state, status.cycles);
//! }
//!
//! registry.shutdown().await;
//! ```
//!
//! # Platform notes
//!
//! On Unix, supervised processes run in their own process group and are
//! stopped with `SIGTERM`, then `SIGKILL` after the grace period. On Windows
//! the process tree is killed with `taskkill`.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod artifact;
pub mod build;
pub mod error;
pub mod process;
pub mod project;
pub mod registry;
pub mod startup;
pub mod template;

pub use artifact::{ErrorArtifact, strip_sentinel};
pub use build::{BuildPipeline, Classification, SYNTAX_ERROR_REASON, TIMED_OUT_REASON, classify};
pub use error::{BuildError, ProcessError, ProjectError, TemplateError};
pub use process::{DirectStart, ProcessSupervisor};
pub use project::{Project, ProjectState, ProjectStatus};
pub use registry::{ApplyReport, Registry, WatchOutcome};
pub use startup::{StartupFailure, classify_startup_failure};
pub use template::{
    DEFAULT_ERROR_TEMPLATE, DEFAULT_SCRIPT_TEMPLATE, DependencyContext, ErrorPageContext,
    ScriptContext, Templates,
};
