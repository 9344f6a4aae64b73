//! The project registry.
//!
//! The [`Registry`] owns every supervised project. Each project runs on its
//! own task with its own cancellation token; the registry only starts,
//! compares, and stops them.
//!
//! # Usage
//!
//! ```ignore
//! use ab_core::Config;
//! use ab_project::Registry;
//! use camino::Utf8Path;
//!
//! let (config, rejected) = Config::load(Utf8Path::new("config/projects.json"))?;
//! let mut registry = Registry::new(config.settings.clone())?;
//! let report = registry.apply(config).await?;
//! println!("{} projects supervised", registry.len());
//!
//! registry.shutdown().await;
//! ```

use std::sync::Arc;

use ab_core::{Config, FxHashMap, ProjectDecl, Settings, dependency_order};
use camino::Utf8PathBuf;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ProjectError, TemplateError};
use crate::project::{Project, ProjectStatus};
use crate::template::Templates;

/// What [`Registry::watch_project`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The project was not supervised before.
    Started,
    /// A different declaration of the same name was stopped and replaced.
    Replaced,
    /// The same declaration is already supervised; nothing was done.
    Unchanged,
}

/// Summary of [`Registry::apply`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Newly supervised projects.
    pub started: Vec<String>,
    /// Projects restarted with a changed declaration.
    pub replaced: Vec<String>,
    /// Projects left alone.
    pub unchanged: Vec<String>,
    /// Projects no longer declared, now stopped.
    pub removed: Vec<String>,
    /// Projects whose setup failed, with the error.
    ///
    /// Only projects whose error [`is_fatal`](ProjectError::is_fatal) are
    /// missing from the registry; the others are supervised and recover on
    /// the next successful cycle.
    pub failed: Vec<(String, ProjectError)>,
}

/// Handle to a running project task.
#[derive(Debug)]
struct ProjectHandle {
    decl: ProjectDecl,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    status: watch::Receiver<ProjectStatus>,
}

/// The set of supervised projects.
#[derive(Debug)]
pub struct Registry {
    settings: Arc<Settings>,
    templates: Arc<Templates>,
    projects: FxHashMap<String, ProjectHandle>,
}

impl Registry {
    /// Creates an empty registry, compiling the templates named in
    /// `settings`.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] if a template cannot be loaded or parsed.
    pub fn new(settings: Settings) -> Result<Self, TemplateError> {
        let templates = Templates::from_config(&settings.build)?;
        Ok(Self::with_templates(settings, templates))
    }

    /// Creates an empty registry with precompiled templates.
    #[must_use]
    pub fn with_templates(settings: Settings, templates: Templates) -> Self {
        Self {
            settings: Arc::new(settings),
            templates: Arc::new(templates),
            projects: FxHashMap::default(),
        }
    }

    /// Returns the active settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Starts supervising `decl`.
    ///
    /// Calling this again with an identical declaration does nothing. A
    /// changed declaration of a supervised name replaces the old project,
    /// which is stopped first.
    ///
    /// The initial build and start are awaited. When they fail the project
    /// is still registered and watching, and the failure is returned; errors
    /// for which [`ProjectError::is_fatal`] holds leave it unregistered.
    ///
    /// # Errors
    ///
    /// Returns the configuration, script, watch, or first-cycle error.
    pub async fn watch_project(&mut self, decl: ProjectDecl) -> Result<WatchOutcome, ProjectError> {
        let outcome = match self.projects.get(&decl.name) {
            Some(handle) if handle.decl == decl && !handle.task.is_finished() => {
                tracing::debug!(project = %decl.name, "Already supervised");
                return Ok(WatchOutcome::Unchanged);
            }
            Some(_) => {
                self.remove(&decl.name).await;
                WatchOutcome::Replaced
            }
            None => WatchOutcome::Started,
        };

        let name = decl.name.clone();
        let mut project = Project::new(
            decl,
            Arc::clone(&self.settings),
            Arc::clone(&self.templates),
            &self.known_roots(),
        )?;

        let setup = match project.setup().await {
            Err(e) if e.is_fatal() => {
                project.teardown().await;
                return Err(e);
            }
            other => other,
        };

        let detector = match project.arm().await {
            Ok(detector) => detector,
            Err(e) => {
                tracing::error!(project = %name, error = %e, "Cannot watch sources");
                project.teardown().await;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let handle = ProjectHandle {
            decl: project.decl().clone(),
            cancel: cancel.clone(),
            status: project.subscribe(),
            task: tokio::spawn(project.supervise(detector, cancel)),
        };
        self.projects.insert(name, handle);

        setup.map(|()| outcome)
    }

    /// Applies a configuration document.
    ///
    /// Changed settings replace every project. Projects no longer declared
    /// are stopped; the rest are passed to
    /// [`watch_project`](Self::watch_project) in dependency order. A failing
    /// project never prevents its siblings from starting.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] if changed settings name templates that
    /// cannot be loaded; the registry is left untouched in that case.
    pub async fn apply(&mut self, config: Config) -> Result<ApplyReport, TemplateError> {
        let Config { settings, projects } = config;
        let mut report = ApplyReport::default();

        if settings != *self.settings {
            let templates = Templates::from_config(&settings.build)?;
            if !self.projects.is_empty() {
                tracing::info!("Settings changed, restarting every project");
            }
            report.removed = self.shutdown().await;
            self.settings = Arc::new(settings);
            self.templates = Arc::new(templates);
        }

        let stale: Vec<String> = self
            .projects
            .keys()
            .filter(|name| !projects.iter().any(|decl| &decl.name == *name))
            .cloned()
            .collect();
        for name in stale {
            self.remove(&name).await;
            report.removed.push(name);
        }

        let order = dependency_order(&projects);
        for (project, dependency) in &order.unknown {
            tracing::warn!(project = %project, dependency = %dependency, "Unknown dependency");
        }
        if !order.cyclic.is_empty() {
            tracing::warn!(projects = ?order.cyclic, "Dependency cycle, using declaration order");
        }

        let mut slots: Vec<Option<ProjectDecl>> = projects.into_iter().map(Some).collect();
        for index in order.order {
            let Some(decl) = slots.get_mut(index).and_then(Option::take) else {
                continue;
            };
            let name = decl.name.clone();
            match self.watch_project(decl).await {
                Ok(WatchOutcome::Started) => report.started.push(name),
                Ok(WatchOutcome::Replaced) => report.replaced.push(name),
                Ok(WatchOutcome::Unchanged) => report.unchanged.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }

        // A project removed for changed settings and started again is not
        // reported as removed.
        report
            .removed
            .retain(|name| !self.projects.contains_key(name));

        tracing::info!(
            started = report.started.len(),
            replaced = report.replaced.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Configuration applied"
        );
        Ok(report)
    }

    /// Stops supervising `name`, waiting for its task to finish.
    ///
    /// Returns `false` if no such project is supervised.
    pub async fn remove(&mut self, name: &str) -> bool {
        let Some(handle) = self.projects.remove(name) else {
            return false;
        };
        stop(name, handle).await;
        true
    }

    /// Stops every project. Returns the names of the stopped projects.
    pub async fn shutdown(&mut self) -> Vec<String> {
        let mut names: Vec<String> = self.projects.keys().cloned().collect();
        names.sort();

        // Cancel all first so projects wind down concurrently.
        for handle in self.projects.values() {
            handle.cancel.cancel();
        }
        for (name, handle) in self.projects.drain() {
            stop(&name, handle).await;
        }
        names
    }

    /// Returns the latest status of `name`.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<ProjectStatus> {
        self.projects
            .get(name)
            .map(|handle| handle.status.borrow().clone())
    }

    /// Subscribes to status updates of `name`.
    #[must_use]
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<ProjectStatus>> {
        self.projects.get(name).map(|handle| handle.status.clone())
    }

    /// Returns the supervised project names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.projects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns `true` if `name` is supervised.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    /// Returns the number of supervised projects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Returns `true` if no project is supervised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    fn known_roots(&self) -> FxHashMap<String, Utf8PathBuf> {
        self.projects
            .iter()
            .map(|(name, handle)| (name.clone(), handle.decl.root.clone()))
            .collect()
    }
}

async fn stop(name: &str, handle: ProjectHandle) {
    handle.cancel.cancel();
    if let Err(e) = handle.task.await {
        tracing::error!(project = %name, error = %e, "Project task failed");
    }
}
