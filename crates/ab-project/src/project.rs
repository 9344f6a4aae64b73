//! Per-project orchestration.
//!
//! A [`Project`] ties one declaration to its build pipeline, process
//! supervisor and change detector:
//!
//! ```text
//! Initializing ──► Started ──────┐
//!      │                         ├──► Watching ◄──► Rebuilding ──► Restarting
//!      └─────────► FailedToStart ┘        │
//!                                         └──► Stopped
//! ```
//!
//! Every change signal drives one rebuild cycle on the project's own task, so
//! cycles of one project never overlap. Cycle failures are logged and
//! published through the status channel; they never end supervision.

use std::sync::Arc;

use ab_core::{FxHashMap, ProjectDecl, ProjectLayout, Settings};
use ab_watcher::{AcceptAllFilter, ChangeDetector, ChangeSignal};
use camino::Utf8PathBuf;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::build::{BuildPipeline, SYNTAX_ERROR_REASON};
use crate::error::{BuildError, ProcessError, ProjectError};
use crate::process::{DirectStart, ProcessSupervisor};
use crate::template::{ScriptContext, Templates};

/// Lifecycle state of a supervised project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// Generating the build script, building and starting for the first time.
    Initializing,
    /// The initial build and start succeeded.
    Started,
    /// The initial build or start failed; the project still watches.
    FailedToStart,
    /// Waiting for source changes.
    Watching,
    /// A change was detected and the build is running.
    Rebuilding,
    /// The build succeeded and the process is being replaced.
    Restarting,
    /// Supervision has ended.
    Stopped,
}

/// Snapshot of a project, published on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectStatus {
    /// Project name.
    pub name: String,
    /// Current state.
    pub state: ProjectState,
    /// Completed rebuild cycles, successful or not.
    pub cycles: u64,
    /// Tracked process, if any.
    pub pid: Option<u32>,
    /// Error of the most recent cycle; cleared by a successful cycle.
    pub last_error: Option<String>,
    /// Error of the initial setup.
    pub setup_error: Option<String>,
}

impl ProjectStatus {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: ProjectState::Initializing,
            cycles: 0,
            pid: None,
            last_error: None,
            setup_error: None,
        }
    }
}

/// One supervised project.
#[derive(Debug)]
pub struct Project {
    decl: ProjectDecl,
    layout: ProjectLayout,
    settings: Arc<Settings>,
    templates: Arc<Templates>,
    script: ScriptContext,
    pipeline: BuildPipeline,
    supervisor: ProcessSupervisor,
    status: watch::Sender<ProjectStatus>,
}

impl Project {
    /// Resolves `decl` into a project.
    ///
    /// `known_roots` maps declared project names to their roots, for the
    /// dependency section of the build script.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Config`] if the declaration is invalid or its
    /// root does not exist.
    pub fn new(
        decl: ProjectDecl,
        settings: Arc<Settings>,
        templates: Arc<Templates>,
        known_roots: &FxHashMap<String, Utf8PathBuf>,
    ) -> Result<Self, ProjectError> {
        decl.validate()?;
        let layout = ProjectLayout::resolve(&decl)?;
        let script = ScriptContext::new(
            &decl,
            &layout,
            &settings.build.success_sentinel,
            known_roots,
        );
        let pipeline = BuildPipeline::new(&decl, &layout, &settings.build, Arc::clone(&templates));
        let supervisor = ProcessSupervisor::new(&decl, &layout, settings.process);
        let (status, _) = watch::channel(ProjectStatus::new(&decl.name));

        Ok(Self {
            decl,
            layout,
            settings,
            templates,
            script,
            pipeline,
            supervisor,
            status,
        })
    }

    /// Returns the declaration.
    #[must_use]
    pub fn decl(&self) -> &ProjectDecl {
        &self.decl
    }

    /// Returns the derived paths.
    #[must_use]
    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Subscribes to status updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProjectStatus> {
        self.status.subscribe()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ProjectStatus {
        self.status.borrow().clone()
    }

    /// Generates the build script, builds, and starts the project once.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Template`] or [`ProjectError::Script`] if the
    /// build script cannot be generated, and build or process errors of the
    /// first cycle. Setup is not retried; the next change signal runs a
    /// regular cycle.
    pub async fn setup(&mut self) -> Result<(), ProjectError> {
        self.set_state(ProjectState::Initializing);
        let result = self.initialize().await;

        let pid = self.supervisor.pid();
        self.status.send_modify(|status| {
            status.pid = pid;
            match &result {
                Ok(()) => {
                    status.state = ProjectState::Started;
                    status.setup_error = None;
                }
                Err(e) => {
                    status.state = ProjectState::FailedToStart;
                    status.setup_error = Some(e.to_string());
                }
            }
        });

        match &result {
            Ok(()) => tracing::info!(project = %self.decl.name, pid, "Project started"),
            Err(e) if e.is_syntax() => {
                tracing::warn!(project = %self.decl.name, error = %e, "Project has build errors");
            }
            Err(e) => tracing::error!(project = %self.decl.name, error = %e, "Project failed to start"),
        }
        result
    }

    async fn initialize(&mut self) -> Result<(), ProjectError> {
        self.write_script()?;
        std::fs::create_dir_all(&self.layout.bin_dir).map_err(|source| ProjectError::Script {
            path: self.layout.bin_dir.clone(),
            source,
        })?;

        if self.decl.strategy.is_direct() {
            return self.run_direct().await;
        }
        self.pipeline.run().await?;
        self.supervisor.reap_stale().await;
        self.supervisor.start().await?;
        Ok(())
    }

    /// Writes the build script, replacing any previous one.
    fn write_script(&self) -> Result<(), ProjectError> {
        let text = self.templates.render_script(&self.script)?;
        let path = &self.layout.script_path;
        let script_error = |source| ProjectError::Script {
            path: path.clone(),
            source,
        };

        std::fs::write(path, text).map_err(script_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .map_err(script_error)?;
        }
        tracing::debug!(project = %self.decl.name, path = %path, "Build script written");
        Ok(())
    }

    /// Arms the change detector on the source tree.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::Watch`] if the source tree cannot be watched.
    pub async fn arm(&self) -> Result<ChangeDetector, ProjectError> {
        let detector =
            ChangeDetector::watch_tree(&self.layout.src_dir, &self.settings.watch, AcceptAllFilter)
                .await?;
        tracing::debug!(
            project = %self.decl.name,
            dirs = detector.watched_dirs(),
            "Watching sources"
        );
        Ok(detector)
    }

    /// Runs one rebuild cycle: build, then restart.
    ///
    /// A syntax failure leaves the running process untouched.
    ///
    /// # Errors
    ///
    /// Returns the build or process error of the cycle.
    pub async fn rebuild_cycle(&mut self) -> Result<(), ProjectError> {
        self.set_state(ProjectState::Rebuilding);
        let result = self.cycle().await;

        let pid = self.supervisor.pid();
        self.status.send_modify(|status| {
            status.state = ProjectState::Watching;
            status.cycles += 1;
            status.pid = pid;
            status.last_error = result.as_ref().err().map(ToString::to_string);
        });
        result
    }

    async fn cycle(&mut self) -> Result<(), ProjectError> {
        if self.decl.strategy.is_direct() {
            return self.run_direct().await;
        }

        self.pipeline.run().await?;
        self.set_state(ProjectState::Restarting);
        if self.supervisor.is_running() {
            self.supervisor.restart().await?;
        } else {
            self.supervisor.reap_stale().await;
            self.supervisor.start().await?;
        }
        Ok(())
    }

    /// Starts the build script itself and records the outcome in the error
    /// artifact.
    async fn run_direct(&mut self) -> Result<(), ProjectError> {
        match self.supervisor.start_direct(self.decl.daemon).await {
            Ok(DirectStart::Started { .. } | DirectStart::Finished { .. }) => {
                self.pipeline.artifact().clear()?;
                Ok(())
            }
            Ok(DirectStart::Failed { output }) => {
                let artifact = self.pipeline.artifact().record(&output, SYNTAX_ERROR_REASON)?;
                tracing::warn!(project = %self.decl.name, artifact = %artifact, "Run failed");
                Err(BuildError::Syntax { artifact }.into())
            }
            Err(e @ ProcessError::AddressInUse { .. }) => {
                tracing::error!(project = %self.decl.name, "Address still in use after retry");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drives rebuild cycles until `cancel` fires or the detector stops,
    /// then tears the project down.
    ///
    /// A cycle in progress when `cancel` fires is completed first.
    pub async fn supervise(mut self, mut detector: ChangeDetector, cancel: CancellationToken) {
        self.set_state(ProjectState::Watching);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                signal = detector.recv() => {
                    let Some(signal) = signal else {
                        tracing::warn!(project = %self.decl.name, "Change detector stopped");
                        break;
                    };
                    self.on_change(&signal).await;
                }
            }
        }

        if let Err(e) = detector.shutdown().await {
            tracing::warn!(project = %self.decl.name, error = %e, "Change detector did not shut down cleanly");
        }
        self.teardown().await;
    }

    async fn on_change(&mut self, signal: &ChangeSignal) {
        tracing::info!(
            project = %self.decl.name,
            events = signal.events,
            first = ?signal.first_path(),
            "Sources changed, rebuilding"
        );
        match self.rebuild_cycle().await {
            Ok(()) => {
                if self.decl.daemon {
                    tracing::info!(project = %self.decl.name, pid = self.supervisor.pid(), "Restart complete");
                }
            }
            Err(e) if e.is_syntax() => {
                tracing::warn!(project = %self.decl.name, error = %e, "Build failed, keeping the running process");
            }
            Err(e) => tracing::error!(project = %self.decl.name, error = %e, "Rebuild cycle failed"),
        }
    }

    /// Stops the tracked process and marks the project stopped.
    pub async fn teardown(&mut self) {
        if self.supervisor.is_running() {
            if let Err(e) = self.supervisor.stop().await {
                tracing::warn!(project = %self.decl.name, error = %e, "Could not stop process");
            }
        }
        let pid = self.supervisor.pid();
        self.status.send_modify(|status| {
            status.state = ProjectState::Stopped;
            status.pid = pid;
        });
        tracing::info!(project = %self.decl.name, "Supervision stopped");
    }

    fn set_state(&self, state: ProjectState) {
        self.status.send_modify(|status| status.state = state);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use ab_core::BuildStrategy;
    use camino::Utf8Path;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Build script template that "compiles" `src/main.txt` into the output
    /// unless it contains `SYNTAX`.
    const FAKE_TOOLCHAIN: &str = "#!/bin/sh\n\
        cd \"{{root}}\" || exit 1\n\
        if grep -q SYNTAX src/main.txt; then echo \"src/main.txt:1: SYNTAX\"; exit 1; fi\n\
        cp src/main.txt {{output}} && chmod +x {{output}} && echo \"{{sentinel}}\"\n";

    fn is_alive(pid: u32) -> bool {
        let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap());
        nix::sys::signal::kill(pid, None).is_ok()
    }

    fn settings() -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.watch.quiet_period_ms = 100;
        settings.process.settle_ms = 200;
        settings.process.stop_grace_ms = 500;
        Arc::new(settings)
    }

    fn project(name: &str, main: &str) -> (TempDir, Project) {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/main.txt"), main).unwrap();

        let decl = ProjectDecl::new(name, root)
            .with_strategy(BuildStrategy::Build)
            .with_main("main.txt");
        let templates = Arc::new(Templates::from_strings(FAKE_TOOLCHAIN, "{{output}}").unwrap());
        let project = Project::new(decl, settings(), templates, &FxHashMap::default()).unwrap();
        (dir, project)
    }

    #[tokio::test]
    async fn test_setup_builds_and_starts() {
        let (_dir, mut project) = project("abt_setup", "#!/bin/sh\nexec sleep 30\n");

        project.setup().await.unwrap();
        assert!(project.layout().script_path.is_file());
        assert!(project.layout().executable.as_ref().unwrap().is_file());
        assert!(!project.layout().error_dir.exists());

        let status = project.status();
        assert_eq!(status.state, ProjectState::Started);
        assert!(status.pid.is_some());

        project.teardown().await;
        assert_eq!(project.status().state, ProjectState::Stopped);
        assert!(project.status().pid.is_none());
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported() {
        let (_dir, mut project) = project("abt_broken", "SYNTAX\n");

        let err = project.setup().await.unwrap_err();
        assert!(err.is_syntax());
        assert!(project.layout().error_file.is_file());

        let status = project.status();
        assert_eq!(status.state, ProjectState::FailedToStart);
        assert!(status.setup_error.unwrap().contains("syntax error"));
        assert!(status.pid.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_cycle_keeps_process_on_failure() {
        let (dir, mut project) = project("abt_cycle", "#!/bin/sh\nexec sleep 30\n");
        project.setup().await.unwrap();
        // Let the shell open the executable before the rebuild deletes it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let first = project.status().pid;
        assert!(is_alive(first.unwrap()));

        std::fs::write(dir.path().join("src/main.txt"), "SYNTAX\n").unwrap();
        let err = project.rebuild_cycle().await.unwrap_err();
        assert!(err.is_syntax());
        let status = project.status();
        assert_eq!(status.pid, first);
        assert!(is_alive(first.unwrap()));
        assert_eq!(status.cycles, 1);
        assert!(status.last_error.is_some());

        std::fs::write(dir.path().join("src/main.txt"), "#!/bin/sh\nexec sleep 30\n").unwrap();
        project.rebuild_cycle().await.unwrap();
        let status = project.status();
        assert_ne!(status.pid, first);
        assert!(is_alive(status.pid.unwrap()));
        assert!(!is_alive(first.unwrap()));
        assert_eq!(status.cycles, 2);
        assert!(status.last_error.is_none());
        assert!(!project.layout().error_dir.exists());

        project.teardown().await;
    }

    #[tokio::test]
    async fn test_supervise_stops_on_cancel() {
        let (_dir, mut project) = project("abt_cancel", "#!/bin/sh\nexec sleep 30\n");
        project.setup().await.unwrap();
        let detector = project.arm().await.unwrap();
        let mut status = project.subscribe();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(project.supervise(detector, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status.borrow_and_update().state, ProjectState::Stopped);
    }

    #[tokio::test]
    async fn test_arm_requires_sources() {
        let (dir, project) = project("abt_nosrc", "");
        std::fs::remove_dir_all(dir.path().join("src")).unwrap();

        let err = project.arm().await.unwrap_err();
        assert!(err.is_fatal());
    }
}
