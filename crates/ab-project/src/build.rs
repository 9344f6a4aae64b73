//! The build pipeline.
//!
//! Runs a project's generated build script and classifies its standard
//! output against the success sentinel. Success clears the error artifact;
//! anything else writes it and returns a syntax failure, which callers treat
//! as "keep the current process running".

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ab_core::{BuildConfig, ProjectDecl, ProjectLayout};
use camino::Utf8PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::artifact::ErrorArtifact;
use crate::error::BuildError;
use crate::process::{spawn_retrying, terminate_group_best_effort};
use crate::template::Templates;

/// Reason recorded in the artifact when the output does not match.
pub const SYNTAX_ERROR_REASON: &str = "syntax error";

/// Reason recorded in the artifact when the build was killed.
pub const TIMED_OUT_REASON: &str = "build timed out";

/// How a build's output was judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The trimmed output is exactly the sentinel.
    Success,
    /// Anything else.
    SyntaxFailure,
}

/// Classifies build output.
///
/// # Examples
///
/// ```
/// use ab_project::{Classification, classify};
///
/// assert_eq!(classify("finished\n", "finished"), Classification::Success);
/// assert_eq!(classify("main.go:3: undefined: x\n", "finished"), Classification::SyntaxFailure);
/// ```
#[must_use]
pub fn classify(output: &str, sentinel: &str) -> Classification {
    if output.trim() == sentinel {
        Classification::Success
    } else {
        Classification::SyntaxFailure
    }
}

/// Builds one project.
#[derive(Debug, Clone)]
pub struct BuildPipeline {
    project: String,
    root: Utf8PathBuf,
    script: Utf8PathBuf,
    executable: Option<Utf8PathBuf>,
    sentinel: String,
    timeout: Option<Duration>,
    artifact: ErrorArtifact,
}

impl BuildPipeline {
    /// Creates the pipeline for `decl`.
    #[must_use]
    pub fn new(
        decl: &ProjectDecl,
        layout: &ProjectLayout,
        config: &BuildConfig,
        templates: Arc<Templates>,
    ) -> Self {
        Self {
            project: decl.name.clone(),
            root: layout.root.clone(),
            script: layout.script_path.clone(),
            executable: layout.executable.clone(),
            sentinel: config.success_sentinel.clone(),
            timeout: config.timeout(),
            artifact: ErrorArtifact::new(
                &decl.name,
                decl.strategy,
                layout,
                &config.success_sentinel,
                templates,
            ),
        }
    }

    /// Returns the project's error artifact.
    #[must_use]
    pub fn artifact(&self) -> &ErrorArtifact {
        &self.artifact
    }

    /// Runs the build script once.
    ///
    /// The previous executable is deleted first, so a failed build never
    /// leaves a stale binary behind to be restarted.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Syntax`] or [`BuildError::TimedOut`] after
    /// writing the error artifact, [`BuildError::ScriptMissing`] or
    /// [`BuildError::Invoke`] if the script cannot be run, and
    /// [`BuildError::Artifact`] if the artifact cannot be updated.
    pub async fn run(&self) -> Result<(), BuildError> {
        if !self.script.is_file() {
            return Err(BuildError::ScriptMissing(self.script.clone()));
        }
        self.remove_executable()?;

        let started = Instant::now();
        let mut cmd = Command::new(self.script.as_std_path());
        cmd.current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = spawn_retrying(&mut cmd)
            .await
            .map_err(|source| self.invoke_error(source))?;
        let pid = child.id();
        let stdout = child.stdout.take().map(read_all);
        let stderr = child.stderr.take().map(read_all);

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await,
            None => Ok(child.wait().await),
        };

        let Ok(status) = waited else {
            if let Some(pid) = pid {
                terminate_group_best_effort(pid);
            }
            let _ = child.kill().await;
            let output = join_reader(stdout).await;
            let after = self.timeout.unwrap_or_default();
            tracing::warn!(
                project = %self.project,
                after_secs = after.as_secs(),
                "Build timed out"
            );
            let artifact = self.artifact.record(&output, TIMED_OUT_REASON)?;
            return Err(BuildError::TimedOut { after, artifact });
        };
        let status = status.map_err(|source| self.invoke_error(source))?;

        let stdout = join_reader(stdout).await;
        let stderr = join_reader(stderr).await;
        tracing::debug!(
            project = %self.project,
            %status,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Build script exited"
        );
        if !stderr.trim().is_empty() {
            tracing::debug!(project = %self.project, stderr = %stderr.trim(), "Build script stderr");
        }

        match classify(&stdout, &self.sentinel) {
            Classification::Success => {
                self.artifact.clear()?;
                tracing::info!(project = %self.project, "Build succeeded");
                Ok(())
            }
            Classification::SyntaxFailure => {
                let output = if stdout.trim().is_empty() { &stderr } else { &stdout };
                let artifact = self.artifact.record(output, SYNTAX_ERROR_REASON)?;
                tracing::warn!(project = %self.project, artifact = %artifact, "Build failed");
                Err(BuildError::Syntax { artifact })
            }
        }
    }

    fn remove_executable(&self) -> Result<(), BuildError> {
        let Some(executable) = &self.executable else {
            return Ok(());
        };
        match std::fs::remove_file(executable) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BuildError::Invoke {
                script: executable.clone(),
                source,
            }),
        }
    }

    fn invoke_error(&self, source: std::io::Error) -> BuildError {
        BuildError::Invoke {
            script: self.script.clone(),
            source,
        }
    }
}

fn read_all<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut bytes = Vec::new();
        let _ = reader.read_to_end(&mut bytes).await;
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

async fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}
