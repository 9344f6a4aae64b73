//! Change detection over a directory tree or a single file.
//!
//! This module provides the [`ChangeDetector`] type that bridges the
//! synchronous `notify` watcher to the async tokio runtime and coalesces its
//! notifications into [`ChangeSignal`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    notify thread                                │
//! │  ┌───────────────────┐    ┌──────────────────────────────────┐  │
//! │  │ RecommendedWatcher│ -> │ Callback (kind + path filtering) │  │
//! │  └───────────────────┘    └────────────────┬─────────────────┘  │
//! └────────────────────────────────────────────│────────────────────┘
//!                                   unbounded  │ FileEvent
//!                                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Async Runtime (tokio)                        │
//! │  ┌──────────────────┐   capacity 1   ┌────────────────────────┐ │
//! │  │ accumulator task │ ─────────────► │ ChangeDetector::recv() │ │
//! │  │ (quiet window)   │  ChangeSignal  │ (consumer)             │ │
//! │  └──────────────────┘                └────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Directory Coverage
//!
//! By default the tree is snapshotted when watching begins: every directory
//! that exists at that moment is registered on its own, and directories
//! created later are not observed until the detector is recreated. Setting
//! [`WatchConfig::track_new_dirs`] registers the root recursively instead, so
//! new subdirectories are picked up as they appear.

use std::time::Duration;

use ab_core::WatchConfig;
use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::debounce::spawn_accumulator;
use crate::error::WatchError;
use crate::events::{ChangeSignal, FileEvent, SignalStats};
use crate::filter::{CompositeFilter, FileFilter, FileNameFilter, TempFileFilter};

/// A debounced change detector.
///
/// # Lifecycle
///
/// 1. **Creation**: [`ChangeDetector::watch_tree`] or
///    [`ChangeDetector::watch_file`] validates the target, registers it with
///    notify, and spawns the accumulator task.
///
/// 2. **Signals**: [`ChangeDetector::recv`] yields one [`ChangeSignal`] per
///    burst of changes. A signal that is not consumed holds back the next
///    one, so slow consumers see changes merged rather than dropped.
///
/// 3. **Shutdown**: call [`ChangeDetector::shutdown`] to stop and await the
///    accumulator, or drop the detector, which cancels it.
///
/// # Examples
///
/// ```no_run
/// use ab_core::WatchConfig;
/// use ab_watcher::{AcceptAllFilter, ChangeDetector};
/// use camino::Utf8Path;
///
/// # async fn example() -> Result<(), ab_watcher::WatchError> {
/// let mut detector = ChangeDetector::watch_tree(
///     Utf8Path::new("/srv/api/src"),
///     &WatchConfig::default(),
///     AcceptAllFilter,
/// )
/// .await?;
///
/// while let Some(signal) = detector.recv().await {
///     println!("{} changes, rebuilding", signal.events);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChangeDetector {
    /// The notify watcher. Dropping it stops notifications.
    watcher: Option<RecommendedWatcher>,

    /// Coalesced signals from the accumulator.
    signals: mpsc::Receiver<ChangeSignal>,

    /// Stops the accumulator.
    cancel: CancellationToken,

    /// Handle to the accumulator task.
    task: Option<JoinHandle<()>>,

    /// The watched directory or file.
    target: Utf8PathBuf,

    /// Number of directories registered with notify.
    watched_dirs: usize,

    /// Signals delivered so far.
    stats: SignalStats,
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("target", &self.target)
            .field("watched_dirs", &self.watched_dirs)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ChangeDetector {
    /// Watches the directory tree under `root`.
    ///
    /// Changes to editor temp files (per [`WatchConfig::ignore_suffixes`])
    /// and paths rejected by `filter` are not counted. Read-only access
    /// never counts as a change.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if `root` does not exist,
    /// [`WatchError::Walk`] if the directory snapshot fails, and
    /// [`WatchError::Notify`] if a directory cannot be registered.
    #[allow(clippy::unused_async)] // Async for API consistency with shutdown()
    pub async fn watch_tree<F: FileFilter>(
        root: &Utf8Path,
        config: &WatchConfig,
        filter: F,
    ) -> Result<Self, WatchError> {
        if !root.exists() {
            return Err(WatchError::path_not_found(root));
        }
        let target = root.canonicalize_utf8()?;

        let filter = CompositeFilter::new()
            .and(TempFileFilter::new(config.ignore_suffixes.iter().cloned()))
            .and(filter);
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(event_handler(raw_tx, filter))?;

        let watched_dirs = if config.track_new_dirs {
            watcher.watch(target.as_std_path(), RecursiveMode::Recursive)?;
            1
        } else {
            let dirs = snapshot_dirs(&target)?;
            for dir in &dirs {
                watcher.watch(dir.as_std_path(), RecursiveMode::NonRecursive)?;
            }
            dirs.len()
        };

        tracing::info!(
            path = %target,
            dirs = watched_dirs,
            track_new_dirs = config.track_new_dirs,
            "Change detector started"
        );

        Ok(Self::assemble(
            watcher,
            raw_rx,
            config.quiet_period(),
            target,
            watched_dirs,
        ))
    }

    /// Watches the single file at `path`.
    ///
    /// The parent directory is registered and only changes to a file with
    /// the same name are counted, so replacing the file (as many editors do
    /// on save) keeps being noticed.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if `path` does not exist and
    /// [`WatchError::Notify`] if its directory cannot be registered.
    #[allow(clippy::unused_async)] // Async for API consistency with shutdown()
    pub async fn watch_file(path: &Utf8Path, quiet: Duration) -> Result<Self, WatchError> {
        if !path.is_file() {
            return Err(WatchError::path_not_found(path));
        }
        let target = path.canonicalize_utf8()?;
        let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
            return Err(WatchError::path_not_found(path));
        };

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(event_handler(raw_tx, FileNameFilter::new(name)))?;
        watcher.watch(dir.as_std_path(), RecursiveMode::NonRecursive)?;

        tracing::debug!(path = %target, "Watching file");

        Ok(Self::assemble(watcher, raw_rx, quiet, target, 1))
    }

    fn assemble(
        watcher: RecommendedWatcher,
        raw_rx: mpsc::UnboundedReceiver<FileEvent>,
        quiet: Duration,
        target: Utf8PathBuf,
        watched_dirs: usize,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (signals, task) = spawn_accumulator(raw_rx, quiet, cancel.clone());
        Self {
            watcher: Some(watcher),
            signals,
            cancel,
            task: Some(task),
            target,
            watched_dirs,
            stats: SignalStats::default(),
        }
    }

    /// Receives the next coalesced change signal.
    ///
    /// Returns `None` once the detector has stopped.
    pub async fn recv(&mut self) -> Option<ChangeSignal> {
        let signal = self.signals.recv().await?;
        self.stats.observe(&signal);
        Some(signal)
    }

    /// Returns the watched directory or file (canonical).
    #[must_use]
    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    /// Returns the number of directories registered with notify.
    #[must_use]
    pub const fn watched_dirs(&self) -> usize {
        self.watched_dirs
    }

    /// Returns the signals delivered so far.
    #[must_use]
    pub const fn stats(&self) -> SignalStats {
        self.stats
    }

    /// Returns `true` if the detector is still delivering signals.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
            && !self.cancel.is_cancelled()
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops watching and waits for the accumulator to finish.
    ///
    /// A burst still inside its quiet window is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ChannelClosed`] if the accumulator panicked.
    pub async fn shutdown(mut self) -> Result<(), WatchError> {
        drop(self.watcher.take());
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            task.await.map_err(|_join_error| WatchError::ChannelClosed)?;
        }

        tracing::debug!(path = %self.target, "Change detector stopped");
        Ok(())
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        // The accumulator notices cancellation on its next poll.
        self.cancel.cancel();
    }
}

/// Builds the notify callback: drops read-only access and filtered paths,
/// and forwards everything else as a [`FileEvent`].
fn event_handler<F: FileFilter>(
    raw_tx: mpsc::UnboundedSender<FileEvent>,
    filter: F,
) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    move |result: notify::Result<Event>| match result {
        Ok(event) => {
            if !is_change(event.kind) {
                return;
            }
            for path in event.paths {
                let path = match Utf8PathBuf::try_from(path) {
                    Ok(path) => path,
                    Err(e) => {
                        let err = WatchError::non_utf8_path(e.into_path_buf());
                        tracing::warn!(error = %err, "Skipping file event");
                        continue;
                    }
                };
                if !filter.should_process(&path) {
                    tracing::trace!(path = %path, "Filtered out file event");
                    continue;
                }
                if raw_tx.send(FileEvent::new(path)).is_err() {
                    // Accumulator is gone; the detector is shutting down.
                    return;
                }
            }
        }
        Err(error) => tracing::warn!(error = %error, "Watcher error"),
    }
}

/// Returns `false` for notifications that do not modify anything.
///
/// Reading a file (a build reading its own sources, an editor opening one)
/// is reported as access on some platforms. Closing a file that was open
/// for writing still counts.
const fn is_change(kind: EventKind) -> bool {
    match kind {
        EventKind::Access(access) => matches!(access, AccessKind::Close(AccessMode::Write)),
        _ => true,
    }
}

/// Lists `root` and every directory below it, without following links or
/// applying ignore files.
fn snapshot_dirs(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, WatchError> {
    let mut dirs = Vec::new();
    for entry in WalkBuilder::new(root).standard_filters(false).build() {
        let entry = entry?;
        if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
            continue;
        }
        match Utf8Path::from_path(entry.path()) {
            Some(dir) => dirs.push(dir.to_owned()),
            None => {
                let err = WatchError::non_utf8_path(entry.path());
                tracing::warn!(error = %err, "Skipping directory");
            }
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AcceptAllFilter;
    use std::fs;
    use tempfile::TempDir;

    const SIGNAL_WAIT: Duration = Duration::from_secs(5);
    const SILENCE: Duration = Duration::from_millis(400);

    fn fast_config() -> WatchConfig {
        WatchConfig {
            quiet_period_ms: 50,
            ..WatchConfig::default()
        }
    }

    fn temp_tree() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_detector_creation() {
        let (_dir, root) = temp_tree();
        let detector = ChangeDetector::watch_tree(&root, &fast_config(), AcceptAllFilter)
            .await
            .unwrap();

        assert!(detector.is_running());
        assert_eq!(detector.target(), root);
        assert_eq!(detector.watched_dirs(), 1);
    }

    #[tokio::test]
    async fn test_detector_path_not_found() {
        let result = ChangeDetector::watch_tree(
            Utf8Path::new("/nonexistent/autobuild/src"),
            &WatchConfig::default(),
            AcceptAllFilter,
        )
        .await;

        assert!(matches!(result, Err(WatchError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_snapshot_registers_every_directory() {
        let (_dir, root) = temp_tree();
        fs::create_dir_all(root.join("handlers/v1")).unwrap();
        fs::create_dir_all(root.join("models")).unwrap();
        fs::write(root.join("main.go"), "package main").unwrap();

        let detector = ChangeDetector::watch_tree(&root, &fast_config(), AcceptAllFilter)
            .await
            .unwrap();
        // root, handlers, handlers/v1, models
        assert_eq!(detector.watched_dirs(), 4);

        let tracking = WatchConfig {
            track_new_dirs: true,
            ..fast_config()
        };
        let detector = ChangeDetector::watch_tree(&root, &tracking, AcceptAllFilter)
            .await
            .unwrap();
        assert_eq!(detector.watched_dirs(), 1);
    }

    #[tokio::test]
    async fn test_write_produces_signal() {
        let (_dir, root) = temp_tree();
        fs::create_dir(root.join("pkg")).unwrap();
        let mut detector = ChangeDetector::watch_tree(&root, &fast_config(), AcceptAllFilter)
            .await
            .unwrap();

        fs::write(root.join("pkg").join("util.go"), "package pkg").unwrap();

        let signal = tokio::time::timeout(SIGNAL_WAIT, detector.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(signal.events >= 1);
        assert_eq!(detector.stats().signals, 1);

        detector.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_temp_files_do_not_signal() {
        let (_dir, root) = temp_tree();
        let mut detector = ChangeDetector::watch_tree(&root, &fast_config(), AcceptAllFilter)
            .await
            .unwrap();

        fs::write(root.join(".main.go.swp"), "swap").unwrap();
        fs::write(root.join("main.go~"), "backup").unwrap();

        let result = tokio::time::timeout(SILENCE, detector.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reads_do_not_signal() {
        let (_dir, root) = temp_tree();
        let file = root.join("main.go");
        fs::write(&file, "package main").unwrap();

        let mut detector = ChangeDetector::watch_tree(&root, &fast_config(), AcceptAllFilter)
            .await
            .unwrap();

        let _ = fs::read_to_string(&file).unwrap();

        let result = tokio::time::timeout(SILENCE, detector.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_watch_file_ignores_siblings() {
        let (_dir, root) = temp_tree();
        let config = root.join("projects.json");
        fs::write(&config, "[]").unwrap();

        let mut detector = ChangeDetector::watch_file(&config, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(detector.target(), config);

        fs::write(root.join("notes.txt"), "unrelated").unwrap();
        assert!(tokio::time::timeout(SILENCE, detector.recv()).await.is_err());

        fs::write(&config, r#"[{"name": "api", "root": "api"}]"#).unwrap();
        let signal = tokio::time::timeout(SIGNAL_WAIT, detector.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            signal.first_path().and_then(|p| p.file_name()),
            Some("projects.json")
        );
    }

    #[tokio::test]
    async fn test_watch_file_missing() {
        let result =
            ChangeDetector::watch_file(Utf8Path::new("/nonexistent/projects.json"), SILENCE).await;
        assert!(matches!(result, Err(WatchError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_signals() {
        let (_dir, root) = temp_tree();
        let detector = ChangeDetector::watch_tree(&root, &fast_config(), AcceptAllFilter)
            .await
            .unwrap();

        assert!(detector.is_running());
        detector.shutdown().await.unwrap();
    }
}
