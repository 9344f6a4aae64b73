//! Debounced change detection with async signal streaming.
//!
//! This crate turns raw filesystem notifications from the `notify` crate
//! into coalesced "sources changed" signals for an async consumer.
//!
//! # Overview
//!
//! The ab-watcher crate is designed to:
//!
//! - Watch a project's source tree (or a single configuration file)
//! - Drop editor scratch files and read-only access before they count
//! - Coalesce a burst of changes into one [`ChangeSignal`] once the tree
//!   has been quiet for a configured window
//! - Hand signals to a consumer one at a time, so rebuilds never overlap
//!
//! # Crate Dependencies
//!
//! ```text
//! ab-cli ──► ab-project ──► ab-watcher ──► ab-core
//!        └──────────────────────────────────►
//! ```
//!
//! # Usage
//!
//! ## Watching a Source Tree
//!
//! ```no_run
//! use ab_core::WatchConfig;
//! use ab_watcher::{AcceptAllFilter, ChangeDetector};
//! use camino::Utf8Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WatchConfig::default(); // 500ms quiet window
//!     let mut detector =
//!         ChangeDetector::watch_tree(Utf8Path::new("/srv/api/src"), &config, AcceptAllFilter)
//!             .await?;
//!
//!     while let Some(signal) = detector.recv().await {
//!         println!("{} changes since the last build", signal.events);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Using with `tokio::select!`
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ab_watcher::ChangeDetector;
//! use camino::Utf8Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(cancel: CancellationToken) -> Result<(), ab_watcher::WatchError> {
//! let mut config = ChangeDetector::watch_file(
//!     Utf8Path::new("config/projects.json"),
//!     Duration::from_millis(200),
//! )
//! .await?;
//!
//! loop {
//!     tokio::select! {
//!         () = cancel.cancelled() => break,
//!         Some(_) = config.recv() => {
//!             // Reload the configuration
//!         }
//!     }
//! }
//! config.shutdown().await
//! # }
//! ```
//!
//! # Error Handling
//!
//! The crate uses [`WatchError`] for all error cases:
//!
//! ```
//! use ab_watcher::WatchError;
//!
//! fn handle_watch_error(err: WatchError) {
//!     if err.is_fatal() {
//!         eprintln!("Fatal watcher error: {err}");
//!     } else {
//!         eprintln!("Warning: {err}");
//!     }
//! }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod debounce;
pub mod error;
pub mod events;
pub mod filter;
pub mod watcher;

pub use debounce::spawn_accumulator;
pub use error::WatchError;
pub use events::{ChangeSignal, FileEvent, SAMPLE_PATHS, SignalStats};
pub use filter::{AcceptAllFilter, CompositeFilter, FileFilter, FileNameFilter, TempFileFilter};
pub use watcher::ChangeDetector;
