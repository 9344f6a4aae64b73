//! Event types for change notifications.
//!
//! # Event Flow
//!
//! ```text
//! notify event (one per changed path)
//!        │  filtered on the notify thread
//!        ▼
//!   FileEvent ──► accumulator (counts until a quiet window passes)
//!                      │
//!                      ▼
//!                ChangeSignal ──► consumer (one rebuild per signal)
//! ```

use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Number of distinct paths a [`ChangeSignal`] keeps for logging.
pub const SAMPLE_PATHS: usize = 4;

/// A single raw change notification for one path.
///
/// # Examples
///
/// ```
/// use ab_watcher::FileEvent;
/// use camino::Utf8PathBuf;
///
/// let event = FileEvent::new(Utf8PathBuf::from("src/main.go"));
/// assert_eq!(event.file_name(), Some("main.go"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// The path that changed.
    pub path: Utf8PathBuf,

    /// When the notification was received.
    pub timestamp: Instant,
}

impl FileEvent {
    /// Creates a new event for `path`, stamped with the current instant.
    #[inline]
    #[must_use]
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            timestamp: Instant::now(),
        }
    }

    /// Creates a new event with a specific timestamp.
    #[inline]
    #[must_use]
    pub const fn with_timestamp(path: Utf8PathBuf, timestamp: Instant) -> Self {
        Self { path, timestamp }
    }

    /// Returns the file name without the directory path.
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }
}

/// One coalesced "sources changed" signal.
///
/// The accumulator emits exactly one `ChangeSignal` per burst of raw
/// events, once no event has arrived for the quiet window. Only the count
/// drives behavior; the sample paths and timestamps exist for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSignal {
    /// Number of raw events in the burst.
    pub events: usize,

    /// Up to [`SAMPLE_PATHS`] distinct paths from the burst.
    pub sample: SmallVec<[Utf8PathBuf; SAMPLE_PATHS]>,

    /// Arrival of the first event in the burst.
    pub first_at: Instant,

    /// Arrival of the last event in the burst.
    pub last_at: Instant,
}

impl ChangeSignal {
    /// Starts a burst with its first event.
    #[must_use]
    pub fn begin(event: FileEvent) -> Self {
        let mut sample = SmallVec::new();
        let at = event.timestamp;
        sample.push(event.path);
        Self {
            events: 1,
            sample,
            first_at: at,
            last_at: at,
        }
    }

    /// Adds an event to the burst.
    pub fn record(&mut self, event: FileEvent) {
        self.events += 1;
        self.last_at = self.last_at.max(event.timestamp);
        if self.sample.len() < SAMPLE_PATHS && !self.sample.contains(&event.path) {
            self.sample.push(event.path);
        }
    }

    /// Time between the first and the last event of the burst.
    #[must_use]
    pub fn burst_duration(&self) -> Duration {
        self.last_at.saturating_duration_since(self.first_at)
    }

    /// Returns the first sampled path.
    #[must_use]
    pub fn first_path(&self) -> Option<&Utf8PathBuf> {
        self.sample.first()
    }
}

/// Running totals of a change detector, for status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStats {
    /// Signals emitted so far.
    pub signals: u64,

    /// Raw events folded into those signals.
    pub events: u64,
}

impl SignalStats {
    /// Accounts for an emitted signal.
    pub fn observe(&mut self, signal: &ChangeSignal) {
        self.signals += 1;
        self.events += signal.events as u64;
    }
}
