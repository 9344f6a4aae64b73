//! Burst coalescing.
//!
//! The accumulator is the first of the two loops behind every change
//! detector. It counts raw [`FileEvent`]s; once no event has arrived for the
//! quiet window and the count is nonzero, it emits exactly one
//! [`ChangeSignal`] and starts a new burst.
//!
//! The signal channel holds a single signal. While the consumer is busy with
//! a rebuild, the accumulator waits on that channel and raw events queue up
//! behind it; they are folded into the next signal once the consumer is
//! ready again. Rebuilds are therefore never run concurrently and no change
//! is lost.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{ChangeSignal, FileEvent};

/// Capacity of the signal channel between accumulator and consumer.
const SIGNAL_CAPACITY: usize = 1;

/// Spawns an accumulator task over `raw`.
///
/// Returns the receiving end of the signal channel and the task handle. The
/// task ends when `cancel` fires, when `raw` closes (after flushing a
/// pending burst), or when the signal receiver is dropped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ab_watcher::{FileEvent, spawn_accumulator};
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (raw_tx, raw_rx) = mpsc::unbounded_channel();
/// let (mut signals, _task) =
///     spawn_accumulator(raw_rx, Duration::from_millis(20), CancellationToken::new());
///
/// for _ in 0..5 {
///     raw_tx.send(FileEvent::new("src/main.go".into())).unwrap();
/// }
///
/// let signal = signals.recv().await.unwrap();
/// assert_eq!(signal.events, 5);
/// # }
/// ```
pub fn spawn_accumulator(
    raw: mpsc::UnboundedReceiver<FileEvent>,
    quiet: Duration,
    cancel: CancellationToken,
) -> (mpsc::Receiver<ChangeSignal>, JoinHandle<()>) {
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
    let task = tokio::spawn(accumulate(raw, quiet, signal_tx, cancel));
    (signal_rx, task)
}

async fn accumulate(
    mut raw: mpsc::UnboundedReceiver<FileEvent>,
    quiet: Duration,
    signals: mpsc::Sender<ChangeSignal>,
    cancel: CancellationToken,
) {
    let mut burst: Option<ChangeSignal> = None;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = tokio::time::timeout(quiet, raw.recv()) => match next {
                Ok(Some(event)) => match burst.as_mut() {
                    Some(signal) => signal.record(event),
                    None => burst = Some(ChangeSignal::begin(event)),
                },
                Ok(None) => {
                    if let Some(signal) = burst.take() {
                        let _ = signals.send(signal).await;
                    }
                    tracing::trace!("Raw event stream closed, stopping accumulator");
                    break;
                }
                Err(_quiet) => {
                    let Some(signal) = burst.take() else {
                        continue;
                    };
                    tracing::debug!(
                        events = signal.events,
                        burst_ms = u64::try_from(signal.burst_duration().as_millis())
                            .unwrap_or(u64::MAX),
                        "Change burst settled"
                    );
                    if signals.send(signal).await.is_err() {
                        tracing::trace!("Signal receiver dropped, stopping accumulator");
                        break;
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    const QUIET: Duration = Duration::from_millis(200);

    fn event(path: &str) -> FileEvent {
        FileEvent::new(Utf8PathBuf::from(path))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_yields_exactly_one_signal() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (mut signals, _task) = spawn_accumulator(raw_rx, QUIET, CancellationToken::new());

        for i in 0..25 {
            raw_tx.send(event(&format!("src/f{}.go", i % 3))).unwrap();
        }

        let signal = signals.recv().await.unwrap();
        assert_eq!(signal.events, 25);
        assert_eq!(signal.sample.len(), 3);

        // Nothing else arrives, however long we wait.
        let extra = tokio::time::timeout(Duration::from_secs(10), signals.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_spread_inside_window_coalesce() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (mut signals, _task) = spawn_accumulator(raw_rx, QUIET, CancellationToken::new());

        // Each gap is shorter than the quiet window, so the burst keeps going.
        for _ in 0..5 {
            raw_tx.send(event("src/main.go")).unwrap();
            tokio::time::sleep(QUIET / 2).await;
        }

        let signal = signals.recv().await.unwrap();
        assert_eq!(signal.events, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_yield_separate_signals() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (mut signals, _task) = spawn_accumulator(raw_rx, QUIET, CancellationToken::new());

        for _ in 0..3 {
            raw_tx.send(event("src/a.go")).unwrap();
        }
        assert_eq!(signals.recv().await.unwrap().events, 3);

        for _ in 0..2 {
            raw_tx.send(event("src/b.go")).unwrap();
        }
        assert_eq!(signals.recv().await.unwrap().events, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_during_busy_consumer_are_not_lost() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (mut signals, _task) = spawn_accumulator(raw_rx, QUIET, CancellationToken::new());

        // First burst fills the channel; the consumer does not read yet.
        raw_tx.send(event("src/a.go")).unwrap();
        tokio::time::sleep(QUIET * 2).await;

        // Second burst settles while the first signal is still unread,
        // third arrives while the accumulator waits to hand it over.
        raw_tx.send(event("src/b.go")).unwrap();
        tokio::time::sleep(QUIET * 2).await;
        raw_tx.send(event("src/c.go")).unwrap();
        raw_tx.send(event("src/c.go")).unwrap();
        tokio::time::sleep(QUIET * 2).await;

        let total: usize = [
            signals.recv().await.unwrap().events,
            signals.recv().await.unwrap().events,
            signals.recv().await.unwrap().events,
        ]
        .iter()
        .sum();
        assert_eq!(total, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_stream_emits_nothing() {
        let (_raw_tx, raw_rx) = mpsc::unbounded_channel::<FileEvent>();
        let (mut signals, _task) = spawn_accumulator(raw_rx, QUIET, CancellationToken::new());

        let result = tokio::time::timeout(Duration::from_secs(5), signals.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_flushes_pending_burst() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (mut signals, task) = spawn_accumulator(raw_rx, QUIET, CancellationToken::new());

        raw_tx.send(event("src/a.go")).unwrap();
        raw_tx.send(event("src/a.go")).unwrap();
        drop(raw_tx);

        assert_eq!(signals.recv().await.unwrap().events, 2);
        assert!(signals.recv().await.is_none());
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_task() {
        let (_raw_tx, raw_rx) = mpsc::unbounded_channel::<FileEvent>();
        let cancel = CancellationToken::new();
        let (mut signals, task) = spawn_accumulator(raw_rx, QUIET, cancel.clone());

        cancel.cancel();
        task.await.unwrap();
        assert!(signals.recv().await.is_none());
    }
}
