//! Watchers: producer loops feeding the ingestion gateway
//!
//! Each watcher is an independent tokio task holding its own cursor
//! (history byte offset, directory snapshot, stream position). They block
//! only on their own I/O source and route every observed event through
//! `Chronicle::remember`. Per-event failures are logged and skipped; one
//! bad event never terminates a loop. Cancellation is cooperative,
//! checked each poll iteration.

mod dir;
mod shell;
mod stream;

pub use dir::{spawn_dir_watcher, DirWatcher};
pub use shell::{backfill_history, classify_command, spawn_shell_watcher, ShellHistoryWatcher};
pub use stream::{spawn_stream_watcher, StreamWatcher};

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running watcher task
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WatcherHandle {
    pub(crate) fn new(shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self { shutdown, join }
    }

    /// Signal the loop and wait for it to exit
    ///
    /// Never interrupts an in-flight append; the loop finishes its current
    /// event before noticing the signal.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}
