//! Generic stream watcher
//!
//! Captures each non-empty line from any async line source (stdin, a
//! pipe, a log follower) as a record. The line iterator itself is the
//! cursor.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use super::WatcherHandle;
use crate::chronicle::Chronicle;

/// Captures lines from an async reader until EOF or cancellation
pub struct StreamWatcher<R> {
    chronicle: Chronicle,
    reader: R,
    tags: Vec<String>,
}

impl<R> StreamWatcher<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(chronicle: Chronicle, reader: R, tags: Vec<String>) -> Self {
        let tags = if tags.is_empty() {
            vec!["stream".to_string()]
        } else {
            tags
        };
        Self {
            chronicle,
            reader,
            tags,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut lines = self.reader.lines();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if let Err(e) = self.chronicle.remember(
                                line,
                                &self.tags,
                                "stream",
                                &HashMap::new(),
                            ) {
                                tracing::warn!("failed to capture stream line: {}", e);
                            }
                        }
                        Ok(None) => break, // EOF
                        Err(e) => {
                            tracing::warn!("stream read error: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
        tracing::debug!("stream watcher stopped");
    }
}

/// Spawn a watcher over standard input
pub fn spawn_stream_watcher(chronicle: Chronicle, tags: Vec<String>) -> WatcherHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reader = BufReader::new(tokio::io::stdin());
    let watcher = StreamWatcher::new(chronicle, reader, tags);
    let join = tokio::spawn(watcher.run(shutdown_rx));
    WatcherHandle::new(shutdown_tx, join)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_lines_until_eof() {
        let chronicle = Chronicle::open_in_memory().unwrap();
        let input: &[u8] = b"first line\n\nsecond line\n";
        let watcher = StreamWatcher::new(
            chronicle.clone(),
            BufReader::new(input),
            vec!["logs".to_string()],
        );

        let (_tx, rx) = watch::channel(false);
        watcher.run(rx).await;

        let records = chronicle.recent(10).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source == "stream"));
        assert!(records.iter().all(|r| r.tags.contains(&"logs".to_string())));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let chronicle = Chronicle::open_in_memory().unwrap();
        // a reader that never delivers a line
        let (_keep_open, rx_half) = tokio::io::duplex(64);
        let watcher = StreamWatcher::new(chronicle, BufReader::new(rx_half), vec![]);

        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(watcher.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("watcher should stop on signal")
            .unwrap();
    }
}
