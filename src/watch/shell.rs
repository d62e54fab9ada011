//! Shell history watcher: backfill plus live tail
//!
//! Backfill imports an existing history file in one pass. The live
//! watcher polls the file and captures lines appended past its byte
//! cursor, surviving truncation (history rewrite) by resetting to the
//! start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;

use super::WatcherHandle;
use crate::chronicle::Chronicle;
use crate::error::Result;

/// Auto-tag a shell command by its leading verb
pub fn classify_command(cmd: &str) -> Vec<String> {
    let mut tags = vec!["shell".to_string()];

    let bucket = if cmd.starts_with("git ") || cmd.starts_with("gh ") {
        Some("git")
    } else if cmd.starts_with("docker ") || cmd.starts_with("kubectl ") {
        Some("devops")
    } else if cmd.starts_with("python ") || cmd.starts_with("pip ") || cmd.starts_with("poetry ") {
        Some("python")
    } else if cmd.starts_with("npm ") || cmd.starts_with("yarn ") || cmd.starts_with("node ") {
        Some("nodejs")
    } else if cmd.starts_with("cd ")
        || cmd.starts_with("ls ")
        || cmd.starts_with("cat ")
        || cmd.starts_with("grep ")
    {
        Some("navigation")
    } else if cmd.to_lowercase().contains("test") {
        Some("testing")
    } else if ["build", "deploy", "release"].iter().any(|w| cmd.contains(w)) {
        Some("build")
    } else {
        None
    };

    if let Some(bucket) = bucket {
        tags.push(bucket.to_string());
    }
    tags
}

fn capture_line(chronicle: &Chronicle, line: &str, source: &str) -> bool {
    let line = line.trim();
    // blank lines and history timestamp comments
    if line.is_empty() || line.starts_with('#') {
        return false;
    }

    let tags = classify_command(line);
    match chronicle.remember(line, &tags, source, &HashMap::new()) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("failed to capture shell command: {}", e);
            false
        }
    }
}

/// One-shot import of an existing history file
///
/// Returns the number of commands captured. Missing file is not an
/// error; the shell may simply never have written one.
pub fn backfill_history(chronicle: &Chronicle, history_file: &Path) -> Result<usize> {
    if !history_file.exists() {
        tracing::info!("history file not found: {}", history_file.display());
        return Ok(0);
    }

    let raw = std::fs::read(history_file)?;
    let text = String::from_utf8_lossy(&raw);

    let mut captured = 0;
    for line in text.lines() {
        if capture_line(chronicle, line, "shell_history") {
            captured += 1;
        }
    }

    tracing::info!(captured, "backfilled shell history");
    Ok(captured)
}

/// Polls a shell history file and captures newly appended commands
pub struct ShellHistoryWatcher {
    chronicle: Chronicle,
    history_path: PathBuf,
    poll_interval: Duration,
    cursor: u64,
}

impl ShellHistoryWatcher {
    /// Watch `history_path`, capturing only lines appended from now on
    pub fn new(chronicle: Chronicle, history_path: PathBuf, poll_interval: Duration) -> Self {
        let cursor = std::fs::metadata(&history_path)
            .map(|m| m.len())
            .unwrap_or(0);
        Self {
            chronicle,
            history_path,
            poll_interval,
            cursor,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll().await;
                }
            }
        }
        tracing::debug!("shell watcher stopped");
    }

    async fn poll(&mut self) {
        let len = match tokio::fs::metadata(&self.history_path).await {
            Ok(meta) => meta.len(),
            Err(_) => return,
        };

        if len < self.cursor {
            // history was rewritten or truncated
            self.cursor = 0;
        }
        if len == self.cursor {
            return;
        }

        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = match tokio::fs::File::open(&self.history_path).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("cannot open history file: {}", e);
                return;
            }
        };
        if file.seek(std::io::SeekFrom::Start(self.cursor)).await.is_err() {
            return;
        }

        let mut buf = Vec::with_capacity((len - self.cursor) as usize);
        if file.read_to_end(&mut buf).await.is_err() {
            return;
        }
        self.cursor = len;

        let text = String::from_utf8_lossy(&buf);
        for line in text.lines() {
            capture_line(&self.chronicle, line, "shell_live");
        }
    }
}

/// Spawn a live shell-history watcher on the current runtime
pub fn spawn_shell_watcher(
    chronicle: Chronicle,
    history_path: PathBuf,
    poll_interval: Duration,
) -> WatcherHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = ShellHistoryWatcher::new(chronicle, history_path, poll_interval);
    let join = tokio::spawn(watcher.run(shutdown_rx));
    WatcherHandle::new(shutdown_tx, join)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_buckets() {
        assert!(classify_command("git push origin main").contains(&"git".to_string()));
        assert!(classify_command("docker compose up").contains(&"devops".to_string()));
        assert!(classify_command("cargo test --all").contains(&"testing".to_string()));
        assert!(classify_command("npm run build").contains(&"nodejs".to_string()));
        assert_eq!(classify_command("vim notes.txt"), vec!["shell".to_string()]);
    }

    #[test]
    fn backfill_skips_blanks_and_comments() {
        let chronicle = Chronicle::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("history");
        std::fs::write(&history, "ls -la\n\n#1700000000\ngit status\n").unwrap();

        let captured = backfill_history(&chronicle, &history).unwrap();
        assert_eq!(captured, 2);
        assert_eq!(chronicle.count().unwrap(), 2);
    }

    #[test]
    fn backfill_missing_file_is_empty() {
        let chronicle = Chronicle::open_in_memory().unwrap();
        let captured =
            backfill_history(&chronicle, Path::new("/nonexistent/history")).unwrap();
        assert_eq!(captured, 0);
    }
}
