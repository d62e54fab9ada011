//! Directory watcher: polling snapshot of file modification times
//!
//! Captures a summary record when a watched file appears or changes.
//! The snapshot (path -> mtime) is the watcher's cursor; no filesystem
//! event APIs, just periodic comparison.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;

use super::WatcherHandle;
use crate::chronicle::Chronicle;

/// Polls a directory tree and records file creations and modifications
pub struct DirWatcher {
    chronicle: Chronicle,
    root: PathBuf,
    /// Extensions to watch (with leading dot); empty = all files
    extensions: Vec<String>,
    poll_interval: Duration,
    seen: HashMap<PathBuf, SystemTime>,
}

impl DirWatcher {
    pub fn new(
        chronicle: Chronicle,
        root: PathBuf,
        extensions: Vec<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            chronicle,
            root,
            extensions,
            poll_interval,
            seen: HashMap::new(),
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
                    self.poll();
                }
            }
        }
        tracing::debug!("dir watcher stopped");
    }

    fn poll(&mut self) {
        let mut files = Vec::new();
        collect_files(&self.root, &mut files);

        for (path, mtime) in files {
            if !self.wants(&path) {
                continue;
            }
            match self.seen.get(&path) {
                Some(&prev) if prev < mtime => {
                    self.capture(&path, "modified");
                    self.seen.insert(path, mtime);
                }
                Some(_) => {}
                None => {
                    self.capture(&path, "created");
                    self.seen.insert(path, mtime);
                }
            }
        }
    }

    fn wants(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.extensions.iter().any(|want| *want == ext)
    }

    fn capture(&self, path: &Path, change: &str) {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("cannot read {}: {}", path.display(), e);
                return;
            }
        };
        let content = String::from_utf8_lossy(&raw);
        if content.trim().is_empty() {
            return;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let summary = format!(
            "{}: {} ({} lines)",
            change.to_uppercase(),
            name,
            content.lines().count()
        );

        let mut tags = vec!["file".to_string(), change.to_string()];
        if let Some(ext) = path.extension() {
            tags.push(ext.to_string_lossy().to_string());
        }

        let mut metadata = HashMap::new();
        metadata.insert(
            "path".to_string(),
            serde_json::Value::String(path.display().to_string()),
        );
        metadata.insert("size".to_string(), serde_json::json!(content.len()));

        if let Err(e) = self
            .chronicle
            .remember(&summary, &tags, "file_watcher", &metadata)
        {
            tracing::warn!("failed to capture {}: {}", path.display(), e);
        }
    }
}

fn collect_files(dir: &Path, out: &mut Vec<(PathBuf, SystemTime)>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("cannot list {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if let Ok(meta) = entry.metadata() {
            if let Ok(mtime) = meta.modified() {
                out.push((path, mtime));
            }
        }
    }
}

/// Spawn a directory watcher on the current runtime
pub fn spawn_dir_watcher(
    chronicle: Chronicle,
    root: PathBuf,
    extensions: Vec<String>,
    poll_interval: Duration,
) -> WatcherHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = DirWatcher::new(chronicle, root, extensions, poll_interval);
    let join = tokio::spawn(watcher.run(shutdown_rx));
    WatcherHandle::new(shutdown_tx, join)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_captures_existing_files() {
        let chronicle = Chronicle::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "hello\nworld\n").unwrap();
        std::fs::write(dir.path().join("image.bin"), "xx").unwrap();

        let mut watcher = DirWatcher::new(
            chronicle.clone(),
            dir.path().to_path_buf(),
            vec![".md".to_string()],
            Duration::from_secs(1),
        );
        watcher.poll();

        let records = chronicle.recent(10).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].content.starts_with("CREATED: notes.md"));
        assert!(records[0].tags.contains(&"file".to_string()));
    }

    #[test]
    fn modification_captured_once_per_change() {
        let chronicle = Chronicle::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("log.txt");
        std::fs::write(&file, "one\n").unwrap();

        let mut watcher = DirWatcher::new(
            chronicle.clone(),
            dir.path().to_path_buf(),
            vec![],
            Duration::from_secs(1),
        );
        watcher.poll();
        // unchanged: second poll records nothing new
        watcher.poll();
        assert_eq!(chronicle.count().unwrap(), 1);

        std::fs::write(&file, "one\ntwo\n").unwrap();
        // ensure a newer mtime is visible even on coarse filesystems
        let newer = SystemTime::now() + Duration::from_secs(2);
        let _ = filetime_set(&file, newer);
        watcher.poll();

        let records = chronicle.recent(10).unwrap();
        assert!(records
            .iter()
            .any(|r| r.content.starts_with("MODIFIED: log.txt")));
    }

    fn filetime_set(path: &Path, to: SystemTime) -> std::io::Result<()> {
        let file = std::fs::OpenOptions::new().append(true).open(path)?;
        file.set_modified(to)
    }
}
