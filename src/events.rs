// src/events.rs
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Append-only journal of what a run did, one JSON object per line.
///
/// Journal failures are logged and swallowed; they never affect a run.
#[derive(Debug, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, lock: Mutex::new(()) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn record(&self, run_id: Uuid, event: &str, details: Value) {
        let Some(path) = &self.path else { return };

        let mut entry = Map::new();
        entry.insert("timestamp".to_string(), Value::String(chrono::Utc::now().to_rfc3339()));
        entry.insert("event".to_string(), Value::String(event.to_string()));
        entry.insert("run_id".to_string(), Value::String(run_id.to_string()));
        if let Value::Object(fields) = details {
            entry.extend(fields);
        } else if !details.is_null() {
            entry.insert("details".to_string(), details);
        }

        let line = Value::Object(entry).to_string();
        if let Err(e) = self.append(path, &line).await {
            log::warn!("Could not write event '{}' to {}: {}", event, path.display(), e);
        }
    }

    async fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        // Held across the whole append so concurrent runs never interleave lines.
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.log");
        let log = EventLog::new(Some(path.clone()));
        let run_id = Uuid::new_v4();

        log.record(run_id, "RUN_START", json!({"url": "https://q.example/1"})).await;
        log.record(run_id, "RUN_END", json!({"detail": "Quiz Completed"})).await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "RUN_START");
        assert_eq!(lines[0]["url"], "https://q.example/1");
        assert_eq!(lines[1]["run_id"], run_id.to_string());
    }

    #[tokio::test]
    async fn disabled_log_writes_nothing() {
        let log = EventLog::disabled();
        log.record(Uuid::new_v4(), "RUN_START", json!({})).await;
        assert!(log.path().is_none());
    }

    #[tokio::test]
    async fn unwritable_path_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let log = EventLog::new(Some(dir.path().to_path_buf()));
        log.record(Uuid::new_v4(), "RUN_START", json!({})).await;
    }

    #[tokio::test]
    async fn concurrent_records_stay_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let log = std::sync::Arc::new(EventLog::new(Some(path.clone())));
        let code = "x".repeat(64 * 1024);

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let log = std::sync::Arc::clone(&log);
                let code = code.clone();
                tokio::spawn(async move {
                    log.record(Uuid::new_v4(), "CODE_GENERATED", json!({"attempt": i, "code": code}))
                        .await;
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 8);
        assert!(lines.iter().all(|l| l["code"].as_str().map(str::len) == Some(64 * 1024)));
    }
}
