//! Structured per-candidate campaign event log (SPEC_FULL.md §2), teezz's
//! analogue of `cognitod`'s `handler::JsonlHandler`: one JSON line per
//! event, appended to `event.log`, so a campaign can be tailed live or
//! diffed across runs without re-parsing `stats.json`.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Result, TeezzError};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CampaignEvent<'a> {
    Crash { candidate: &'a str, sequences: u64 },
    NewCoverage { candidate: &'a str, tuples: usize },
    CrashTimeout { candidate: &'a str },
    DeviceReset { outcome: &'a str },
}

pub struct EventLog {
    file: Arc<Mutex<tokio::fs::File>>,
}

impl EventLog {
    /// Synchronous so it can be called from `FuzzCampaign::bootstrap`
    /// without requiring it to become an `async fn`; the handle itself
    /// is written through asynchronously.
    pub fn open(path: &Path) -> Result<Self> {
        let std_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TeezzError::io(path, e))?;
        Ok(EventLog {
            file: Arc::new(Mutex::new(tokio::fs::File::from_std(std_file))),
        })
    }

    /// Best-effort: a failed write here must never take down the fuzz
    /// loop, so errors are swallowed rather than propagated.
    pub async fn record(&self, event: &CampaignEvent<'_>) {
        if let Ok(json) = serde_json::to_string(event) {
            let mut f = self.file.lock().await;
            let _ = f.write_all(json.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_record_call_appends_one_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.log");
        let log = EventLog::open(&path).unwrap();

        log.record(&CampaignEvent::Crash { candidate: "id:00000001,time:00000000", sequences: 3 }).await;
        log.record(&CampaignEvent::NewCoverage { candidate: "id:00000002,time:00000001", tuples: 2 }).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"kind\":\"crash\""));
        assert!(lines[1].contains("\"kind\":\"new_coverage\""));
    }
}
