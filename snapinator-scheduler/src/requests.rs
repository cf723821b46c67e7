//! Manual capture requests handed from the command line to a running daemon.

use std::{
    ffi::OsStr,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use snapinator_config::{
    document::{read_json, write_json_atomic},
    ConfigError,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub task_id: String,
    pub requested_at: DateTime<Utc>,
    /// Pid of the submitting process.
    pub requested_by: u32,
}

/// A directory of pending requests, one JSON file each.
///
/// Requests are published with a temp-file rename, so `drain` never reads a
/// partial file.
pub struct RequestInbox {
    dir: PathBuf,
}

impl RequestInbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        RequestInbox { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn submit(&self, task_id: &str) -> Result<PathBuf, ConfigError> {
        let request = CaptureRequest {
            task_id: task_id.to_string(),
            requested_at: Utc::now(),
            requested_by: std::process::id(),
        };
        let path = self.dir.join(format!("{}.json", Uuid::new_v4()));
        write_json_atomic(&path, &request)?;
        debug!("Queued capture of task {} at {}", task_id, path.display());
        Ok(path)
    }

    /// Takes every pending request, oldest first.
    ///
    /// A request is returned only once its file is removed. Unreadable files
    /// are logged and discarded.
    pub fn drain(&self) -> Vec<CaptureRequest> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!("Unable to read capture requests in {}: {}", self.dir.display(), err);
                return Vec::new();
            }
        };

        let mut requests = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension() != Some(OsStr::new("json")) {
                continue;
            }

            let request = match read_json::<CaptureRequest>(&path) {
                Ok(Some(request)) => Some(request),
                Ok(None) => continue,
                Err(err) => {
                    warn!("Discarding capture request {}: {}", path.display(), err);
                    None
                }
            };
            match fs::remove_file(&path) {
                Ok(()) => requests.extend(request),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("Unable to remove capture request {}: {}", path.display(), err),
            }
        }

        requests.sort_by_key(|request| request.requested_at);
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submitted_requests_are_drained_once_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = RequestInbox::new(dir.path().join("requests"));

        let first = inbox.submit("a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = inbox.submit("b").unwrap();
        assert!(first.exists() && second.exists());

        let drained = inbox.drain();
        let ids: Vec<&str> = drained.iter().map(|request| request.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(drained[0].requested_by, std::process::id());
        assert!(inbox.drain().is_empty());
        assert_eq!(fs::read_dir(inbox.dir()).unwrap().count(), 0);
    }

    #[test]
    fn missing_directory_is_an_empty_inbox() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RequestInbox::new(dir.path().join("absent")).drain().is_empty());
    }

    #[test]
    fn malformed_requests_are_discarded_and_temp_files_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = RequestInbox::new(dir.path());
        fs::write(dir.path().join("broken.json"), b"{nope").unwrap();
        fs::write(dir.path().join("pending.json.tmp"), b"{}").unwrap();
        inbox.submit("ok").unwrap();

        let drained = inbox.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].task_id, "ok");
        assert!(!dir.path().join("broken.json").exists());
        assert!(dir.path().join("pending.json.tmp").exists());
    }
}
