use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Local, Utc};
use log::{info, warn};
use snapinator_config::EngineConfig;
use snapinator_models::core::Task;
use tokio::time;

use crate::{
    artifact::{self, Artifact},
    backend::{CaptureBackend, RenderRequest},
    errors::CaptureError,
};

/// Extra time on top of load timeout and settle delay for the screenshot itself.
const SCREENSHOT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub load_timeout: Duration,
    pub settle_delay: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub screenshot_grace: Duration,
}

impl CaptureOptions {
    /// Wall-clock budget for a single render attempt.
    pub fn attempt_budget(&self) -> Duration {
        self.load_timeout + self.settle_delay + self.screenshot_grace
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        CaptureOptions {
            load_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
            max_attempts: 1,
            retry_backoff: Duration::from_secs(5),
            screenshot_grace: SCREENSHOT_GRACE,
        }
    }
}

impl From<&EngineConfig> for CaptureOptions {
    fn from(config: &EngineConfig) -> Self {
        CaptureOptions {
            load_timeout: config.load_timeout(),
            settle_delay: config.settle_delay(),
            max_attempts: config.capture_attempts.max(1),
            retry_backoff: config.retry_backoff(),
            screenshot_grace: SCREENSHOT_GRACE,
        }
    }
}

/// Stateless capture pipeline: (task, instant) -> artifact.
#[derive(Clone)]
pub struct CaptureExecutor {
    backend: Arc<dyn CaptureBackend>,
    options: CaptureOptions,
}

impl CaptureExecutor {
    pub fn new(backend: Arc<dyn CaptureBackend>, options: CaptureOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub async fn capture(&self, task: &Task, at: DateTime<Local>) -> Result<Artifact, CaptureError> {
        let output_dir = PathBuf::from(&task.output_path);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|err| CaptureError::write(&output_dir, err))?;

        info!("Capturing {} for task {}", task.url, task.id);
        let request =
            RenderRequest::for_task(task, self.options.load_timeout, self.options.settle_delay);
        let image = self.render_with_retry(&task.id, &request).await?;
        if !artifact::is_png(&image) {
            return Err(CaptureError::Browser(format!(
                "backend returned {} bytes that are not a PNG image",
                image.len()
            )));
        }

        let file_name = artifact::artifact_file_name(&task.id, &at);
        let path = artifact::publish(&output_dir, &file_name, &image).await?;
        info!("Saved {}", path.display());

        Ok(Artifact {
            task_id: task.id.clone(),
            path,
            captured_at: at.with_timezone(&Utc),
            size_bytes: image.len() as u64,
        })
    }

    async fn render_with_retry(
        &self,
        task_id: &str,
        request: &RenderRequest,
    ) -> Result<Vec<u8>, CaptureError> {
        let attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.render_once(request).await {
                Ok(image) => return Ok(image),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(
                        "Attempt {}/{} for task {} failed: {}; retrying in {:?}",
                        attempt, attempts, task_id, err, self.options.retry_backoff
                    );
                    time::sleep(self.options.retry_backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn render_once(&self, request: &RenderRequest) -> Result<Vec<u8>, CaptureError> {
        match time::timeout(self.options.attempt_budget(), self.backend.render(request)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(self.options.attempt_budget())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        fs,
        sync::atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nimage";

    struct StaticBackend(Vec<u8>);

    #[async_trait]
    impl CaptureBackend for StaticBackend {
        async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, CaptureError> {
            Ok(self.0.clone())
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl CaptureBackend for SlowBackend {
        async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, CaptureError> {
            time::sleep(Duration::from_secs(30)).await;
            Ok(PNG.to_vec())
        }
    }

    /// Fails with a network error until `failures` attempts have been made.
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CaptureBackend for FlakyBackend {
        async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, CaptureError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(CaptureError::Network {
                    url: request.url.clone(),
                    message: "connection refused".into(),
                });
            }
            Ok(PNG.to_vec())
        }
    }

    fn task(output: &std::path::Path) -> Task {
        Task {
            id: "task-1".into(),
            url: "https://example.com".into(),
            cron_schedule: "* * * * *".into(),
            output_path: output.to_string_lossy().into_owned(),
            width: 1024,
            height: 768,
            full_page: true,
            enabled: true,
            extra: BTreeMap::new(),
        }
    }

    fn fast_options(max_attempts: u32) -> CaptureOptions {
        CaptureOptions {
            load_timeout: Duration::from_millis(100),
            settle_delay: Duration::ZERO,
            max_attempts,
            retry_backoff: Duration::from_millis(10),
            screenshot_grace: Duration::from_millis(50),
        }
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn successful_capture_publishes_named_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("shots");
        let executor = CaptureExecutor::new(Arc::new(StaticBackend(PNG.to_vec())), fast_options(1));

        let artifact = executor.capture(&task(&output), at()).await.unwrap();

        assert_eq!(artifact.path, output.join("task-1_20240601_120000.png"));
        assert_eq!(artifact.size_bytes, PNG.len() as u64);
        assert_eq!(fs::read(&artifact.path).unwrap(), PNG);
    }

    #[tokio::test]
    async fn timeout_leaves_no_artifact_behind() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CaptureExecutor::new(Arc::new(SlowBackend), fast_options(3));

        let err = executor.capture(&task(dir.path()), at()).await.unwrap_err();

        assert!(matches!(err, CaptureError::Timeout(_)), "got {err:?}");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unwritable_output_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();
        let executor = CaptureExecutor::new(Arc::new(StaticBackend(PNG.to_vec())), fast_options(1));

        let err = executor
            .capture(&task(&blocker.join("shots")), at())
            .await
            .unwrap_err();

        assert!(matches!(err, CaptureError::Write { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn network_failures_are_retried_up_to_the_attempt_limit() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FlakyBackend {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let executor = CaptureExecutor::new(backend.clone(), fast_options(3));

        executor.capture(&task(dir.path()), at()).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_attempt_reports_the_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FlakyBackend {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let executor = CaptureExecutor::new(backend.clone(), fast_options(1));

        let err = executor.capture(&task(dir.path()), at()).await.unwrap_err();
        assert!(matches!(err, CaptureError::Network { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_png_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let executor =
            CaptureExecutor::new(Arc::new(StaticBackend(b"<html>".to_vec())), fast_options(1));

        let err = executor.capture(&task(dir.path()), at()).await.unwrap_err();
        assert!(matches!(err, CaptureError::Browser(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
