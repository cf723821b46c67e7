use std::time::Duration;

use async_trait::async_trait;
use snapinator_models::core::Task;

use crate::errors::CaptureError;

/// Everything a browser needs to render one page.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub full_page: bool,
    pub load_timeout: Duration,
    pub settle_delay: Duration,
}

impl RenderRequest {
    pub fn for_task(task: &Task, load_timeout: Duration, settle_delay: Duration) -> Self {
        RenderRequest {
            url: task.url.clone(),
            width: task.width,
            height: task.height,
            full_page: task.full_page,
            load_timeout,
            settle_delay,
        }
    }
}

/// Browser automation capable of turning a [`RenderRequest`] into PNG bytes.
///
/// Implementations must not keep session state between calls; the executor
/// invokes them concurrently for different tasks.
#[async_trait]
pub trait CaptureBackend: Send + Sync + 'static {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, CaptureError>;
}
