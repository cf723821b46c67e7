pub mod document;
mod errors;
pub mod paths;

use std::time::Duration;

use clap::{Args, ValueEnum};

pub use document::{ConfigDocument, Settings};
pub use errors::ConfigError;

/// Browser driven through the WebDriver endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Browser {
    Chrome,
    Firefox,
}

/// Engine tuning flags shared by the daemon and the one-off capture command.
#[derive(Args, Debug, Clone)]
pub struct EngineConfig {
    /// Scheduler tick interval.
    #[arg(long, default_value_t = 1000)]
    pub tick_millis: u64,

    /// WebDriver endpoint (chromedriver listens on 9515 by default).
    #[arg(long, default_value = "http://localhost:9515")]
    pub webdriver_url: String,

    #[arg(long, value_enum, default_value_t = Browser::Chrome)]
    pub browser: Browser,

    /// Page load timeout per capture.
    #[arg(long, default_value_t = 30)]
    pub load_timeout_seconds: u64,

    /// Delay between page load and screenshot for dynamic content.
    #[arg(long, default_value_t = 2000)]
    pub settle_delay_millis: u64,

    /// Attempts per run; only network failures are retried.
    #[arg(long, default_value_t = 1)]
    pub capture_attempts: u32,

    #[arg(long, default_value_t = 5)]
    pub retry_backoff_seconds: u64,

    #[arg(long, default_value_t = 4)]
    pub max_concurrent_captures: usize,

    /// Run records kept per task.
    #[arg(long, default_value_t = 50)]
    pub history_limit: usize,
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(10))
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_seconds.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_millis)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_millis: 1000,
            webdriver_url: "http://localhost:9515".to_string(),
            browser: Browser::Chrome,
            load_timeout_seconds: 30,
            settle_delay_millis: 2000,
            capture_attempts: 1,
            retry_backoff_seconds: 5,
            max_concurrent_captures: 4,
            history_limit: 50,
        }
    }
}
