//! Headless-browser capture pipeline: render a task's URL, publish the PNG atomically.

pub mod artifact;
pub mod backend;
mod errors;
pub mod executor;
pub mod webdriver;

pub use artifact::Artifact;
pub use backend::{CaptureBackend, RenderRequest};
pub use errors::CaptureError;
pub use executor::{CaptureExecutor, CaptureOptions};
pub use webdriver::WebDriverBackend;
