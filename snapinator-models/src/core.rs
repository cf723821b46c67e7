use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;

/// A persisted capture definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub url: String,
    pub cron_schedule: String,
    pub output_path: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_true")]
    pub full_page: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fields written by other tools that we don't interpret but must keep.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Caller-supplied input for creating or replacing a task.
///
/// Dimensions and output path fall back to the global settings when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub url: String,
    pub cron_schedule: String,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default = "default_true")]
    pub full_page: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TaskSpec {
    pub fn new(url: impl Into<String>, cron_schedule: impl Into<String>) -> Self {
        TaskSpec {
            url: url.into(),
            cron_schedule: cron_schedule.into(),
            output_path: None,
            width: None,
            height: None,
            full_page: true,
            enabled: true,
        }
    }
}

impl From<&Task> for TaskSpec {
    fn from(task: &Task) -> Self {
        TaskSpec {
            url: task.url.clone(),
            cron_schedule: task.cron_schedule.clone(),
            output_path: Some(task.output_path.clone()),
            width: Some(task.width),
            height: Some(task.height),
            full_page: task.full_page,
            enabled: task.enabled,
        }
    }
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_defaults_match_original_app() {
        let task: Task = serde_json::from_str(
            r#"{"id":"a","url":"https://example.com","cron_schedule":"0 * * * *","output_path":"/tmp"}"#,
        )
        .unwrap();
        assert_eq!(task.width, 1920);
        assert_eq!(task.height, 1080);
        assert!(task.full_page);
        assert!(task.enabled);
        assert!(task.extra.is_empty());
    }

    #[test]
    fn unknown_task_fields_survive_a_rewrite() {
        let raw = r#"{"id":"a","url":"https://example.com","cron_schedule":"0 * * * *",
            "output_path":"/tmp","width":800,"height":600,"full_page":false,"enabled":true,
            "label":"front page"}"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert_eq!(task.extra.get("label"), Some(&Value::from("front page")));

        let written = serde_json::to_value(&task).unwrap();
        assert_eq!(written["label"], "front page");
        assert_eq!(written["width"], 800);
    }
}
