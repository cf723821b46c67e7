//! Task definitions backed by the config document.
//!
//! Every mutation works on a clone of the document, validates it, writes it to
//! disk and only then swaps it in, so a failed write leaves memory untouched.

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use log::{debug, info};
use parking_lot::Mutex;
use snapinator_config::{paths, ConfigDocument, Settings};
use snapinator_models::core::{Task, TaskSpec};
use url::Url;
use uuid::Uuid;

use crate::{errors::RegistryError, schedule::CronSchedule};

pub struct TaskRegistry {
    path: PathBuf,
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    document: ConfigDocument,
    modified: Option<SystemTime>,
}

impl TaskRegistry {
    /// Loads the document at `path`, starting empty when the file does not exist yet.
    ///
    /// Persisted tasks are not re-validated here; the scheduler skips the ones
    /// whose schedule no longer parses.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let document = ConfigDocument::load(&path)?;
        info!("Loaded {} task(s) from {}", document.tasks.len(), path.display());
        Ok(TaskRegistry {
            inner: Mutex::new(RegistryInner {
                document,
                modified: paths::modified_at(&path),
            }),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&self, spec: TaskSpec) -> Result<Task, RegistryError> {
        self.mutate(|document| {
            let id = Uuid::new_v4().to_string();
            let task = build_task(id, spec, &document.settings())?;
            document.tasks.push(task.clone());
            Ok(task)
        })
        .inspect(|task| info!("Added task {} ({})", task.id, task.url))
    }

    /// Replaces the definition of `id`, keeping its identifier and any unknown fields.
    pub fn update(&self, id: &str, spec: TaskSpec) -> Result<Task, RegistryError> {
        self.mutate(|document| {
            let settings = document.settings();
            let slot = find_mut(document, id)?;
            let mut task = build_task(id.to_string(), spec, &settings)?;
            task.extra = std::mem::take(&mut slot.extra);
            *slot = task.clone();
            Ok(task)
        })
        .inspect(|task| info!("Updated task {}", task.id))
    }

    pub fn remove(&self, id: &str) -> Result<Task, RegistryError> {
        self.mutate(|document| {
            let index = document
                .tasks
                .iter()
                .position(|task| task.id == id)
                .ok_or_else(|| not_found(id))?;
            Ok(document.tasks.remove(index))
        })
        .inspect(|task| info!("Removed task {}", task.id))
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Task, RegistryError> {
        self.mutate(|document| {
            let task = find_mut(document, id)?;
            task.enabled = enabled;
            Ok(task.clone())
        })
        .inspect(|task| info!("Task {} enabled={}", task.id, task.enabled))
    }

    pub fn get(&self, id: &str) -> Result<Task, RegistryError> {
        self.inner
            .lock()
            .document
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    pub fn list(&self) -> Vec<Task> {
        self.inner.lock().document.tasks.clone()
    }

    pub fn settings(&self) -> Settings {
        self.inner.lock().document.settings()
    }

    pub fn update_settings(&self, settings: Settings) -> Result<(), RegistryError> {
        if settings.default_width == 0 || settings.default_height == 0 {
            return Err(RegistryError::InvalidDimensions {
                width: settings.default_width,
                height: settings.default_height,
            });
        }
        self.mutate(|document| {
            document.apply_settings(settings);
            Ok(())
        })
    }

    /// Reloads the document if the file changed since we last read or wrote it.
    pub fn refresh_if_changed(&self) -> Result<bool, RegistryError> {
        let modified = paths::modified_at(&self.path);
        let mut inner = self.inner.lock();
        if modified == inner.modified {
            return Ok(false);
        }
        inner.document = ConfigDocument::load(&self.path)?;
        inner.modified = modified;
        debug!("Reloaded {} after external change", self.path.display());
        Ok(true)
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut ConfigDocument) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut inner = self.inner.lock();
        let mut draft = inner.document.clone();
        let value = apply(&mut draft)?;
        draft.save(&self.path)?;
        inner.document = draft;
        inner.modified = paths::modified_at(&self.path);
        Ok(value)
    }
}

fn find_mut<'a>(document: &'a mut ConfigDocument, id: &str) -> Result<&'a mut Task, RegistryError> {
    document
        .tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or_else(|| not_found(id))
}

fn not_found(id: &str) -> RegistryError {
    RegistryError::NotFound { id: id.to_string() }
}

/// Validates `spec` and fills omitted fields from the global settings.
fn build_task(id: String, spec: TaskSpec, settings: &Settings) -> Result<Task, RegistryError> {
    let url = validate_url(&spec.url)?;
    let schedule = CronSchedule::parse(&spec.cron_schedule)?;

    let width = spec.width.unwrap_or(settings.default_width);
    let height = spec.height.unwrap_or(settings.default_height);
    if width == 0 || height == 0 {
        return Err(RegistryError::InvalidDimensions { width, height });
    }

    let output_path = spec
        .output_path
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| settings.output_directory.clone());

    Ok(Task {
        id,
        url,
        cron_schedule: schedule.expression().to_string(),
        output_path,
        width,
        height,
        full_page: spec.full_page,
        enabled: spec.enabled,
        extra: Default::default(),
    })
}

fn validate_url(raw: &str) -> Result<String, RegistryError> {
    let raw = raw.trim();
    let invalid = |reason: &str| RegistryError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(raw).map_err(|err| invalid(&err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().map_or(true, str::is_empty) => {
            Err(invalid("missing host"))
        }
        "http" | "https" | "file" => Ok(raw.to_string()),
        other => Err(invalid(&format!("unsupported scheme '{other}'"))),
    }
}
