use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use log::debug;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use snapinator_models::core::{Task, DEFAULT_HEIGHT, DEFAULT_WIDTH};

use crate::{errors::ConfigError, paths};

/// The persisted config file: task list plus global settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default = "default_true")]
    pub dark_mode: bool,
    #[serde(default = "default_output_directory")]
    pub output_directory: String,
    #[serde(default = "default_width")]
    pub default_width: u32,
    #[serde(default = "default_height")]
    pub default_height: u32,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Global settings without the task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub dark_mode: bool,
    pub output_directory: String,
    pub default_width: u32,
    pub default_height: u32,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        ConfigDocument {
            tasks: Vec::new(),
            dark_mode: true,
            output_directory: default_output_directory(),
            default_width: DEFAULT_WIDTH,
            default_height: DEFAULT_HEIGHT,
            window_width: default_window_width(),
            window_height: default_window_height(),
            extra: BTreeMap::new(),
        }
    }
}

impl ConfigDocument {
    /// Reads the document at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Ok(ConfigDocument::default())
            }
            Err(err) => Err(ConfigError::io(path, err)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        write_json_atomic(path, self)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            dark_mode: self.dark_mode,
            output_directory: self.output_directory.clone(),
            default_width: self.default_width,
            default_height: self.default_height,
            window_width: self.window_width,
            window_height: self.window_height,
        }
    }

    pub fn apply_settings(&mut self, settings: Settings) {
        self.dark_mode = settings.dark_mode;
        self.output_directory = settings.output_directory;
        self.default_width = settings.default_width;
        self.default_height = settings.default_height;
        self.window_width = settings.window_width;
        self.window_height = settings.window_height;
    }
}

/// Serializes `value` to a sibling temp file, fsyncs it and renames it over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let body = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| ConfigError::io(parent, err))?;
    }

    let temp = path.with_extension("json.tmp");
    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(&body)?;
        file.sync_all()
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&temp);
        return Err(ConfigError::io(&temp, err));
    }

    fs::rename(&temp, path).map_err(|err| {
        let _ = fs::remove_file(&temp);
        ConfigError::io(path, err)
    })
}

/// Reads a JSON file, returning `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ConfigError::io(path, err)),
    }
}

fn default_true() -> bool {
    true
}

fn default_output_directory() -> String {
    paths::default_output_dir().to_string_lossy().into_owned()
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}
