// src/persist/mod.rs

//! Persistence collaborator: tasks, settings and session cookies on disk.
//!
//! Layout of a data directory:
//!
//! - `tasks.json`    task list (JSON array)
//! - `settings.toml` settings (see [`crate::config`])
//! - `cookies.json`  last session cookies
//!
//! A missing file loads as the empty/default value. A present but corrupt
//! file is an error; the caller decides whether to continue.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{self, Settings};
use crate::errors::{PunchclockError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::portal::Cookie;
use crate::task::Task;

pub const TASKS_FILE: &str = "tasks.json";
pub const SETTINGS_FILE: &str = "settings.toml";
pub const COOKIES_FILE: &str = "cookies.json";

/// What the core needs from storage.
pub trait Persistence: Send + Sync {
    fn load_tasks(&self) -> Result<Vec<Task>>;
    fn save_tasks(&self, tasks: &[Task]) -> Result<()>;
    fn load_settings(&self) -> Result<Settings>;
    fn save_settings(&self, settings: &Settings) -> Result<()>;
    fn load_cookies(&self) -> Result<Vec<Cookie>>;
    fn save_cookies(&self, cookies: &[Cookie]) -> Result<()>;
}

/// File-backed store rooted at one data directory.
#[derive(Debug, Clone)]
pub struct FileStore<F: FileSystem = RealFileSystem> {
    fs: F,
    tasks_path: PathBuf,
    settings_path: PathBuf,
    cookies_path: PathBuf,
}

impl FileStore<RealFileSystem> {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::with_fs(RealFileSystem, data_dir)
    }
}

impl<F: FileSystem> FileStore<F> {
    pub fn with_fs(fs: F, data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self {
            fs,
            tasks_path: dir.join(TASKS_FILE),
            settings_path: dir.join(SETTINGS_FILE),
            cookies_path: dir.join(COOKIES_FILE),
        }
    }

    /// Read settings from somewhere other than the data directory.
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        if !self.fs.exists(path) {
            debug!(path = %path.display(), "no file yet; using defaults");
            return Ok(None);
        }
        Ok(Some(self.fs.read_to_string(path)?))
    }
}

impl<F: FileSystem> Persistence for FileStore<F> {
    fn load_tasks(&self) -> Result<Vec<Task>> {
        let Some(contents) = self.read_optional(&self.tasks_path)? else {
            return Ok(Vec::new());
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let tasks: Vec<Task> = serde_json::from_str(&contents)?;
        debug!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        let json = serde_json::to_vec_pretty(tasks)?;
        self.fs.write(&self.tasks_path, &json)?;
        debug!(count = tasks.len(), "saved tasks");
        Ok(())
    }

    fn load_settings(&self) -> Result<Settings> {
        match self.read_optional(&self.settings_path)? {
            Some(contents) => config::parse_and_validate(&contents).map_err(|e| {
                PunchclockError::ConfigError(format!(
                    "{}: {e}",
                    self.settings_path.display()
                ))
            }),
            None => Ok(Settings::default()),
        }
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        let toml = config::loader::to_toml_string(settings)?;
        self.fs.write(&self.settings_path, toml.as_bytes())?;
        Ok(())
    }

    fn load_cookies(&self) -> Result<Vec<Cookie>> {
        let Some(contents) = self.read_optional(&self.cookies_path)? else {
            return Ok(Vec::new());
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let json = serde_json::to_vec_pretty(cookies)?;
        self.fs.write(&self.cookies_path, &json)?;
        debug!(count = cookies.len(), "saved cookies");
        Ok(())
    }
}
