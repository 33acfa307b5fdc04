// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawSettings, Settings};
use crate::errors::Result;

/// Load a settings file from a given path and return the raw `RawSettings`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawSettings> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawSettings = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a settings file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks thresholds, ranges, URLs and marker regexes.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Settings> {
    let raw = load_from_path(&path)?;
    let settings = Settings::try_from(raw)?;
    Ok(settings)
}

/// Same as [`load_and_validate`] for settings already read into memory.
pub fn parse_and_validate(contents: &str) -> Result<Settings> {
    let raw: RawSettings = toml::from_str(contents)?;
    Settings::try_from(raw)
}

/// Render settings back to TOML.
pub fn to_toml_string(settings: &Settings) -> Result<String> {
    Ok(toml::to_string_pretty(settings)?)
}

/// Directory holding settings, tasks and cookies.
///
/// `$XDG_DATA_HOME/punchclock` (or the platform equivalent), falling back
/// to `.punchclock` in the working directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("punchclock"))
        .unwrap_or_else(|| PathBuf::from(".punchclock"))
}
