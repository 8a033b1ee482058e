//! Application configuration.
//!
//! Values come from built-in defaults, an optional TOML file and finally the
//! command line (see [`crate::cli`]), in that order of precedence.

use std::{
  fs,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Startup configuration of an [`crate::Application`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Window title.
  pub name:      String,
  /// Initial framebuffer width in physical pixels.
  pub width:     u32,
  /// Initial framebuffer height in physical pixels.
  pub height:    u32,
  /// Wait for vertical blank when presenting.
  pub vsync:     bool,
  /// Start with a maximized window.
  pub maximized: bool,
  /// TTF file used as the proportional UI font.
  pub font_path: Option<PathBuf>,
  /// UI body text size in points.
  pub font_size: f32,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      name:      "Model Viewer".to_string(),
      width:     1280,
      height:    720,
      vsync:     true,
      maximized: false,
      font_path: None,
      font_size: 18.0,
    }
  }
}

impl AppConfig {
  /// Reads and validates a TOML config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::from_toml_str(&text)?;
    log::debug!("loaded config from {}", path.display());
    Ok(config)
  }

  /// Parses and validates TOML text. Missing keys keep their defaults.
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.width == 0 || self.height == 0 {
      return Err(ConfigError::Validation(format!(
        "window size must be non-zero, got {}x{}",
        self.width, self.height
      )));
    }
    if !(self.font_size > 0.0) {
      return Err(ConfigError::Validation(format!(
        "font_size must be positive, got {}",
        self.font_size
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_keys_keep_defaults() {
    let config = AppConfig::from_toml_str("name = \"Viewer\"\nwidth = 1600\nheight = 900\n").unwrap();
    assert_eq!(config.name, "Viewer");
    assert_eq!((config.width, config.height), (1600, 900));
    assert!(config.vsync);
    assert_eq!(config.font_size, 18.0);
  }

  #[test]
  fn zero_sized_window_is_rejected() {
    let err = AppConfig::from_toml_str("width = 0").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
  }

  #[test]
  fn malformed_toml_is_a_parse_error() {
    let err = AppConfig::from_toml_str("width = \"wide\"").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
  }

  #[test]
  fn load_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("viewer.toml");
    fs::write(&path, "vsync = false\nfont_size = 14.0\n").unwrap();

    let config = AppConfig::load(&path).unwrap();
    assert!(!config.vsync);
    assert_eq!(config.font_size, 14.0);

    let missing = AppConfig::load(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(missing, ConfigError::Io { .. }));
  }
}
