//! Command line interface of the `model-viewer` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::{config::AppConfig, error::ConfigError};

/// View 3D models. Drop files onto the window to load them.
#[derive(Debug, Parser)]
#[command(name = "model-viewer", version, about)]
pub struct Cli {
  /// Model to load at startup
  pub model: Option<PathBuf>,

  /// TOML file with startup settings
  #[arg(short, long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// Window title
  #[arg(long)]
  pub title: Option<String>,

  /// Initial framebuffer width in pixels
  #[arg(long)]
  pub width: Option<u32>,

  /// Initial framebuffer height in pixels
  #[arg(long)]
  pub height: Option<u32>,

  /// Present without waiting for vertical blank
  #[arg(long)]
  pub no_vsync: bool,

  /// Start with a maximized window
  #[arg(long)]
  pub maximized: bool,

  /// TTF font for the UI
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// UI text size in points
  #[arg(long)]
  pub font_size: Option<f32>,

  /// Log filter, e.g. `debug` or `model_viewer=trace`; `RUST_LOG` wins when set
  #[arg(long, default_value = "info")]
  pub log_level: String,
}

impl Cli {
  /// Loads the config file, if any, and applies the flags on top of it.
  pub fn app_config(&self) -> Result<AppConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => AppConfig::load(path)?,
      None => AppConfig::default(),
    };

    if let Some(title) = &self.title {
      config.name = title.clone();
    }
    if let Some(width) = self.width {
      config.width = width;
    }
    if let Some(height) = self.height {
      config.height = height;
    }
    if self.no_vsync {
      config.vsync = false;
    }
    if self.maximized {
      config.maximized = true;
    }
    if let Some(font) = &self.font {
      config.font_path = Some(font.clone());
    }
    if let Some(font_size) = self.font_size {
      config.font_size = font_size;
    }

    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;

  #[test]
  fn defaults_without_flags() {
    let cli = Cli::try_parse_from(["model-viewer"]).unwrap();
    assert_eq!(cli.log_level, "info");
    assert!(cli.model.is_none());
    assert_eq!(cli.app_config().unwrap(), AppConfig::default());
  }

  #[test]
  fn flags_override_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("viewer.toml");
    fs::write(&path, "name = \"From file\"\nwidth = 800\nheight = 600\n").unwrap();

    let cli = Cli::try_parse_from([
      "model-viewer",
      "--config",
      path.to_str().unwrap(),
      "--width",
      "1600",
      "--no-vsync",
      "bunny.obj",
    ])
    .unwrap();
    let config = cli.app_config().unwrap();

    assert_eq!(config.name, "From file");
    assert_eq!((config.width, config.height), (1600, 600));
    assert!(!config.vsync);
    assert_eq!(cli.model, Some(PathBuf::from("bunny.obj")));
  }

  #[test]
  fn invalid_overrides_are_rejected() {
    let cli = Cli::try_parse_from(["model-viewer", "--height", "0"]).unwrap();
    assert!(matches!(cli.app_config(), Err(ConfigError::Validation(_))));
  }

  #[test]
  fn unknown_flags_fail_to_parse() {
    assert!(Cli::try_parse_from(["model-viewer", "--fullscreen"]).is_err());
  }
}
