//! Error types for every failure domain of the viewer.
//!
//! Startup failures (`WindowCreationError`) are fatal and end `Application::run`
//! before any thread is spawned. Resource failures (`ModelLoadError`,
//! `ResourceError`) are recoverable: callers keep whatever resource was already
//! installed.

use std::{io, path::PathBuf};

use thiserror::Error;

/// The window or its graphics context could not be brought up.
#[derive(Debug, Error)]
pub enum WindowCreationError {
  #[error("failed to create the OS event loop: {0}")]
  EventLoop(String),
  #[error("failed to create the window: {0}")]
  Window(String),
  #[error("graphics initialization failed during {stage}: {message}")]
  Graphics { stage: &'static str, message: String },
  #[error("the platform never signalled that windows can be created")]
  Timeout,
  #[error("window creation rejected: {0}")]
  Rejected(String),
}

impl WindowCreationError {
  /// Wraps a graphics API failure, keeping the debug rendering of the source.
  pub fn graphics(stage: &'static str, err: impl std::fmt::Debug) -> Self {
    Self::Graphics {
      stage,
      message: format!("{err:?}"),
    }
  }
}

/// The configured UI font could not be used.
#[derive(Debug, Error)]
pub enum FontError {
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error("not a TrueType/OpenType font: {0}")]
  Parse(#[from] ttf_parser::FaceParsingError),
}

/// The render thread could not claim or initialize the graphics context.
#[derive(Debug, Error)]
#[error("render context setup failed during {stage}: {message}")]
pub struct ContextError {
  pub stage:   &'static str,
  pub message: String,
}

impl ContextError {
  pub fn new(stage: &'static str, err: impl std::fmt::Debug) -> Self {
    Self {
      stage,
      message: format!("{err:?}"),
    }
  }
}

/// A frame could not be recorded or presented and the loop cannot continue.
#[derive(Debug, Error)]
#[error("frame failed during {stage}: {message}")]
pub struct FrameError {
  pub stage:   &'static str,
  pub message: String,
}

impl FrameError {
  pub fn new(stage: &'static str, err: impl std::fmt::Debug) -> Self {
    Self {
      stage,
      message: format!("{err:?}"),
    }
  }
}

/// A GPU resource could not be created.
#[derive(Debug, Error)]
pub enum ResourceError {
  #[error("cannot upload an empty mesh")]
  EmptyMesh,
  #[error("cannot upload an empty texture")]
  EmptyTexture,
  #[error("GPU upload failed: {0}")]
  Upload(String),
}

impl ResourceError {
  pub fn upload(err: impl std::fmt::Debug) -> Self {
    Self::Upload(format!("{err:?}"))
  }
}

/// Importing a model file failed.
#[derive(Debug, Error)]
pub enum ModelLoadError {
  #[error("unsupported model format: {}", .0.display())]
  UnsupportedFormat(PathBuf),
  #[error("failed to parse {}: {message}", path.display())]
  Parse { path: PathBuf, message: String },
  #[error("model {} contains no meshes", .0.display())]
  NoMeshes(PathBuf),
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error("failed to read texture {}: {message}", path.display())]
  Texture { path: PathBuf, message: String },
  #[error(transparent)]
  Resource(#[from] ResourceError),
}

/// Configuration could not be read or is invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("invalid TOML in config: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("invalid config value: {0}")]
  Validation(String),
}

/// Render thread lifecycle failures observed by the main thread.
#[derive(Debug, Error)]
pub enum RenderThreadError {
  #[error("failed to spawn the render thread: {0}")]
  Spawn(#[source] io::Error),
  #[error("render thread already started")]
  AlreadyStarted,
  #[error("the graphics context must be released before the render thread starts")]
  ContextNotReleased,
  #[error("render thread is not running")]
  NotRunning,
  #[error(transparent)]
  Context(#[from] ContextError),
  #[error(transparent)]
  Frame(#[from] FrameError),
}

/// Top-level failure of [`crate::Application`].
#[derive(Debug, Error)]
pub enum ApplicationError {
  #[error("an application instance already exists")]
  AlreadyRunning,
  #[error(transparent)]
  Window(#[from] WindowCreationError),
  #[error(transparent)]
  RenderThread(#[from] RenderThreadError),
  #[error(transparent)]
  Config(#[from] ConfigError),
}
