pub mod app;
pub mod camera;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod gui;
pub mod handoff;
pub mod layer;
pub mod layers;
pub mod model;
pub mod platform;
pub mod render;
pub mod scene;

// Re-export commonly used items
pub use app::{AppHandle, Application, ApplicationHooks};
pub use config::AppConfig;
pub use event::{Event, EventDispatcher, EventKind};
pub use layer::{FrameContext, Layer, LayerStack};
