//! Lifecycle core: shared state, the context hand-off seams and the render thread.

pub mod context;
pub mod render_thread;
pub mod shared;

pub use context::{CurrentContext, GraphicsContext, Platform, ReleasedContext, WindowShell};
pub use render_thread::{RenderExit, RenderState, RenderThreadController};
pub use shared::{FrameSize, SharedFrameState};
