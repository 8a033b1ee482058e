//! The seams between the lifecycle core and a concrete windowing/graphics stack.
//!
//! A graphics context moves through three types. [`GraphicsContext`] is what
//! window creation hands back while the main thread still owns it. Releasing it
//! yields a [`ReleasedContext`], the only `Send` form, which is moved into the
//! render thread and claimed there as a [`CurrentContext`]. When the render loop
//! ends the current context is released again and travels back to the main
//! thread through the join handle, so at no point can two threads drive the
//! graphics API at once.

use std::time::Duration;

use crate::{
  app::AppHandle,
  config::AppConfig,
  core::shared::FrameSize,
  error::{ContextError, FrameError, WindowCreationError},
  scene::{GpuResources, Scene},
};

/// Factory for a window plus its graphics context.
pub trait Platform {
  type Shell: WindowShell;
  type Context: GraphicsContext;

  /// Creates the native window and its graphics context on the calling thread.
  ///
  /// `handle` is the back-reference the shell uses to deliver translated events.
  fn create_window(
    self,
    config: &AppConfig,
    handle: AppHandle,
  ) -> Result<(Self::Shell, Self::Context), WindowCreationError>;
}

/// Main-thread event source owning the native window.
pub trait WindowShell {
  /// Services pending OS events, blocking up to `timeout` (forever on `None`)
  /// when none are queued. Translated events are delivered before returning.
  fn pump_events(&mut self, timeout: Option<Duration>);

  /// Closes the window. Called only after the render thread has been joined.
  fn destroy(self);
}

/// A freshly created context, still owned by the main thread.
pub trait GraphicsContext {
  type Released: ReleasedContext;

  /// The GUI context, for theme and font setup before the hand-off.
  fn gui(&self) -> egui::Context;

  /// Gives up the context on the main thread.
  fn release(self) -> Self::Released;
}

/// A context no thread currently holds. Dropping it destroys the GUI context.
pub trait ReleasedContext: Send + Sized + 'static {
  type Current: CurrentContext<Self>;

  /// Makes the context current on the calling thread and initializes the
  /// renderer backend for a framebuffer of `size`.
  fn claim(self, size: FrameSize) -> Result<Self::Current, ContextError>;
}

/// A context current on the render thread.
pub trait CurrentContext<R> {
  /// Records the size the next frame should render at.
  fn apply_size(&mut self, size: FrameSize);

  /// Loader for GPU resources owned by layers.
  fn resources(&mut self) -> &mut dyn GpuResources;

  /// Builds one GUI frame, invoking `ui` between new-frame and render.
  fn build_ui(&mut self, ui: &mut dyn FnMut(&egui::Context));

  /// Clears the backbuffer, draws `scene` and composites the GUI on top.
  fn draw(&mut self, scene: &Scene) -> Result<(), FrameError>;

  /// Presents the frame. May block on vsync.
  fn swap_buffers(&mut self) -> Result<(), FrameError>;

  /// Tears down renderer-backend resources and makes the context non-current.
  fn release(self) -> R;
}
