//! Application composition root.
//!
//! An [`Application`] owns the three long-lived pieces of the viewer:
//! * the window shell created by a [`Platform`], driven on the calling thread
//! * the [`RenderThreadController`] that owns the graphics context once started
//! * the [`LayerStack`], shared by both threads behind a read-write lock
//!
//! # Threads
//! `run` keeps the OS event loop on the thread that called it. Every OS event is
//! translated by the shell and handed to [`AppHandle::on_event`] before the shell
//! returns from its pump. Layers see the event right there, on the main thread,
//! while the render thread may be inside their update; both passes only take the
//! stack's read lock. The render thread otherwise reads the atomics in
//! [`SharedFrameState`] and whatever layers stash for it.
//!
//! # Shutdown
//! Closing the window clears the running flag. The render thread finishes its
//! current frame, runs [`ApplicationHooks::on_shutdown`], detaches every layer,
//! releases the context and raises the finished flag. Meanwhile `run` keeps
//! pumping OS events, joins the thread, drops the context (and with it the GUI
//! context) and only then destroys the window.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use log::{debug, error, info};
use parking_lot::RwLock;

use crate::{
  config::AppConfig,
  core::{
    context::{GraphicsContext, Platform, WindowShell},
    render_thread::RenderThreadController,
    shared::{FrameSize, SharedFrameState},
  },
  error::ApplicationError,
  event::{Event, EventDispatcher, WindowCloseEvent, WindowResizeEvent},
  gui,
  layer::{FrameContext, Layer, LayerStack},
};

/// Upper bound on one main-loop wait, so a render thread that died on its own is
/// noticed without further OS events.
const EVENT_WAIT: Duration = Duration::from_millis(100);

static INSTANCE_ALIVE: AtomicBool = AtomicBool::new(false);

/// Held by the one live [`Application`].
#[derive(Debug)]
struct InstanceGuard;

impl InstanceGuard {
  fn acquire() -> Option<Self> {
    INSTANCE_ALIVE
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self)
  }
}

impl Drop for InstanceGuard {
  fn drop(&mut self) {
    INSTANCE_ALIVE.store(false, Ordering::Release);
  }
}

/// Program-level callbacks, run on the render thread around the layer passes.
pub trait ApplicationHooks: Send {
  /// After the context is claimed, before the first frame.
  fn on_start(&mut self) {}

  /// After every layer has updated.
  fn on_update(&mut self, _dt: f32, _frame: &mut FrameContext<'_>) {}

  /// After every layer has built its UI.
  fn on_ui_render(&mut self, _ctx: &egui::Context) {}

  /// After the last frame, while the context is still current.
  fn on_shutdown(&mut self) {}
}

struct NoHooks;

impl ApplicationHooks for NoHooks {}

/// The back-reference a window shell uses to deliver translated OS events.
///
/// Cloning is cheap. A handle can only feed events in and read the shared frame
/// state; it cannot reach the rest of the application.
#[derive(Clone)]
pub struct AppHandle {
  shared: Arc<SharedFrameState>,
  layers: Arc<RwLock<LayerStack>>,
}

impl AppHandle {
  pub fn new(shared: Arc<SharedFrameState>, layers: Arc<RwLock<LayerStack>>) -> Self {
    Self { shared, layers }
  }

  /// Runs the built-in close/resize handlers, then offers the event to the
  /// layer stack from the top down.
  ///
  /// Never waits for a frame: layer updates hold the same read lock.
  pub fn on_event(&self, event: &mut Event) {
    log::trace!("{event}");
    let mut dispatcher = EventDispatcher::new(event);
    dispatcher.dispatch::<WindowCloseEvent>(|_| self.on_window_close());
    dispatcher.dispatch::<WindowResizeEvent>(|resize| self.on_window_resize(resize));

    self.layers.read().on_event(event);
  }

  fn on_window_close(&self) -> bool {
    info!("window close requested");
    self.shared.set_running(false);
    true
  }

  fn on_window_resize(&self, resize: &WindowResizeEvent) -> bool {
    let size = FrameSize::new(resize.width, resize.height);
    if size.is_empty() {
      debug!("ignoring resize to {}x{}", size.width, size.height);
      return false;
    }
    if self.shared.set_size(size) {
      debug!("framebuffer resized to {}x{}", size.width, size.height);
    }
    false
  }

  pub fn shared(&self) -> &SharedFrameState {
    &self.shared
  }

  /// Asks the application to shut down, as if the window had been closed.
  pub fn request_close(&self) {
    self.shared.set_running(false);
  }
}

/// The viewer application. At most one exists per process.
///
/// # Example
/// ```no_run
/// use model_viewer::{Application, config::AppConfig, platform::DesktopPlatform};
///
/// let app = Application::new(AppConfig::default())?;
/// app.run(DesktopPlatform::new())?;
/// # Ok::<(), model_viewer::error::ApplicationError>(())
/// ```
pub struct Application {
  config:    AppConfig,
  shared:    Arc<SharedFrameState>,
  layers:    Arc<RwLock<LayerStack>>,
  hooks:     Box<dyn ApplicationHooks>,
  _instance: InstanceGuard,
}

impl Application {
  /// Validates `config` and claims the process-wide instance slot.
  pub fn new(config: AppConfig) -> Result<Self, ApplicationError> {
    config.validate()?;
    let instance = InstanceGuard::acquire().ok_or(ApplicationError::AlreadyRunning)?;
    let size = FrameSize::new(config.width, config.height);

    Ok(Self {
      shared: Arc::new(SharedFrameState::new(size)),
      layers: Arc::new(RwLock::new(LayerStack::new())),
      hooks: Box::new(NoHooks),
      _instance: instance,
      config,
    })
  }

  pub fn with_hooks(mut self, hooks: impl ApplicationHooks + 'static) -> Self {
    self.hooks = Box::new(hooks);
    self
  }

  pub fn push_layer(&mut self, layer: impl Layer + 'static) {
    self.layers.write().push_layer(Box::new(layer));
  }

  pub fn push_overlay(&mut self, overlay: impl Layer + 'static) {
    self.layers.write().push_overlay(Box::new(overlay));
  }

  pub fn config(&self) -> &AppConfig {
    &self.config
  }

  /// Shared frame state, e.g. for observing shutdown from outside.
  pub fn shared(&self) -> Arc<SharedFrameState> {
    Arc::clone(&self.shared)
  }

  pub fn handle(&self) -> AppHandle {
    AppHandle::new(Arc::clone(&self.shared), Arc::clone(&self.layers))
  }

  /// Creates the window, renders on a dedicated thread until the window closes,
  /// then tears everything down in order.
  ///
  /// Window creation failures return immediately; no thread is started.
  pub fn run<P: Platform>(self, platform: P) -> Result<(), ApplicationError> {
    info!(
      "starting {} at {}x{}",
      self.config.name, self.config.width, self.config.height
    );

    let (mut shell, context) = match platform.create_window(&self.config, self.handle()) {
      Ok(created) => created,
      Err(err) => {
        error!("failed to create the window: {err}");
        return Err(err.into());
      }
    };
    debug!("window and graphics context created");

    gui::setup(&context.gui(), &self.config);

    let mut controller =
      RenderThreadController::new(context, Arc::clone(&self.shared), Arc::clone(&self.layers));
    controller.release_context()?;
    controller.start(self.hooks)?;

    while self.shared.is_running() && !controller.is_finished() {
      shell.pump_events(Some(EVENT_WAIT));
    }

    info!("shutting down");
    let exit = controller.drain(&mut shell)?;
    drop(exit.context);
    shell.destroy();

    exit.result?;
    info!("shutdown complete");
    Ok(())
  }
}

/// Serializes tests that construct an [`Application`].
#[cfg(test)]
pub(crate) static APPLICATION_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::MouseScrolledEvent;

  fn handle(size: FrameSize) -> AppHandle {
    AppHandle::new(
      Arc::new(SharedFrameState::new(size)),
      Arc::new(RwLock::new(LayerStack::new())),
    )
  }

  #[test]
  fn only_one_instance_at_a_time() {
    let _serial = APPLICATION_LOCK.lock();
    let first = Application::new(AppConfig::default()).unwrap();
    assert!(matches!(
      Application::new(AppConfig::default()),
      Err(ApplicationError::AlreadyRunning)
    ));
    drop(first);
    assert!(Application::new(AppConfig::default()).is_ok());
  }

  #[test]
  fn invalid_config_is_rejected_before_claiming_the_instance() {
    let _serial = APPLICATION_LOCK.lock();
    let config = AppConfig {
      width: 0,
      ..AppConfig::default()
    };
    assert!(matches!(
      Application::new(config),
      Err(ApplicationError::Config(_))
    ));
    assert!(Application::new(AppConfig::default()).is_ok());
  }

  #[test]
  fn zero_area_resize_leaves_size_alone() {
    let handle = handle(FrameSize::new(1600, 900));
    for (width, height) in [(0, 0), (0, 500), (500, 0)] {
      let mut event = Event::new(WindowResizeEvent { width, height });
      handle.on_event(&mut event);
      assert!(!event.handled);
    }
    assert_eq!(handle.shared().size(), FrameSize::new(1600, 900));
  }

  #[test]
  fn repeated_resize_changes_nothing() {
    let handle = handle(FrameSize::new(1600, 900));
    let mut event = Event::new(WindowResizeEvent {
      width:  1024,
      height: 768,
    });
    handle.on_event(&mut event);
    assert_eq!(handle.shared().size(), FrameSize::new(1024, 768));

    let mut again = Event::new(WindowResizeEvent {
      width:  1024,
      height: 768,
    });
    handle.on_event(&mut again);
    assert!(!handle.shared().set_size(FrameSize::new(1024, 768)));
    assert_eq!(handle.shared().size(), FrameSize::new(1024, 768));
  }

  #[test]
  fn close_clears_running_and_is_handled() {
    let handle = handle(FrameSize::new(800, 600));
    handle.shared().set_running(true);

    let mut event = Event::new(WindowCloseEvent);
    handle.on_event(&mut event);
    assert!(event.handled);
    assert!(!handle.shared().is_running());
  }

  #[test]
  fn other_events_leave_running_alone() {
    let handle = handle(FrameSize::new(800, 600));
    handle.shared().set_running(true);
    let mut event = Event::new(MouseScrolledEvent {
      x_offset: 0.0,
      y_offset: -1.0,
    });
    handle.on_event(&mut event);
    assert!(handle.shared().is_running());
  }
}
