//! Native window via `winit`, rendered with the Vulkan backend.
//!
//! The event loop is never handed over with `run_app`. Instead the shell pumps
//! it with [`EventLoopExtPumpEvents::pump_app_events`], which lets
//! [`crate::Application::run`] keep control of the main thread and interleave
//! event servicing with its shutdown drain.

use std::{
  path::PathBuf,
  sync::Arc,
  time::{Duration, Instant},
};

use log::{debug, error, info, trace};
use winit::{
  application::ApplicationHandler,
  dpi::PhysicalSize,
  event::{ElementState, KeyEvent, MouseScrollDelta, WindowEvent},
  event_loop::{ActiveEventLoop, EventLoop},
  keyboard::PhysicalKey,
  platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
  window::{Window, WindowId},
};

use crate::{
  app::AppHandle,
  config::AppConfig,
  core::context::{Platform, WindowShell},
  error::WindowCreationError,
  event::{
    Event,
    KeyPressedEvent,
    KeyReleasedEvent,
    KeyTypedEvent,
    MouseButtonPressedEvent,
    MouseButtonReleasedEvent,
    MouseMovedEvent,
    MouseScrolledEvent,
    WindowCloseEvent,
    WindowDropEvent,
    WindowFocusEvent,
    WindowLostFocusEvent,
    WindowMovedEvent,
    WindowResizeEvent,
  },
  render::{GuiInbox, VulkanContext},
};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const STARTUP_POLL: Duration = Duration::from_millis(10);
/// Pixel scroll deltas (touchpads) are reported in lines of this height.
const PIXELS_PER_LINE: f64 = 50.0;

/// Creates a `winit` window with a Vulkan context.
#[derive(Debug, Clone)]
pub struct DesktopPlatform {
  startup_timeout: Duration,
}

impl DesktopPlatform {
  pub fn new() -> Self {
    Self {
      startup_timeout: STARTUP_TIMEOUT,
    }
  }

  /// How long to wait for the OS to let us create windows.
  pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
    self.startup_timeout = timeout;
    self
  }
}

impl Default for DesktopPlatform {
  fn default() -> Self {
    Self::new()
  }
}

/// Handler used only until the window exists.
struct Bootstrap<'a> {
  config:  &'a AppConfig,
  inbox:   GuiInbox,
  created: Option<Result<(Arc<Window>, VulkanContext), WindowCreationError>>,
}

impl Bootstrap<'_> {
  fn create(&self, event_loop: &ActiveEventLoop) -> Result<(Arc<Window>, VulkanContext), WindowCreationError> {
    let attributes = Window::default_attributes()
      .with_title(self.config.name.clone())
      .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
      .with_maximized(self.config.maximized);
    let window = Arc::new(
      event_loop
        .create_window(attributes)
        .map_err(|e| WindowCreationError::Window(e.to_string()))?,
    );
    let context = VulkanContext::new(event_loop, window.clone(), self.config, self.inbox.clone())?;
    Ok((window, context))
  }
}

impl ApplicationHandler for Bootstrap<'_> {
  fn resumed(&mut self, event_loop: &ActiveEventLoop) {
    if self.created.is_none() {
      self.created = Some(self.create(event_loop));
    }
  }

  fn window_event(&mut self, _event_loop: &ActiveEventLoop, _window_id: WindowId, _event: WindowEvent) {}
}

impl Platform for DesktopPlatform {
  type Context = VulkanContext;
  type Shell = DesktopShell;

  fn create_window(
    self,
    config: &AppConfig,
    handle: AppHandle,
  ) -> Result<(DesktopShell, VulkanContext), WindowCreationError> {
    let mut event_loop = EventLoop::new().map_err(|e| WindowCreationError::EventLoop(e.to_string()))?;
    let inbox = GuiInbox::default();
    let mut bootstrap = Bootstrap {
      config,
      inbox: inbox.clone(),
      created: None,
    };

    let deadline = Instant::now() + self.startup_timeout;
    let (window, context) = loop {
      if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(STARTUP_POLL), &mut bootstrap) {
        return Err(WindowCreationError::Rejected(format!(
          "event loop exited with code {code} during startup"
        )));
      }
      if let Some(created) = bootstrap.created.take() {
        break created?;
      }
      if Instant::now() >= deadline {
        return Err(WindowCreationError::Timeout);
      }
    };

    let size = window.inner_size();
    info!("window created at {}x{}", size.width, size.height);
    // the OS may not honor the requested size, e.g. when maximized
    if size.width != config.width || size.height != config.height {
      handle.on_event(&mut Event::new(WindowResizeEvent {
        width:  size.width,
        height: size.height,
      }));
    }

    let shell = DesktopShell {
      event_loop,
      handler: ShellHandler {
        handle,
        window,
        inbox,
        dropped: Vec::new(),
      },
    };
    Ok((shell, context))
  }
}

/// Owns the event loop and window for the lifetime of the application.
pub struct DesktopShell {
  event_loop: EventLoop<()>,
  handler:    ShellHandler,
}

impl WindowShell for DesktopShell {
  fn pump_events(&mut self, timeout: Option<Duration>) {
    if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.handler) {
      debug!("event loop exited with code {code}");
      self.handler.handle.request_close();
    }
  }

  fn destroy(self) {
    let Self { event_loop, handler } = self;
    drop(handler);
    drop(event_loop);
    debug!("window destroyed");
  }
}

struct ShellHandler {
  handle:  AppHandle,
  window:  Arc<Window>,
  inbox:   GuiInbox,
  /// Files dropped since the last `about_to_wait`, delivered as one event.
  dropped: Vec<PathBuf>,
}

impl ApplicationHandler for ShellHandler {
  fn resumed(&mut self, _event_loop: &ActiveEventLoop) {}

  fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
    if window_id != self.window.id() {
      return;
    }
    self.inbox.lock().push(event.clone());

    if let WindowEvent::DroppedFile(path) = event {
      self.dropped.push(path);
      return;
    }
    translate(&event, |mut event| self.handle.on_event(&mut event));
  }

  fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
    if !self.dropped.is_empty() {
      let paths = std::mem::take(&mut self.dropped);
      trace!("{} file(s) dropped", paths.len());
      self.handle.on_event(&mut Event::new(WindowDropEvent { paths }));
    }
  }

  fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
    if self.handle.shared().is_running() {
      error!("event loop is exiting while the application is still running");
      self.handle.request_close();
    }
  }
}

/// Converts one OS window event into zero or more typed events.
///
/// File drops are batched by the shell and never produced here.
fn translate(event: &WindowEvent, mut emit: impl FnMut(Event)) {
  match event {
    WindowEvent::CloseRequested => emit(Event::new(WindowCloseEvent)),
    WindowEvent::Resized(size) => emit(Event::new(WindowResizeEvent {
      width:  size.width,
      height: size.height,
    })),
    WindowEvent::Focused(true) => emit(Event::new(WindowFocusEvent)),
    WindowEvent::Focused(false) => emit(Event::new(WindowLostFocusEvent)),
    WindowEvent::Moved(position) => emit(Event::new(WindowMovedEvent {
      x: position.x,
      y: position.y,
    })),
    WindowEvent::CursorMoved { position, .. } => emit(Event::new(MouseMovedEvent {
      x: position.x as f32,
      y: position.y as f32,
    })),
    WindowEvent::MouseWheel { delta, .. } => {
      let (x_offset, y_offset) = match delta {
        MouseScrollDelta::LineDelta(x, y) => (*x, *y),
        MouseScrollDelta::PixelDelta(position) => (
          (position.x / PIXELS_PER_LINE) as f32,
          (position.y / PIXELS_PER_LINE) as f32,
        ),
      };
      emit(Event::new(MouseScrolledEvent { x_offset, y_offset }));
    }
    WindowEvent::MouseInput { state, button, .. } => match state {
      ElementState::Pressed => emit(Event::new(MouseButtonPressedEvent { button: *button })),
      ElementState::Released => emit(Event::new(MouseButtonReleasedEvent { button: *button })),
    },
    WindowEvent::KeyboardInput {
      event:
        KeyEvent {
          physical_key,
          state,
          repeat,
          text,
          ..
        },
      ..
    } => {
      if let PhysicalKey::Code(key) = physical_key {
        match state {
          ElementState::Pressed => emit(Event::new(KeyPressedEvent {
            key:    *key,
            repeat: *repeat,
          })),
          ElementState::Released => emit(Event::new(KeyReleasedEvent { key: *key })),
        }
      }
      if let (ElementState::Pressed, Some(text)) = (state, text) {
        if !text.chars().all(char::is_control) {
          emit(Event::new(KeyTypedEvent { text: text.to_string() }));
        }
      }
    }
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use winit::dpi::PhysicalPosition;

  use super::*;
  use crate::event::EventKind;

  fn translated(event: WindowEvent) -> Vec<Event> {
    let mut events = Vec::new();
    translate(&event, |event| events.push(event));
    events
  }

  #[test]
  fn resize_keeps_physical_pixels() {
    let events = translated(WindowEvent::Resized(PhysicalSize::new(1600, 900)));
    assert_eq!(events.len(), 1);
    assert_eq!(
      events[0].get::<WindowResizeEvent>(),
      Some(&WindowResizeEvent {
        width:  1600,
        height: 900,
      })
    );
  }

  #[test]
  fn close_and_focus_map_one_to_one() {
    assert_eq!(translated(WindowEvent::CloseRequested)[0].kind(), EventKind::WindowClose);
    assert_eq!(translated(WindowEvent::Focused(true))[0].kind(), EventKind::WindowFocus);
    assert_eq!(translated(WindowEvent::Focused(false))[0].kind(), EventKind::WindowLostFocus);
  }

  #[test]
  fn moved_reports_position() {
    let events = translated(WindowEvent::Moved(PhysicalPosition::new(-20, 40)));
    assert_eq!(events[0].get::<WindowMovedEvent>(), Some(&WindowMovedEvent { x: -20, y: 40 }));
  }

  #[test]
  fn dropped_files_are_not_translated_individually() {
    assert!(translated(WindowEvent::DroppedFile(PathBuf::from("a.obj"))).is_empty());
    assert!(translated(WindowEvent::RedrawRequested).is_empty());
  }
}
