//! A window-less, GPU-less platform.
//!
//! The shell replays a scripted list of events and the graphics context runs a
//! real `egui` context but draws nothing. Everything observable goes into a
//! shared [`HeadlessMonitor`]: frame and swap counts, live GPU resources, which
//! thread held the context, how long event dispatch took, and the order of
//! lifecycle steps.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
  },
  thread::{self, ThreadId},
  time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{
  app::AppHandle,
  config::AppConfig,
  core::{
    context::{CurrentContext, GraphicsContext, Platform, ReleasedContext, WindowShell},
    shared::FrameSize,
  },
  error::{ContextError, FrameError, ResourceError, WindowCreationError},
  event::{Event, WindowCloseEvent},
  model::MeshData,
  scene::{GpuMesh, GpuResources, GpuTexture, Scene},
};

/// Lifecycle steps recorded by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
  WindowCreated,
  ContextReleased,
  ContextClaimed,
  ContextReturned,
  GuiDestroyed,
  WindowDestroyed,
}

/// Counters shared between a headless platform and the test observing it.
#[derive(Debug, Default)]
pub struct HeadlessMonitor {
  frames:           AtomicU64,
  swaps:            AtomicU64,
  pumps:            AtomicU64,
  live_meshes:      AtomicUsize,
  live_textures:    AtomicUsize,
  uploaded_meshes:  AtomicUsize,
  foreign_uploads:  AtomicUsize,
  models_drawn:     AtomicUsize,
  finished_at_exit: AtomicBool,
  render_thread:    Mutex<Option<ThreadId>>,
  last_size:        Mutex<Option<FrameSize>>,
  slowest_dispatch: Mutex<Duration>,
  milestones:       Mutex<Vec<Milestone>>,
}

impl HeadlessMonitor {
  pub fn frames(&self) -> u64 {
    self.frames.load(Ordering::SeqCst)
  }

  pub fn swaps(&self) -> u64 {
    self.swaps.load(Ordering::SeqCst)
  }

  pub fn pumps(&self) -> u64 {
    self.pumps.load(Ordering::SeqCst)
  }

  /// Meshes uploaded and not yet released.
  pub fn live_meshes(&self) -> usize {
    self.live_meshes.load(Ordering::SeqCst)
  }

  pub fn live_textures(&self) -> usize {
    self.live_textures.load(Ordering::SeqCst)
  }

  pub fn uploaded_meshes(&self) -> usize {
    self.uploaded_meshes.load(Ordering::SeqCst)
  }

  /// Uploads made from a thread other than the one holding the context.
  pub fn foreign_uploads(&self) -> usize {
    self.foreign_uploads.load(Ordering::SeqCst)
  }

  /// Models in the most recently drawn scene.
  pub fn models_drawn(&self) -> usize {
    self.models_drawn.load(Ordering::SeqCst)
  }

  /// Whether the render thread had reported finished when the window was destroyed.
  pub fn finished_at_exit(&self) -> bool {
    self.finished_at_exit.load(Ordering::SeqCst)
  }

  pub fn render_thread(&self) -> Option<ThreadId> {
    *self.render_thread.lock()
  }

  /// Size most recently applied by the render thread.
  pub fn last_size(&self) -> Option<FrameSize> {
    *self.last_size.lock()
  }

  /// Longest time a scripted event spent in dispatch.
  pub fn slowest_dispatch(&self) -> Duration {
    *self.slowest_dispatch.lock()
  }

  pub fn milestones(&self) -> Vec<Milestone> {
    self.milestones.lock().clone()
  }

  fn mark(&self, milestone: Milestone) {
    log::debug!("headless: {milestone:?}");
    self.milestones.lock().push(milestone);
  }
}

/// Builder for a scripted headless run.
#[derive(Default)]
pub struct HeadlessPlatform {
  monitor:     Arc<HeadlessMonitor>,
  script:      Vec<(u64, Event)>,
  close_after: Option<u64>,
  pump_delay:  Option<Duration>,
  fail_window: bool,
  fail_claim:  bool,
  frame_delay: Duration,
}

impl HeadlessPlatform {
  pub fn new() -> Self {
    Self {
      frame_delay: Duration::from_millis(1),
      ..Self::default()
    }
  }

  /// Delivers `event` on the first pump.
  pub fn with_event(self, event: impl Into<Event>) -> Self {
    self.with_event_after(0, event)
  }

  /// Delivers `event` on the first pump after `frames` frames were drawn.
  pub fn with_event_after(mut self, frames: u64, event: impl Into<Event>) -> Self {
    self.script.push((frames, event.into()));
    self
  }

  /// Posts a window close once `frames` frames were drawn.
  pub fn close_after_frames(mut self, frames: u64) -> Self {
    self.close_after = Some(frames);
    self
  }

  /// Makes every pump take `delay`, regardless of the requested timeout.
  pub fn with_pump_delay(mut self, delay: Duration) -> Self {
    self.pump_delay = Some(delay);
    self
  }

  /// Simulated presentation time per frame.
  pub fn with_frame_delay(mut self, delay: Duration) -> Self {
    self.frame_delay = delay;
    self
  }

  pub fn fail_window_creation(mut self) -> Self {
    self.fail_window = true;
    self
  }

  pub fn fail_context_claim(mut self) -> Self {
    self.fail_claim = true;
    self
  }

  pub fn monitor(&self) -> Arc<HeadlessMonitor> {
    Arc::clone(&self.monitor)
  }
}

impl Platform for HeadlessPlatform {
  type Context = HeadlessContext;
  type Shell = HeadlessShell;

  fn create_window(
    self,
    config: &AppConfig,
    handle: AppHandle,
  ) -> Result<(HeadlessShell, HeadlessContext), WindowCreationError> {
    if self.fail_window {
      return Err(WindowCreationError::Rejected(
        "headless window creation disabled".to_string(),
      ));
    }
    self.monitor.mark(Milestone::WindowCreated);

    let mut script = self.script;
    script.sort_by_key(|(frames, _)| *frames);

    let shell = HeadlessShell {
      handle,
      monitor: Arc::clone(&self.monitor),
      script,
      close_after: self.close_after,
      pump_delay: self.pump_delay,
    };
    let context = HeadlessContext {
      gui:         GuiGuard {
        ctx:     egui::Context::default(),
        monitor: Arc::clone(&self.monitor),
      },
      size:        FrameSize::new(config.width, config.height),
      fail_claim:  self.fail_claim,
      frame_delay: self.frame_delay,
    };
    Ok((shell, context))
  }
}

pub struct HeadlessShell {
  handle:      AppHandle,
  monitor:     Arc<HeadlessMonitor>,
  script:      Vec<(u64, Event)>,
  close_after: Option<u64>,
  pump_delay:  Option<Duration>,
}

impl WindowShell for HeadlessShell {
  fn pump_events(&mut self, timeout: Option<Duration>) {
    self.monitor.pumps.fetch_add(1, Ordering::SeqCst);
    match (self.pump_delay, timeout) {
      (Some(delay), _) => thread::sleep(delay),
      (None, Some(timeout)) => thread::sleep(timeout.min(Duration::from_millis(1))),
      (None, None) => thread::sleep(Duration::from_millis(1)),
    }

    let frames = self.monitor.frames();
    let due = self.script.iter().take_while(|(after, _)| *after <= frames).count();
    for (_, mut event) in self.script.drain(..due) {
      let started = Instant::now();
      self.handle.on_event(&mut event);
      let took = started.elapsed();
      let mut slowest = self.monitor.slowest_dispatch.lock();
      *slowest = (*slowest).max(took);
    }

    if self.close_after.is_some_and(|after| frames >= after) {
      self.close_after = None;
      self.handle.on_event(&mut Event::new(WindowCloseEvent));
    }
  }

  fn destroy(self) {
    self
      .monitor
      .finished_at_exit
      .store(self.handle.shared().is_finished(), Ordering::SeqCst);
    self.monitor.mark(Milestone::WindowDestroyed);
  }
}

/// Owns the GUI context; dropping it is the GUI context's destruction.
struct GuiGuard {
  ctx:     egui::Context,
  monitor: Arc<HeadlessMonitor>,
}

impl Drop for GuiGuard {
  fn drop(&mut self) {
    self.monitor.mark(Milestone::GuiDestroyed);
  }
}

pub struct HeadlessContext {
  gui:         GuiGuard,
  size:        FrameSize,
  fail_claim:  bool,
  frame_delay: Duration,
}

pub struct HeadlessReleased(HeadlessContext);

pub struct HeadlessCurrent {
  inner:     HeadlessContext,
  resources: HeadlessResources,
}

impl GraphicsContext for HeadlessContext {
  type Released = HeadlessReleased;

  fn gui(&self) -> egui::Context {
    self.gui.ctx.clone()
  }

  fn release(self) -> HeadlessReleased {
    self.gui.monitor.mark(Milestone::ContextReleased);
    HeadlessReleased(self)
  }
}

impl ReleasedContext for HeadlessReleased {
  type Current = HeadlessCurrent;

  fn claim(self, size: FrameSize) -> Result<HeadlessCurrent, ContextError> {
    let mut inner = self.0;
    if inner.fail_claim {
      return Err(ContextError::new("claim", "headless context claim disabled"));
    }
    let monitor = Arc::clone(&inner.gui.monitor);
    *monitor.render_thread.lock() = Some(thread::current().id());
    monitor.mark(Milestone::ContextClaimed);
    inner.size = size;

    Ok(HeadlessCurrent {
      resources: HeadlessResources { monitor },
      inner,
    })
  }
}

impl CurrentContext<HeadlessReleased> for HeadlessCurrent {
  fn apply_size(&mut self, size: FrameSize) {
    self.inner.size = size;
    *self.resources.monitor.last_size.lock() = Some(size);
  }

  fn resources(&mut self) -> &mut dyn GpuResources {
    &mut self.resources
  }

  fn build_ui(&mut self, ui: &mut dyn FnMut(&egui::Context)) {
    let screen = egui::vec2(self.inner.size.width as f32, self.inner.size.height as f32);
    let input = egui::RawInput {
      screen_rect: Some(egui::Rect::from_min_size(egui::Pos2::ZERO, screen)),
      ..Default::default()
    };
    let _output = self.inner.gui.ctx.run(input, |ctx| ui(ctx));
  }

  fn draw(&mut self, scene: &Scene) -> Result<(), FrameError> {
    let monitor = &self.resources.monitor;
    monitor.frames.fetch_add(1, Ordering::SeqCst);
    monitor.models_drawn.store(scene.models.len(), Ordering::SeqCst);
    Ok(())
  }

  fn swap_buffers(&mut self) -> Result<(), FrameError> {
    self.resources.monitor.swaps.fetch_add(1, Ordering::SeqCst);
    thread::sleep(self.inner.frame_delay);
    Ok(())
  }

  fn release(self) -> HeadlessReleased {
    self.resources.monitor.mark(Milestone::ContextReturned);
    HeadlessReleased(self.inner)
  }
}

/// Hands out tracked fake buffers.
pub struct HeadlessResources {
  monitor: Arc<HeadlessMonitor>,
}

impl HeadlessResources {
  fn check_thread(&self) {
    if self.monitor.render_thread() != Some(thread::current().id()) {
      self.monitor.foreign_uploads.fetch_add(1, Ordering::SeqCst);
    }
  }
}

struct TrackedMesh(Arc<HeadlessMonitor>);

impl Drop for TrackedMesh {
  fn drop(&mut self) {
    self.0.live_meshes.fetch_sub(1, Ordering::SeqCst);
  }
}

struct TrackedTexture(Arc<HeadlessMonitor>);

impl Drop for TrackedTexture {
  fn drop(&mut self) {
    self.0.live_textures.fetch_sub(1, Ordering::SeqCst);
  }
}

impl GpuResources for HeadlessResources {
  fn upload_mesh(&mut self, mesh: &MeshData) -> Result<GpuMesh, ResourceError> {
    if mesh.is_empty() {
      return Err(ResourceError::EmptyMesh);
    }
    self.check_thread();
    self.monitor.live_meshes.fetch_add(1, Ordering::SeqCst);
    self.monitor.uploaded_meshes.fetch_add(1, Ordering::SeqCst);
    Ok(GpuMesh::new(
      TrackedMesh(Arc::clone(&self.monitor)),
      mesh.vertex_count(),
      mesh.triangle_count(),
    ))
  }

  fn upload_texture(&mut self, image: &image::RgbaImage) -> Result<GpuTexture, ResourceError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(ResourceError::EmptyTexture);
    }
    self.check_thread();
    self.monitor.live_textures.fetch_add(1, Ordering::SeqCst);
    Ok(GpuTexture::new(
      TrackedTexture(Arc::clone(&self.monitor)),
      width,
      height,
    ))
  }
}
