//! The render thread and the state machine that hands the graphics context to it.
//!
//! ```text
//! Created -> ContextReleased -> ThreadRunning -> Draining -> Joined
//! ```
//!
//! The controller lives on the main thread. It holds the context while the main
//! thread owns it, moves the released context into a freshly spawned thread, and
//! during shutdown keeps pumping OS events until the thread reports it is done.
//! Presenting can block on messages only the main thread delivers, so the drain
//! never blocks in `join` before the finished flag is up.

use std::{
  panic,
  sync::Arc,
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use log::{debug, error, info};
use parking_lot::RwLock;

use crate::{
  app::ApplicationHooks,
  core::{
    context::{CurrentContext, GraphicsContext, ReleasedContext, WindowShell},
    shared::SharedFrameState,
  },
  error::RenderThreadError,
  layer::{FrameContext, LayerStack},
  scene::Scene,
};

/// Substituted when the clock reports no time passing between frames.
pub const NOMINAL_FRAME_TIME: f32 = 1.0 / 60.0;

/// How long each drain iteration waits for OS events.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
  Created,
  ContextReleased,
  ThreadRunning,
  Draining,
  Joined,
}

/// What the render thread hands back when it exits.
pub struct RenderExit<C> {
  /// The released context, back on the main thread. `None` when the render
  /// thread could not claim it.
  pub context: Option<C>,
  pub result:  Result<(), RenderThreadError>,
}

enum Stage<G: GraphicsContext> {
  Created(G),
  ContextReleased(G::Released),
  ThreadRunning(JoinHandle<RenderExit<G::Released>>),
  Draining,
  Joined,
}

pub struct RenderThreadController<G: GraphicsContext> {
  stage:  Stage<G>,
  shared: Arc<SharedFrameState>,
  layers: Arc<RwLock<LayerStack>>,
}

impl<G: GraphicsContext> RenderThreadController<G> {
  /// Takes ownership of a context that is current on the main thread.
  pub fn new(context: G, shared: Arc<SharedFrameState>, layers: Arc<RwLock<LayerStack>>) -> Self {
    Self {
      stage: Stage::Created(context),
      shared,
      layers,
    }
  }

  pub fn state(&self) -> RenderState {
    match self.stage {
      Stage::Created(_) => RenderState::Created,
      Stage::ContextReleased(_) => RenderState::ContextReleased,
      Stage::ThreadRunning(_) => RenderState::ThreadRunning,
      Stage::Draining => RenderState::Draining,
      Stage::Joined => RenderState::Joined,
    }
  }

  /// The main-thread context, only while in [`RenderState::Created`].
  pub fn context(&self) -> Option<&G> {
    match &self.stage {
      Stage::Created(context) => Some(context),
      _ => None,
    }
  }

  /// Makes the context current on no thread.
  pub fn release_context(&mut self) -> Result<(), RenderThreadError> {
    match std::mem::replace(&mut self.stage, Stage::Draining) {
      Stage::Created(context) => {
        self.stage = Stage::ContextReleased(context.release());
        debug!("graphics context released by the main thread");
        Ok(())
      }
      other => {
        self.stage = other;
        Err(RenderThreadError::AlreadyStarted)
      }
    }
  }

  /// Spawns the render thread, which claims the context and starts rendering.
  ///
  /// The running flag is raised before the thread exists.
  pub fn start(&mut self, hooks: Box<dyn ApplicationHooks>) -> Result<(), RenderThreadError> {
    let released = match std::mem::replace(&mut self.stage, Stage::Draining) {
      Stage::ContextReleased(released) => released,
      other @ Stage::Created(_) => {
        self.stage = other;
        return Err(RenderThreadError::ContextNotReleased);
      }
      other => {
        self.stage = other;
        return Err(RenderThreadError::AlreadyStarted);
      }
    };

    self.shared.set_finished(false);
    self.shared.set_running(true);

    let shared = Arc::clone(&self.shared);
    let layers = Arc::clone(&self.layers);
    let spawned = thread::Builder::new()
      .name("render".to_string())
      .spawn(move || render_main(released, shared, layers, hooks));

    match spawned {
      Ok(handle) => {
        self.stage = Stage::ThreadRunning(handle);
        debug!("render thread started");
        Ok(())
      }
      Err(err) => {
        self.shared.set_running(false);
        self.stage = Stage::Joined;
        Err(RenderThreadError::Spawn(err))
      }
    }
  }

  pub fn is_finished(&self) -> bool {
    self.shared.is_finished()
  }

  /// Stops the render thread and waits for it while servicing `shell`.
  ///
  /// Re-raises a render thread panic on the calling thread.
  pub fn drain<S: WindowShell>(
    &mut self,
    shell: &mut S,
  ) -> Result<RenderExit<G::Released>, RenderThreadError> {
    let handle = match std::mem::replace(&mut self.stage, Stage::Draining) {
      Stage::ThreadRunning(handle) => handle,
      other => {
        self.stage = other;
        return Err(RenderThreadError::NotRunning);
      }
    };

    self.shared.set_running(false);
    debug!("draining the render thread");
    while !self.shared.is_finished() {
      shell.pump_events(Some(DRAIN_POLL_INTERVAL));
    }

    let exit = match handle.join() {
      Ok(exit) => exit,
      Err(payload) => panic::resume_unwind(payload),
    };
    self.stage = Stage::Joined;
    debug!("render thread joined");
    Ok(exit)
  }
}

/// Raises the finished flag when the render thread leaves `render_main`, even
/// by unwinding, so the drain loop always terminates.
struct FinishedGuard<'a>(&'a SharedFrameState);

impl Drop for FinishedGuard<'_> {
  fn drop(&mut self) {
    self.0.set_running(false);
    self.0.set_finished(true);
  }
}

fn render_main<C: ReleasedContext>(
  released: C,
  shared: Arc<SharedFrameState>,
  layers: Arc<RwLock<LayerStack>>,
  mut hooks: Box<dyn ApplicationHooks>,
) -> RenderExit<C> {
  let _finished = FinishedGuard(&shared);

  let mut current = match released.claim(shared.size()) {
    Ok(current) => current,
    Err(err) => {
      error!("render thread could not claim the graphics context: {err}");
      return RenderExit {
        context: None,
        result:  Err(err.into()),
      };
    }
  };
  debug!("graphics context claimed by the render thread");

  hooks.on_start();
  let result = frame_loop::<C>(&mut current, &shared, &layers, hooks.as_mut());
  if let Err(err) = &result {
    error!("render loop stopped: {err}");
  }

  info!("render thread shutting down");
  hooks.on_shutdown();
  // layer resources go away while the context is still current
  layers.write().clear();
  let context = current.release();

  RenderExit {
    context: Some(context),
    result,
  }
}

fn frame_loop<C: ReleasedContext>(
  current: &mut C::Current,
  shared: &SharedFrameState,
  layers: &RwLock<LayerStack>,
  hooks: &mut dyn ApplicationHooks,
) -> Result<(), RenderThreadError> {
  let mut last_frame = Instant::now();

  while shared.is_running() {
    let now = Instant::now();
    let mut dt = now.duration_since(last_frame).as_secs_f32();
    last_frame = now;
    if dt <= 0.0 {
      dt = NOMINAL_FRAME_TIME;
    }

    let size = shared.size();
    current.apply_size(size);

    let mut scene = Scene::default();
    {
      let mut frame = FrameContext {
        resources: current.resources(),
        scene:     &mut scene,
        viewport:  size,
      };
      // shared: the event thread dispatches into the same layers meanwhile
      layers.read().update(dt, &mut frame);
      hooks.on_update(dt, &mut frame);
    }

    current.build_ui(&mut |ctx: &egui::Context| {
      layers.read().draw_ui(ctx);
      hooks.on_ui_render(ctx);
    });

    current.draw(&scene)?;
    current.swap_buffers()?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::{
    core::shared::FrameSize,
    error::{ContextError, FrameError},
    model::MeshData,
    scene::{GpuMesh, GpuResources, GpuTexture},
  };

  struct NullResources;

  impl GpuResources for NullResources {
    fn upload_mesh(&mut self, mesh: &MeshData) -> Result<GpuMesh, crate::error::ResourceError> {
      Ok(GpuMesh::new((), mesh.vertex_count(), mesh.triangle_count()))
    }

    fn upload_texture(
      &mut self,
      image: &image::RgbaImage,
    ) -> Result<GpuTexture, crate::error::ResourceError> {
      Ok(GpuTexture::new((), image.width(), image.height()))
    }
  }

  #[derive(Default)]
  struct Counters {
    frames: AtomicUsize,
    swaps:  AtomicUsize,
  }

  struct NullContext {
    counters:   Arc<Counters>,
    fail_claim: bool,
  }

  struct NullReleased(NullContext);

  struct NullCurrent {
    inner:     NullContext,
    resources: NullResources,
  }

  impl GraphicsContext for NullContext {
    type Released = NullReleased;

    fn gui(&self) -> egui::Context {
      egui::Context::default()
    }

    fn release(self) -> NullReleased {
      NullReleased(self)
    }
  }

  impl ReleasedContext for NullReleased {
    type Current = NullCurrent;

    fn claim(self, _size: FrameSize) -> Result<NullCurrent, ContextError> {
      if self.0.fail_claim {
        return Err(ContextError::new("claim", "no device"));
      }
      Ok(NullCurrent {
        inner:     self.0,
        resources: NullResources,
      })
    }
  }

  impl CurrentContext<NullReleased> for NullCurrent {
    fn apply_size(&mut self, _size: FrameSize) {}

    fn resources(&mut self) -> &mut dyn GpuResources {
      &mut self.resources
    }

    fn build_ui(&mut self, ui: &mut dyn FnMut(&egui::Context)) {
      ui(&egui::Context::default());
    }

    fn draw(&mut self, _scene: &Scene) -> Result<(), FrameError> {
      self.inner.counters.frames.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), FrameError> {
      self.inner.counters.swaps.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(1));
      Ok(())
    }

    fn release(self) -> NullReleased {
      NullReleased(self.inner)
    }
  }

  struct NullShell {
    pumps: usize,
  }

  impl WindowShell for NullShell {
    fn pump_events(&mut self, timeout: Option<Duration>) {
      self.pumps += 1;
      if let Some(timeout) = timeout {
        thread::sleep(timeout);
      }
    }

    fn destroy(self) {}
  }

  struct NoHooks;
  impl ApplicationHooks for NoHooks {}

  fn controller(fail_claim: bool) -> (RenderThreadController<NullContext>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let context = NullContext {
      counters: Arc::clone(&counters),
      fail_claim,
    };
    let shared = Arc::new(SharedFrameState::new(FrameSize::new(640, 480)));
    let layers = Arc::new(RwLock::new(LayerStack::new()));
    (RenderThreadController::new(context, shared, layers), counters)
  }

  #[test]
  fn walks_every_state_in_order() {
    let (mut controller, counters) = controller(false);
    assert_eq!(controller.state(), RenderState::Created);
    assert!(controller.context().is_some());

    controller.release_context().unwrap();
    assert_eq!(controller.state(), RenderState::ContextReleased);
    assert!(controller.context().is_none());

    controller.start(Box::new(NoHooks)).unwrap();
    assert_eq!(controller.state(), RenderState::ThreadRunning);

    while counters.swaps.load(Ordering::SeqCst) < 3 {
      thread::yield_now();
    }

    let mut shell = NullShell { pumps: 0 };
    let exit = controller.drain(&mut shell).unwrap();
    assert_eq!(controller.state(), RenderState::Joined);
    assert!(controller.is_finished());
    assert!(exit.result.is_ok());
    assert!(exit.context.is_some());
  }

  #[test]
  fn start_requires_a_released_context() {
    let (mut controller, _) = controller(false);
    assert!(matches!(
      controller.start(Box::new(NoHooks)),
      Err(RenderThreadError::ContextNotReleased)
    ));
    assert_eq!(controller.state(), RenderState::Created);
  }

  #[test]
  fn drain_before_start_is_rejected() {
    let (mut controller, _) = controller(false);
    let mut shell = NullShell { pumps: 0 };
    assert!(matches!(
      controller.drain(&mut shell),
      Err(RenderThreadError::NotRunning)
    ));
  }

  #[test]
  fn failed_claim_still_finishes() {
    let (mut controller, counters) = controller(true);
    controller.release_context().unwrap();
    controller.start(Box::new(NoHooks)).unwrap();

    let mut shell = NullShell { pumps: 0 };
    let exit = controller.drain(&mut shell).unwrap();
    assert!(exit.context.is_none());
    assert!(matches!(exit.result, Err(RenderThreadError::Context(_))));
    assert_eq!(counters.frames.load(Ordering::SeqCst), 0);
  }
}
