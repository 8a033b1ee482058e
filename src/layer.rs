//! Layers and the stack that orders them.
//!
//! Update and UI passes walk the stack front to back: regular layers first, then
//! overlays. Events walk it back to front, so the topmost overlay sees input first
//! and can stop it from reaching anything beneath.
//!
//! The stack is shared behind a read-write lock. Frames and event dispatch both
//! only read it, so the main thread delivers events while the render thread is in
//! the middle of an update. Only attaching and detaching take the write lock.

use crate::{core::shared::FrameSize, event::Event, scene::GpuResources, scene::Scene};

/// What a layer gets to work with during a frame update. Only exists on the
/// render thread while the graphics context is current.
pub struct FrameContext<'a> {
  pub resources: &'a mut dyn GpuResources,
  pub scene:     &'a mut Scene,
  pub viewport:  FrameSize,
}

/// A self-contained unit of update, UI and event handling.
///
/// `on_event` runs on the main thread, possibly while `on_update` or
/// `on_ui_render` runs on the render thread. State touched by both sides lives
/// behind the layer's own locks, held only briefly; slow work such as imports
/// must not hold a lock that `on_event` needs.
pub trait Layer: Send + Sync {
  fn name(&self) -> &str;

  fn on_attach(&mut self) {}

  fn on_detach(&mut self) {}

  fn on_update(&self, _dt: f32, _frame: &mut FrameContext<'_>) {}

  fn on_ui_render(&self, _ctx: &egui::Context) {}

  /// Set `event.handled` to keep the event from layers below.
  fn on_event(&self, _event: &mut Event) {}
}

#[derive(Default)]
pub struct LayerStack {
  layers:   Vec<Box<dyn Layer>>,
  overlays: Vec<Box<dyn Layer>>,
}

impl LayerStack {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_layer(&mut self, mut layer: Box<dyn Layer>) {
    log::debug!("attaching layer {}", layer.name());
    layer.on_attach();
    self.layers.push(layer);
  }

  pub fn push_overlay(&mut self, mut overlay: Box<dyn Layer>) {
    log::debug!("attaching overlay {}", overlay.name());
    overlay.on_attach();
    self.overlays.push(overlay);
  }

  /// Detaches and returns the most recently pushed layer called `name`.
  pub fn pop_layer(&mut self, name: &str) -> Option<Box<dyn Layer>> {
    Self::remove_named(&mut self.layers, name)
  }

  pub fn pop_overlay(&mut self, name: &str) -> Option<Box<dyn Layer>> {
    Self::remove_named(&mut self.overlays, name)
  }

  fn remove_named(segment: &mut Vec<Box<dyn Layer>>, name: &str) -> Option<Box<dyn Layer>> {
    let index = segment.iter().rposition(|layer| layer.name() == name)?;
    let mut layer = segment.remove(index);
    layer.on_detach();
    Some(layer)
  }

  pub fn len(&self) -> usize {
    self.layers.len() + self.overlays.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Front-to-back iteration: layers, then overlays.
  pub fn iter(&self) -> impl DoubleEndedIterator<Item = &dyn Layer> {
    self
      .layers
      .iter()
      .chain(self.overlays.iter())
      .map(|layer| layer.as_ref())
  }

  pub fn update(&self, dt: f32, frame: &mut FrameContext<'_>) {
    for layer in self.iter() {
      layer.on_update(dt, frame);
    }
  }

  pub fn draw_ui(&self, ctx: &egui::Context) {
    for layer in self.iter() {
      layer.on_ui_render(ctx);
    }
  }

  /// Offers `event` to each layer from the top down until one handles it.
  pub fn on_event(&self, event: &mut Event) {
    for layer in self.iter().rev() {
      if event.handled {
        break;
      }
      layer.on_event(event);
    }
  }

  /// Detaches every layer and drops it, overlays first.
  pub fn clear(&mut self) {
    for mut overlay in self.overlays.drain(..).rev() {
      overlay.on_detach();
    }
    for mut layer in self.layers.drain(..).rev() {
      layer.on_detach();
    }
  }
}

impl Drop for LayerStack {
  fn drop(&mut self) {
    self.clear();
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
  };

  use parking_lot::{Mutex, RwLock};

  use super::*;
  use crate::{
    event::{EventDispatcher, MouseScrolledEvent, WindowDropEvent},
    model::MeshData,
    scene::{GpuMesh, GpuResources, GpuTexture},
  };

  #[derive(Default)]
  struct Journal {
    attached: AtomicUsize,
    detached: AtomicUsize,
    seen:     Mutex<Vec<String>>,
  }

  struct JournalLayer {
    name:    String,
    consume: bool,
    journal: Arc<Journal>,
  }

  impl JournalLayer {
    fn boxed(name: &str, consume: bool, journal: &Arc<Journal>) -> Box<dyn Layer> {
      Box::new(Self {
        name: name.to_string(),
        consume,
        journal: Arc::clone(journal),
      })
    }
  }

  impl Layer for JournalLayer {
    fn name(&self) -> &str {
      &self.name
    }

    fn on_attach(&mut self) {
      self.journal.attached.fetch_add(1, Ordering::SeqCst);
    }

    fn on_detach(&mut self) {
      self.journal.detached.fetch_add(1, Ordering::SeqCst);
    }

    fn on_ui_render(&self, _ctx: &egui::Context) {
      self.journal.seen.lock().push(format!("ui:{}", self.name));
    }

    fn on_event(&self, event: &mut Event) {
      self.journal.seen.lock().push(self.name.clone());
      let consume = self.consume;
      EventDispatcher::new(event).dispatch::<MouseScrolledEvent>(|_| consume);
    }
  }

  fn scroll() -> Event {
    Event::new(MouseScrolledEvent {
      x_offset: 0.0,
      y_offset: 1.0,
    })
  }

  #[test]
  fn events_walk_overlays_first_and_stop_when_handled() {
    let journal = Arc::new(Journal::default());
    let mut stack = LayerStack::new();
    stack.push_overlay(JournalLayer::boxed("overlay", false, &journal));
    stack.push_layer(JournalLayer::boxed("bottom", false, &journal));
    stack.push_layer(JournalLayer::boxed("middle", true, &journal));
    stack.push_layer(JournalLayer::boxed("top", false, &journal));

    let mut event = scroll();
    stack.on_event(&mut event);

    assert!(event.handled);
    assert_eq!(*journal.seen.lock(), ["overlay", "top", "middle"]);
  }

  #[test]
  fn unhandled_events_reach_every_layer() {
    let journal = Arc::new(Journal::default());
    let mut stack = LayerStack::new();
    stack.push_layer(JournalLayer::boxed("a", true, &journal));
    stack.push_layer(JournalLayer::boxed("b", true, &journal));

    // only scroll events are consumed
    let mut event = Event::new(WindowDropEvent { paths: Vec::new() });
    stack.on_event(&mut event);
    assert!(!event.handled);
    assert_eq!(*journal.seen.lock(), ["b", "a"]);
  }

  #[test]
  fn already_handled_events_skip_every_layer() {
    let journal = Arc::new(Journal::default());
    let mut stack = LayerStack::new();
    stack.push_layer(JournalLayer::boxed("a", false, &journal));

    let mut event = scroll();
    event.handled = true;
    stack.on_event(&mut event);
    assert!(journal.seen.lock().is_empty());
  }

  #[test]
  fn ui_walks_layers_then_overlays() {
    let journal = Arc::new(Journal::default());
    let mut stack = LayerStack::new();
    stack.push_overlay(JournalLayer::boxed("overlay", false, &journal));
    stack.push_layer(JournalLayer::boxed("first", false, &journal));
    stack.push_layer(JournalLayer::boxed("second", false, &journal));

    stack.draw_ui(&egui::Context::default());
    assert_eq!(*journal.seen.lock(), ["ui:first", "ui:second", "ui:overlay"]);
    let names: Vec<_> = stack.iter().map(|layer| layer.name().to_string()).collect();
    assert_eq!(names, ["first", "second", "overlay"]);
  }

  #[test]
  fn every_pushed_layer_is_detached_exactly_once() {
    for n in [0, 1, 7] {
      let journal = Arc::new(Journal::default());
      {
        let mut stack = LayerStack::new();
        for i in 0..n {
          if i % 3 == 0 {
            stack.push_overlay(JournalLayer::boxed(&format!("o{i}"), false, &journal));
          } else {
            stack.push_layer(JournalLayer::boxed(&format!("l{i}"), false, &journal));
          }
        }
        assert_eq!(stack.len(), n);
        assert_eq!(journal.attached.load(Ordering::SeqCst), n);
        assert_eq!(journal.detached.load(Ordering::SeqCst), 0);
      }
      assert_eq!(journal.detached.load(Ordering::SeqCst), n);
    }
  }

  #[test]
  fn pop_detaches_and_clear_is_not_repeated_on_drop() {
    let journal = Arc::new(Journal::default());
    let mut stack = LayerStack::new();
    stack.push_layer(JournalLayer::boxed("keep", false, &journal));
    stack.push_layer(JournalLayer::boxed("gone", false, &journal));

    let popped = stack.pop_layer("gone");
    assert!(popped.is_some());
    assert!(stack.pop_layer("gone").is_none());
    assert_eq!(journal.detached.load(Ordering::SeqCst), 1);

    stack.clear();
    assert!(stack.is_empty());
    drop(stack);
    assert_eq!(journal.detached.load(Ordering::SeqCst), 2);
  }

  /// Sleeps through every update, like a layer importing a large model.
  struct SlowUpdate {
    updating: Arc<std::sync::Barrier>,
    events:   AtomicUsize,
  }

  impl Layer for SlowUpdate {
    fn name(&self) -> &str {
      "slow"
    }

    fn on_update(&self, _dt: f32, _frame: &mut FrameContext<'_>) {
      self.updating.wait();
      thread::sleep(Duration::from_millis(300));
    }

    fn on_event(&self, _event: &mut Event) {
      self.events.fetch_add(1, Ordering::SeqCst);
    }
  }

  struct NoResources;

  impl GpuResources for NoResources {
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

  #[test]
  fn events_are_delivered_while_a_layer_updates() {
    let updating = Arc::new(std::sync::Barrier::new(2));
    let stack = Arc::new(RwLock::new(LayerStack::new()));
    stack.write().push_layer(Box::new(SlowUpdate {
      updating: Arc::clone(&updating),
      events:   AtomicUsize::new(0),
    }));

    let render = {
      let stack = Arc::clone(&stack);
      thread::spawn(move || {
        let mut scene = Scene::default();
        let mut frame = FrameContext {
          resources: &mut NoResources,
          scene:     &mut scene,
          viewport:  FrameSize::new(640, 480),
        };
        stack.read().update(1.0 / 60.0, &mut frame);
      })
    };

    updating.wait();
    let started = Instant::now();
    stack.read().on_event(&mut scroll());
    assert!(started.elapsed() < Duration::from_millis(100));
    render.join().unwrap();
    assert_eq!(stack.read().len(), 1);
  }
}
