//! Interactive model viewer layer.
//!
//! Files dropped onto the window are parked in a [`HandoffBox`] by the event
//! thread and loaded by the render thread at the top of its next update, where
//! the graphics context is current. Only the most recent drop survives; the
//! previously loaded model stays on screen if a load fails.
//!
//! Input arrives on the event thread while the render thread may be importing a
//! model, so the camera and pointer sit behind their own locks and the import
//! runs with no lock held at all.
//!
//! Controls:
//! * left drag orbits, shift + left drag or middle drag pans
//! * scroll over the viewport zooms
//! * the inspector panel toggles wireframe, grid, axes and auto-rotation

use std::path::{Path, PathBuf};

use egui::{Align2, Color32, RichText};
use glam::Mat4;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use winit::{event::MouseButton, keyboard::KeyCode};

use crate::{
  camera::{MAX_DISTANCE, MIN_DISTANCE, OrbitCamera},
  error::ModelLoadError,
  event::{
    Event,
    EventDispatcher,
    KeyPressedEvent,
    KeyReleasedEvent,
    MouseButtonPressedEvent,
    MouseButtonReleasedEvent,
    MouseMovedEvent,
    MouseScrolledEvent,
    WindowDropEvent,
  },
  gui::{self, FrameStats},
  handoff::HandoffBox,
  layer::{FrameContext, Layer},
  model::{MeshData, load_model},
  scene::{GpuModel, GpuResources, ScopedModel},
};

const PLACEHOLDER_TEXT: &str = "Drag & Drop Model Here";
const DEFAULT_ROTATE_SPEED: f32 = 0.5;
const DEFAULT_BACKGROUND: [f32; 3] = [0.12, 0.12, 0.12];

/// Which drag gesture, if any, is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Drag {
  #[default]
  None,
  Orbit,
  Pan,
}

/// Main-thread input state.
#[derive(Debug, Default)]
struct Pointer {
  drag:     Drag,
  shift:    bool,
  last_pos: Option<(f32, f32)>,
  /// Whether the GUI claimed the pointer in the last UI pass.
  over_ui:  bool,
}

/// What is on screen and how it is drawn. Only the render thread touches it.
struct View {
  model:        ScopedModel,
  model_path:   Option<PathBuf>,
  load_error:   Option<String>,
  needs_cube:   bool,
  wireframe:    bool,
  show_grid:    bool,
  show_axes:    bool,
  auto_rotate:  bool,
  rotate_speed: f32,
  rotation:     f32,
  background:   [f32; 3],
  stats:        FrameStats,
}

impl View {
  fn new() -> Self {
    Self {
      model:        ScopedModel::empty(),
      model_path:   None,
      load_error:   None,
      needs_cube:   false,
      wireframe:    false,
      show_grid:    true,
      show_axes:    true,
      auto_rotate:  false,
      rotate_speed: DEFAULT_ROTATE_SPEED,
      rotation:     0.0,
      background:   DEFAULT_BACKGROUND,
      stats:        FrameStats::default(),
    }
  }

  fn load_cube(&mut self, resources: &mut dyn GpuResources) {
    self.needs_cube = false;
    match GpuModel::from_mesh(&MeshData::cube(1.0), resources) {
      Ok(cube) => self.model.set(cube),
      Err(err) => warn!("failed to upload the default cube: {err}"),
    }
  }
}

/// Loads dropped model files and shows them with an orbit camera and inspector.
pub struct ModelViewerLayer {
  pending: HandoffBox<PathBuf>,
  view:    Mutex<View>,
  camera:  Mutex<OrbitCamera>,
  pointer: Mutex<Pointer>,
}

impl ModelViewerLayer {
  pub const NAME: &'static str = "model-viewer";

  pub fn new() -> Self {
    Self {
      pending: HandoffBox::new(),
      view:    Mutex::new(View::new()),
      camera:  Mutex::new(OrbitCamera::new()),
      pointer: Mutex::new(Pointer::default()),
    }
  }

  /// Queues `path` for loading on the next frame, replacing any queued path.
  pub fn queue_model(&self, path: impl Into<PathBuf>) {
    let path = path.into();
    if let Some(replaced) = self.pending.put(path.clone()) {
      debug!("{} superseded by {}", replaced.display(), path.display());
    }
  }

  /// Another handle to the pending-load slot.
  pub fn pending_loads(&self) -> HandoffBox<PathBuf> {
    self.pending.clone()
  }

  /// Path of the model on screen, `None` while showing the default cube.
  pub fn model_path(&self) -> Option<PathBuf> {
    self.view.lock().model_path.clone()
  }

  pub fn model(&self) -> Option<GpuModel> {
    self.view.lock().model.get().cloned()
  }

  pub fn load_error(&self) -> Option<String> {
    self.view.lock().load_error.clone()
  }

  pub fn camera(&self) -> OrbitCamera {
    *self.camera.lock()
  }

  fn import(path: &Path, resources: &mut dyn GpuResources) -> Result<GpuModel, ModelLoadError> {
    info!("loading {}", path.display());
    load_model(path).and_then(|loaded| GpuModel::upload(&loaded, resources))
  }

  fn install(&self, view: &mut View, path: PathBuf, uploaded: Result<GpuModel, ModelLoadError>) {
    match uploaded {
      Ok(model) => {
        info!(
          "loaded {}: {} meshes, {} vertices, {} triangles",
          path.display(),
          model.mesh_count(),
          model.vertex_count(),
          model.triangle_count(),
        );
        self.camera.lock().fit(&model.bounds);
        view.model.set(model);
        view.model_path = Some(path);
        view.needs_cube = false;
        view.load_error = None;
        view.rotation = 0.0;
      }
      Err(err) => {
        error!("failed to load {}: {err}", path.display());
        view.load_error = Some(err.to_string());
      }
    }
  }

  fn on_pointer_moved(&self, x: f32, y: f32) -> bool {
    let mut pointer = self.pointer.lock();
    if let Some((last_x, last_y)) = pointer.last_pos.replace((x, y)) {
      let (dx, dy) = (x - last_x, y - last_y);
      match pointer.drag {
        Drag::Orbit => self.camera.lock().orbit(dx, dy),
        Drag::Pan => self.camera.lock().pan(dx, dy),
        Drag::None => {}
      }
    }
    pointer.drag != Drag::None
  }

  fn inspector(&self, view: &mut View, ui: &mut egui::Ui) {
    ui.heading("Inspector");
    ui.separator();

    ui.label(RichText::new("Model").strong());
    match (&view.model_path, view.model.get()) {
      (Some(path), Some(model)) => {
        let name = path.file_name().map_or_else(
          || path.display().to_string(),
          |name| name.to_string_lossy().into_owned(),
        );
        ui.label(name).on_hover_text(path.display().to_string());
        egui::Grid::new("model-stats").num_columns(2).show(ui, |ui| {
          ui.label("Meshes");
          ui.label(model.mesh_count().to_string());
          ui.end_row();
          ui.label("Materials");
          ui.label(model.material_count.to_string());
          ui.end_row();
          ui.label("Vertices");
          ui.label(model.vertex_count().to_string());
          ui.end_row();
          ui.label("Triangles");
          ui.label(model.triangle_count().to_string());
          ui.end_row();
        });
      }
      _ => {
        ui.label(RichText::new("No model loaded").color(gui::TEXT_DISABLED));
      }
    }
    if let Some(err) = &view.load_error {
      ui.label(RichText::new(err).color(Color32::LIGHT_RED));
    }

    ui.separator();
    ui.label(RichText::new("Display").strong());
    ui.checkbox(&mut view.wireframe, "Wireframe");
    ui.checkbox(&mut view.show_grid, "Grid");
    ui.checkbox(&mut view.show_axes, "Axes");
    ui.checkbox(&mut view.auto_rotate, "Auto-rotate");
    ui.add_enabled(
      view.auto_rotate,
      egui::Slider::new(&mut view.rotate_speed, 0.0..=3.0).text("rad/s"),
    );
    ui.horizontal(|ui| {
      ui.label("Background");
      ui.color_edit_button_rgb(&mut view.background);
    });

    ui.separator();
    ui.label(RichText::new("Camera").strong());
    {
      let mut camera = self.camera.lock();
      ui.add(egui::Slider::new(&mut camera.fov, 20.0..=100.0).text("FOV"));
      ui.add(egui::Slider::new(&mut camera.distance, MIN_DISTANCE..=MAX_DISTANCE).text("Zoom"));
      if ui.button("Reset view").clicked() {
        let bounds = view.model.get().map(|model| model.bounds).unwrap_or_default();
        camera.fit(&bounds);
        view.rotation = 0.0;
      }
    }

    ui.separator();
    ui.label(RichText::new("Performance").strong());
    ui.label(format!("FPS {:.0} (avg {:.0})", view.stats.fps, view.stats.avg_fps));
    ui.label(format!("Frame time {:.2} ms", view.stats.frame_time * 1000.0));
  }
}

impl Default for ModelViewerLayer {
  fn default() -> Self {
    Self::new()
  }
}

impl Layer for ModelViewerLayer {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn on_attach(&mut self) {
    // uploads wait for the render thread
    let view = self.view.get_mut();
    view.needs_cube = !view.model.is_valid();
  }

  fn on_detach(&mut self) {
    let view = self.view.get_mut();
    if view.model.release() {
      debug!("released model resources");
    }
    view.model_path = None;
  }

  fn on_update(&self, dt: f32, frame: &mut FrameContext<'_>) {
    let imported = self.pending.take().map(|path| {
      let uploaded = Self::import(&path, frame.resources);
      (path, uploaded)
    });

    let mut view = self.view.lock();
    view.stats.record(dt);
    match imported {
      Some((path, uploaded)) => self.install(&mut view, path, uploaded),
      None if view.needs_cube => view.load_cube(frame.resources),
      None => {}
    }

    if view.auto_rotate {
      view.rotation = (view.rotation + view.rotate_speed * dt) % std::f32::consts::TAU;
    }

    let [r, g, b] = view.background;
    frame.scene.clear_color = [r, g, b, 1.0];
    frame.scene.show_grid = view.show_grid;
    frame.scene.show_axes = view.show_axes;
    frame.scene.camera = Some(self.camera().matrices(frame.viewport.aspect_ratio()));
    if let Some(model) = view.model.get() {
      frame
        .scene
        .draw_model(model, Mat4::from_rotation_y(view.rotation), view.wireframe);
    }
  }

  fn on_ui_render(&self, ctx: &egui::Context) {
    let showing_model = {
      let mut view = self.view.lock();
      egui::SidePanel::right("inspector")
        .resizable(true)
        .default_width(280.0)
        .show(ctx, |ui| self.inspector(&mut view, ui));
      view.model_path.is_some()
    };

    if !showing_model {
      egui::Area::new(egui::Id::new("drop-placeholder"))
        .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
        .interactable(false)
        .show(ctx, |ui| {
          ui.label(RichText::new(PLACEHOLDER_TEXT).size(28.0).color(gui::ACCENT));
        });
    }

    self.pointer.lock().over_ui = ctx.is_pointer_over_area() || ctx.wants_pointer_input();
  }

  fn on_event(&self, event: &mut Event) {
    let mut dispatcher = EventDispatcher::new(event);

    dispatcher.dispatch::<WindowDropEvent>(|dropped| {
      for path in &dropped.paths {
        self.queue_model(path.clone());
      }
      true
    });

    dispatcher.dispatch::<MouseButtonPressedEvent>(|pressed| {
      let mut pointer = self.pointer.lock();
      pointer.drag = match (pressed.button, pointer.shift) {
        _ if pointer.over_ui => Drag::None,
        (MouseButton::Left, false) => Drag::Orbit,
        (MouseButton::Left, true) | (MouseButton::Middle, _) => Drag::Pan,
        _ => pointer.drag,
      };
      pointer.drag != Drag::None
    });

    dispatcher.dispatch::<MouseButtonReleasedEvent>(|released| {
      if matches!(released.button, MouseButton::Left | MouseButton::Middle) {
        self.pointer.lock().drag = Drag::None;
      }
      false
    });

    dispatcher.dispatch::<MouseMovedEvent>(|moved| self.on_pointer_moved(moved.x, moved.y));

    dispatcher.dispatch::<MouseScrolledEvent>(|scrolled| {
      if self.pointer.lock().over_ui {
        return false;
      }
      self.camera.lock().zoom(scrolled.y_offset);
      true
    });

    dispatcher.dispatch::<KeyPressedEvent>(|pressed| {
      if matches!(pressed.key, KeyCode::ShiftLeft | KeyCode::ShiftRight) {
        self.pointer.lock().shift = true;
      }
      false
    });

    dispatcher.dispatch::<KeyReleasedEvent>(|released| {
      if matches!(released.key, KeyCode::ShiftLeft | KeyCode::ShiftRight) {
        self.pointer.lock().shift = false;
      }
      false
    });
  }
}
