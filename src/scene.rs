//! Per-frame 3D draw list and the GPU resource handles layers own.
//!
//! Layers record what to draw into a [`Scene`] during update; the render thread
//! then hands the scene to the current graphics context. Resource handles are
//! reference counted so a scene can outlive the layer lock for the rest of the
//! frame. The backing buffers are released when the last handle drops.

use std::{any::Any, fmt, sync::Arc};

use glam::Mat4;

use crate::{
  error::{ModelLoadError, ResourceError},
  model::{Bounds, LoadedModel, MeshData, load_texture},
};

/// Uploads CPU-side data to the GPU. Only callable with the context current.
pub trait GpuResources {
  fn upload_mesh(&mut self, mesh: &MeshData) -> Result<GpuMesh, ResourceError>;
  fn upload_texture(&mut self, image: &image::RgbaImage) -> Result<GpuTexture, ResourceError>;
}

/// Vertex and index buffers of one uploaded mesh.
#[derive(Clone)]
pub struct GpuMesh {
  buffers:        Arc<dyn Any + Send + Sync>,
  vertex_count:   usize,
  triangle_count: usize,
}

impl GpuMesh {
  /// Wraps backend-specific buffers. The backend recovers them with [`Self::buffers`].
  pub fn new<B: Any + Send + Sync>(buffers: B, vertex_count: usize, triangle_count: usize) -> Self {
    Self {
      buffers: Arc::new(buffers),
      vertex_count,
      triangle_count,
    }
  }

  pub fn buffers<B: Any>(&self) -> Option<&B> {
    (*self.buffers).downcast_ref::<B>()
  }

  pub fn vertex_count(&self) -> usize {
    self.vertex_count
  }

  pub fn triangle_count(&self) -> usize {
    self.triangle_count
  }
}

impl fmt::Debug for GpuMesh {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GpuMesh")
      .field("vertex_count", &self.vertex_count)
      .field("triangle_count", &self.triangle_count)
      .finish_non_exhaustive()
  }
}

/// A sampled 2D texture.
#[derive(Clone)]
pub struct GpuTexture {
  image:  Arc<dyn Any + Send + Sync>,
  width:  u32,
  height: u32,
}

impl GpuTexture {
  pub fn new<I: Any + Send + Sync>(image: I, width: u32, height: u32) -> Self {
    Self {
      image: Arc::new(image),
      width,
      height,
    }
  }

  pub fn image<I: Any>(&self) -> Option<&I> {
    (*self.image).downcast_ref::<I>()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }
}

impl fmt::Debug for GpuTexture {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GpuTexture")
      .field("width", &self.width)
      .field("height", &self.height)
      .finish_non_exhaustive()
  }
}

/// Every mesh of an imported model plus its optional diffuse texture.
#[derive(Debug, Clone)]
pub struct GpuModel {
  pub meshes:         Vec<GpuMesh>,
  pub texture:        Option<GpuTexture>,
  pub material_count: usize,
  pub bounds:         Bounds,
}

impl GpuModel {
  /// Uploads every mesh of `loaded` and, when it names one, its diffuse texture.
  ///
  /// A texture that fails to decode or upload is logged and skipped; the model
  /// is then drawn with the default white texture.
  pub fn upload(loaded: &LoadedModel, resources: &mut dyn GpuResources) -> Result<Self, ModelLoadError> {
    let meshes = loaded
      .meshes
      .iter()
      .map(|mesh| resources.upload_mesh(mesh))
      .collect::<Result<Vec<_>, _>>()?;

    let texture = loaded.diffuse_texture.as_deref().and_then(|path| {
      match load_texture(path).and_then(|image| Ok(resources.upload_texture(&image)?)) {
        Ok(texture) => Some(texture),
        Err(err) => {
          log::warn!("{err}; drawing untextured");
          None
        }
      }
    });

    Ok(Self {
      meshes,
      texture,
      material_count: loaded.material_count,
      bounds: loaded.bounds(),
    })
  }

  /// A single-mesh model without materials.
  pub fn from_mesh(mesh: &MeshData, resources: &mut dyn GpuResources) -> Result<Self, ResourceError> {
    Ok(Self {
      meshes:         vec![resources.upload_mesh(mesh)?],
      texture:        None,
      material_count: 0,
      bounds:         mesh.bounds().unwrap_or_default(),
    })
  }

  pub fn mesh_count(&self) -> usize {
    self.meshes.len()
  }

  pub fn vertex_count(&self) -> usize {
    self.meshes.iter().map(GpuMesh::vertex_count).sum()
  }

  pub fn triangle_count(&self) -> usize {
    self.meshes.iter().map(GpuMesh::triangle_count).sum()
  }
}

/// Exclusive owner of at most one GPU resource.
///
/// Installing a new resource releases the previous one first, so two models are
/// never resident at once because of a reload.
#[derive(Debug)]
pub struct Scoped<T> {
  resource: Option<T>,
}

pub type ScopedModel = Scoped<GpuModel>;

impl<T> Scoped<T> {
  pub const fn empty() -> Self {
    Self { resource: None }
  }

  pub fn new(resource: T) -> Self {
    Self {
      resource: Some(resource),
    }
  }

  /// Releases the current resource, then installs `resource`.
  pub fn set(&mut self, resource: T) {
    self.release();
    self.resource = Some(resource);
  }

  /// Releases the current resource. No-op when empty.
  pub fn release(&mut self) -> bool {
    self.resource.take().is_some()
  }

  pub fn get(&self) -> Option<&T> {
    self.resource.as_ref()
  }

  pub fn is_valid(&self) -> bool {
    self.resource.is_some()
  }
}

impl<T> Default for Scoped<T> {
  fn default() -> Self {
    Self::empty()
  }
}

/// View and projection for the frame, projection already in Vulkan clip space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
  pub view: Mat4,
  pub proj: Mat4,
}

#[derive(Debug, Clone)]
pub struct ModelDraw {
  pub meshes:    Vec<GpuMesh>,
  pub texture:   Option<GpuTexture>,
  pub transform: Mat4,
  pub tint:      [f32; 4],
  pub wireframe: bool,
}

/// Everything the 3D pass draws this frame.
#[derive(Debug, Clone)]
pub struct Scene {
  pub clear_color: [f32; 4],
  pub camera:      Option<CameraMatrices>,
  pub models:      Vec<ModelDraw>,
  pub show_grid:   bool,
  pub show_axes:   bool,
}

impl Default for Scene {
  fn default() -> Self {
    Self {
      clear_color: [0.12, 0.12, 0.12, 1.0],
      camera:      None,
      models:      Vec::new(),
      show_grid:   false,
      show_axes:   false,
    }
  }
}

impl Scene {
  pub fn draw_model(&mut self, model: &GpuModel, transform: Mat4, wireframe: bool) {
    self.models.push(ModelDraw {
      meshes: model.meshes.clone(),
      texture: model.texture.clone(),
      transform,
      tint: [1.0; 4],
      wireframe,
    });
  }

  pub fn is_empty(&self) -> bool {
    self.models.is_empty() && !self.show_grid && !self.show_axes
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  struct Tracked(Arc<AtomicUsize>);

  impl Drop for Tracked {
    fn drop(&mut self) {
      self.0.fetch_sub(1, Ordering::SeqCst);
    }
  }

  fn tracked_mesh(live: &Arc<AtomicUsize>) -> GpuMesh {
    live.fetch_add(1, Ordering::SeqCst);
    GpuMesh::new(Tracked(Arc::clone(live)), 3, 1)
  }

  fn model_of(mesh: GpuMesh) -> GpuModel {
    GpuModel {
      meshes:         vec![mesh],
      texture:        None,
      material_count: 1,
      bounds:         Bounds::default(),
    }
  }

  #[test]
  fn set_releases_previous_resource_first() {
    let live = Arc::new(AtomicUsize::new(0));
    let mut scoped = ScopedModel::new(model_of(tracked_mesh(&live)));
    assert_eq!(live.load(Ordering::SeqCst), 1);

    scoped.set(model_of(tracked_mesh(&live)));
    assert_eq!(live.load(Ordering::SeqCst), 1);

    drop(scoped);
    assert_eq!(live.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn release_on_empty_is_a_noop() {
    let mut scoped = ScopedModel::empty();
    assert!(!scoped.release());
    assert!(!scoped.is_valid());
  }

  #[test]
  fn scene_keeps_meshes_alive_until_dropped() {
    let live = Arc::new(AtomicUsize::new(0));
    let mut scoped = ScopedModel::new(model_of(tracked_mesh(&live)));

    let mut scene = Scene::default();
    if let Some(model) = scoped.get() {
      scene.draw_model(model, Mat4::IDENTITY, false);
    }
    scoped.release();
    assert_eq!(live.load(Ordering::SeqCst), 1);
    drop(scene);
    assert_eq!(live.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn downcast_recovers_backend_buffers() {
    let mesh = GpuMesh::new(42_u32, 3, 1);
    assert_eq!(mesh.buffers::<u32>(), Some(&42));
    assert!(mesh.buffers::<String>().is_none());
  }
}
