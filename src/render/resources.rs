//! GPU uploads on the render thread.

use std::sync::Arc;

use log::trace;
use vulkano::{
  buffer::{Buffer, BufferContents, BufferCreateInfo, BufferUsage, Subbuffer},
  command_buffer::{
    AutoCommandBufferBuilder,
    CommandBufferUsage,
    CopyBufferToImageInfo,
    PrimaryCommandBufferAbstract,
    allocator::StandardCommandBufferAllocator,
  },
  device::Queue,
  format::Format,
  image::{Image, ImageCreateInfo, ImageType, ImageUsage, view::ImageView},
  memory::allocator::{AllocationCreateInfo, MemoryTypeFilter, StandardMemoryAllocator},
  sync::GpuFuture,
};

use crate::{
  error::ResourceError,
  model::MeshData,
  render::vertex::{Normal, Position, TexCoord},
  scene::{GpuMesh, GpuResources, GpuTexture},
};

/// Buffers behind a [`GpuMesh`] created by [`VulkanResources`].
pub(crate) struct MeshBuffers {
  pub positions:  Subbuffer<[Position]>,
  pub normals:    Subbuffer<[Normal]>,
  pub tex_coords: Subbuffer<[TexCoord]>,
  pub indices:    Subbuffer<[u32]>,
}

pub(crate) struct VulkanResources {
  queue:                    Arc<Queue>,
  memory_allocator:         Arc<StandardMemoryAllocator>,
  command_buffer_allocator: Arc<StandardCommandBufferAllocator>,
}

impl VulkanResources {
  pub fn new(
    queue: Arc<Queue>,
    memory_allocator: Arc<StandardMemoryAllocator>,
    command_buffer_allocator: Arc<StandardCommandBufferAllocator>,
  ) -> Self {
    Self {
      queue,
      memory_allocator,
      command_buffer_allocator,
    }
  }

  fn device_buffer<T, I>(&self, usage: BufferUsage, data: I) -> Result<Subbuffer<[T]>, ResourceError>
  where
    T: BufferContents,
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
  {
    Buffer::from_iter(
      self.memory_allocator.clone(),
      BufferCreateInfo {
        usage,
        ..Default::default()
      },
      AllocationCreateInfo {
        memory_type_filter: MemoryTypeFilter::PREFER_DEVICE | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
        ..Default::default()
      },
      data,
    )
    .map_err(ResourceError::upload)
  }

  /// Copies RGBA8 pixels into a sampled image through a staging buffer and
  /// waits for the transfer.
  pub fn upload_rgba(&self, width: u32, height: u32, pixels: Vec<u8>) -> Result<Arc<ImageView>, ResourceError> {
    if width == 0 || height == 0 || pixels.is_empty() {
      return Err(ResourceError::EmptyTexture);
    }

    let image = Image::new(
      self.memory_allocator.clone(),
      ImageCreateInfo {
        image_type: ImageType::Dim2d,
        format: Format::R8G8B8A8_SRGB,
        extent: [width, height, 1],
        usage: ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
        ..Default::default()
      },
      AllocationCreateInfo {
        memory_type_filter: MemoryTypeFilter::PREFER_DEVICE,
        ..Default::default()
      },
    )
    .map_err(ResourceError::upload)?;

    let staging_buffer = Buffer::from_iter(
      self.memory_allocator.clone(),
      BufferCreateInfo {
        usage: BufferUsage::TRANSFER_SRC,
        ..Default::default()
      },
      AllocationCreateInfo {
        memory_type_filter: MemoryTypeFilter::PREFER_HOST | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
        ..Default::default()
      },
      pixels,
    )
    .map_err(ResourceError::upload)?;

    let mut upload = AutoCommandBufferBuilder::primary(
      self.command_buffer_allocator.clone(),
      self.queue.queue_family_index(),
      CommandBufferUsage::OneTimeSubmit,
    )
    .map_err(ResourceError::upload)?;
    upload
      .copy_buffer_to_image(CopyBufferToImageInfo::buffer_image(staging_buffer, image.clone()))
      .map_err(ResourceError::upload)?;

    upload
      .build()
      .map_err(ResourceError::upload)?
      .execute(self.queue.clone())
      .map_err(ResourceError::upload)?
      .then_signal_fence_and_flush()
      .map_err(ResourceError::upload)?
      .wait(None)
      .map_err(ResourceError::upload)?;

    ImageView::new_default(image).map_err(ResourceError::upload)
  }
}

impl GpuResources for VulkanResources {
  fn upload_mesh(&mut self, mesh: &MeshData) -> Result<GpuMesh, ResourceError> {
    if mesh.is_empty() {
      return Err(ResourceError::EmptyMesh);
    }
    let vertex_count = mesh.vertex_count();

    let positions = self.device_buffer(
      BufferUsage::VERTEX_BUFFER,
      mesh.positions.iter().map(|&position| Position { position }),
    )?;
    // hand-built meshes may omit normals or texture coordinates
    let normals = self.device_buffer(
      BufferUsage::VERTEX_BUFFER,
      (0..vertex_count).map(|i| Normal {
        normal: mesh.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
      }),
    )?;
    let tex_coords = self.device_buffer(
      BufferUsage::VERTEX_BUFFER,
      (0..vertex_count).map(|i| TexCoord {
        tex_coord: mesh.tex_coords.get(i).copied().unwrap_or_default(),
      }),
    )?;
    let indices = self.device_buffer(BufferUsage::INDEX_BUFFER, mesh.indices.iter().copied())?;

    trace!("uploaded mesh: {vertex_count} vertices, {} triangles", mesh.triangle_count());
    Ok(GpuMesh::new(
      MeshBuffers {
        positions,
        normals,
        tex_coords,
        indices,
      },
      vertex_count,
      mesh.triangle_count(),
    ))
  }

  fn upload_texture(&mut self, image: &image::RgbaImage) -> Result<GpuTexture, ResourceError> {
    let (width, height) = image.dimensions();
    let view = self.upload_rgba(width, height, image.as_raw().clone())?;
    trace!("uploaded texture {width}x{height}");
    Ok(GpuTexture::new(view, width, height))
  }
}
