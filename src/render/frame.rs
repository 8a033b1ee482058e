//! Frame recording and presentation on the render thread.
//!
//! Each frame follows this sequence:
//! 1. Rebuild the swapchain if the window size changed or presentation asked for it
//! 2. Acquire the next swapchain image
//! 3. Record the scene subpass, then the GUI subpass
//! 4. Submit, and present on `swap_buffers`

use std::{ops::Range, sync::Arc};

use log::{debug, trace, warn};
use vulkano::{
  Validated,
  VulkanError,
  buffer::{
    Buffer,
    BufferCreateInfo,
    BufferUsage,
    Subbuffer,
    allocator::{SubbufferAllocator, SubbufferAllocatorCreateInfo},
  },
  command_buffer::{
    AutoCommandBufferBuilder,
    CommandBufferUsage,
    PrimaryAutoCommandBuffer,
    RenderPassBeginInfo,
    SubpassBeginInfo,
    SubpassContents,
    SubpassEndInfo,
  },
  descriptor_set::{DescriptorSet, WriteDescriptorSet},
  image::{
    sampler::{Filter, Sampler, SamplerAddressMode, SamplerCreateInfo},
    view::ImageView,
  },
  memory::allocator::{AllocationCreateInfo, MemoryTypeFilter},
  pipeline::{Pipeline, PipelineBindPoint, graphics::viewport::Viewport},
  render_pass::Framebuffer,
  swapchain::{SwapchainCreateInfo, SwapchainPresentInfo, acquire_next_image},
  sync::{self, GpuFuture},
};

use crate::{
  core::{CurrentContext, GraphicsContext, shared::FrameSize},
  error::{ContextError, FrameError},
  render::{
    context::{VulkanContext, VulkanReleased},
    pipeline::{Pipelines, create_framebuffers},
    resources::{MeshBuffers, VulkanResources},
    shaders::{line_vs, model_vs},
    vertex::LineVertex,
  },
  scene::{CameraMatrices, GpuResources, ModelDraw, Scene},
};

const GRID_HALF_EXTENT: i32 = 10;
const GRID_COLOR: [f32; 3] = [0.35, 0.35, 0.38];
const AXIS_LENGTH: f32 = 2.0;

/// Grid and axis lines, sharing one vertex buffer.
struct Guides {
  vertices: Subbuffer<[LineVertex]>,
  grid:     Range<u32>,
  axes:     Range<u32>,
}

/// A submitted frame waiting to be presented.
struct PendingFrame {
  future:      Box<dyn GpuFuture>,
  image_index: u32,
}

/// A [`VulkanContext`] claimed by the render thread, plus the renderer state
/// that only exists while claimed.
pub struct VulkanCurrent {
  context:            VulkanContext,
  resources:          VulkanResources,
  pipelines:          Pipelines,
  framebuffers:       Vec<Arc<Framebuffer>>,
  uniform_allocator:  SubbufferAllocator,
  sampler:            Arc<Sampler>,
  default_texture:    Arc<ImageView>,
  guides:             Guides,
  target_size:        FrameSize,
  recreate_swapchain: bool,
  previous_frame_end: Option<Box<dyn GpuFuture>>,
  pending:            Option<PendingFrame>,
}

fn recording(err: impl std::fmt::Debug) -> FrameError {
  FrameError::new("recording commands", err)
}

impl VulkanCurrent {
  pub(crate) fn new(context: VulkanContext, size: FrameSize) -> Result<Self, ContextError> {
    let gpu = &context.gpu;
    let pipelines = Pipelines::new(&gpu.device, &context.render_pass, gpu.supports_wireframe)?;
    let framebuffers = create_framebuffers(&context.images, &context.render_pass, &gpu.memory_allocator)
      .map_err(|e| ContextError {
        stage:   e.stage,
        message: e.message,
      })?;

    let uniform_allocator = SubbufferAllocator::new(gpu.memory_allocator.clone(), SubbufferAllocatorCreateInfo {
      buffer_usage: BufferUsage::UNIFORM_BUFFER,
      memory_type_filter: MemoryTypeFilter::PREFER_DEVICE | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
      ..Default::default()
    });

    let resources = VulkanResources::new(
      gpu.queue.clone(),
      gpu.memory_allocator.clone(),
      gpu.command_buffer_allocator.clone(),
    );
    // bound when a model has no texture of its own
    let default_texture = resources
      .upload_rgba(1, 1, vec![255; 4])
      .map_err(|e| ContextError::new("uploading the default texture", e))?;

    let sampler = Sampler::new(gpu.device.clone(), SamplerCreateInfo {
      mag_filter: Filter::Linear,
      min_filter: Filter::Linear,
      address_mode: [SamplerAddressMode::Repeat; 3],
      ..Default::default()
    })
    .map_err(|e| ContextError::new("creating the sampler", e))?;

    let (vertices, grid, axes) = guide_vertices();
    let vertices = Buffer::from_iter(
      gpu.memory_allocator.clone(),
      BufferCreateInfo {
        usage: BufferUsage::VERTEX_BUFFER,
        ..Default::default()
      },
      AllocationCreateInfo {
        memory_type_filter: MemoryTypeFilter::PREFER_DEVICE | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
        ..Default::default()
      },
      vertices,
    )
    .map_err(|e| ContextError::new("uploading guide lines", e))?;

    let previous_frame_end = Some(sync::now(gpu.device.clone()).boxed());
    let extent = context.swapchain.image_extent();
    let recreate_swapchain = extent != <[u32; 2]>::from(size);
    debug!("renderer claimed context, swapchain {}x{}", extent[0], extent[1]);

    Ok(Self {
      context,
      resources,
      pipelines,
      framebuffers,
      uniform_allocator,
      sampler,
      default_texture,
      guides: Guides {
        vertices,
        grid,
        axes,
      },
      target_size: size,
      recreate_swapchain,
      previous_frame_end,
      pending: None,
    })
  }

  fn rebuild_swapchain(&mut self) -> Result<(), FrameError> {
    let (swapchain, images) = self
      .context
      .swapchain
      .recreate(SwapchainCreateInfo {
        image_extent: self.target_size.into(),
        ..self.context.swapchain.create_info()
      })
      .map_err(|e| FrameError::new("recreating the swapchain", e))?;

    self.framebuffers = create_framebuffers(
      &images,
      &self.context.render_pass,
      &self.context.gpu.memory_allocator,
    )?;
    self.context.swapchain = swapchain;
    self.context.images = images;
    self.recreate_swapchain = false;
    debug!(
      "swapchain rebuilt at {}x{}",
      self.target_size.width, self.target_size.height
    );
    Ok(())
  }

  fn record(&mut self, scene: &Scene, image_index: u32) -> Result<Arc<PrimaryAutoCommandBuffer>, FrameError> {
    let framebuffer = self
      .framebuffers
      .get(image_index as usize)
      .cloned()
      .ok_or_else(|| FrameError::new("recording commands", format!("no framebuffer for image {image_index}")))?;
    let extent = self.context.swapchain.image_extent();

    let mut builder = AutoCommandBufferBuilder::primary(
      self.context.gpu.command_buffer_allocator.clone(),
      self.context.gpu.queue.queue_family_index(),
      CommandBufferUsage::OneTimeSubmit,
    )
    .map_err(recording)?;

    builder
      .begin_render_pass(
        RenderPassBeginInfo {
          clear_values: vec![
            Some(scene.clear_color.into()), // msaa_color
            None,                           // final_color
            Some(1.0.into()),               // depth
          ],
          ..RenderPassBeginInfo::framebuffer(framebuffer)
        },
        SubpassBeginInfo {
          contents: SubpassContents::Inline,
          ..Default::default()
        },
      )
      .map_err(recording)?
      .set_viewport(
        0,
        [Viewport {
          offset:      [0.0, 0.0],
          extent:      [extent[0] as f32, extent[1] as f32],
          depth_range: 0.0..=1.0,
        }]
        .into_iter()
        .collect(),
      )
      .map_err(recording)?;

    if let Some(camera) = &scene.camera {
      self.record_guides(&mut builder, scene, camera)?;
      for model in &scene.models {
        self.record_model(&mut builder, model, camera)?;
      }
    }

    builder
      .next_subpass(SubpassEndInfo::default(), SubpassBeginInfo {
        contents: SubpassContents::SecondaryCommandBuffers,
        ..Default::default()
      })
      .map_err(recording)?;
    let gui_commands = self.context.gui.draw_on_subpass_image(extent);
    builder.execute_commands(gui_commands).map_err(recording)?;
    builder.end_render_pass(SubpassEndInfo::default()).map_err(recording)?;

    builder.build().map_err(recording)
  }

  fn record_guides(
    &self,
    builder: &mut AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>,
    scene: &Scene,
    camera: &CameraMatrices,
  ) -> Result<(), FrameError> {
    if !scene.show_grid && !scene.show_axes {
      return Ok(());
    }
    let pipeline = self.pipelines.lines.clone();
    builder
      .bind_pipeline_graphics(pipeline.clone())
      .map_err(recording)?
      .push_constants(pipeline.layout().clone(), 0, line_vs::PushConstants {
        view_proj: (camera.proj * camera.view).to_cols_array_2d(),
      })
      .map_err(recording)?
      .bind_vertex_buffers(0, self.guides.vertices.clone())
      .map_err(recording)?;

    let ranges = [
      (scene.show_grid, &self.guides.grid),
      (scene.show_axes, &self.guides.axes),
    ];
    for (_, range) in ranges.into_iter().filter(|(visible, _)| *visible) {
      unsafe { builder.draw(range.end - range.start, 1, range.start, 0) }.map_err(recording)?;
    }
    Ok(())
  }

  fn record_model(
    &self,
    builder: &mut AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>,
    model: &ModelDraw,
    camera: &CameraMatrices,
  ) -> Result<(), FrameError> {
    let pipeline = self.pipelines.for_model(model.wireframe).clone();

    let uniform_buffer = self
      .uniform_allocator
      .allocate_sized()
      .map_err(|e| FrameError::new("allocating uniforms", e))?;
    *uniform_buffer
      .write()
      .map_err(|e| FrameError::new("writing uniforms", e))? = model_vs::Data {
      world: model.transform.to_cols_array_2d(),
      view:  camera.view.to_cols_array_2d(),
      proj:  camera.proj.to_cols_array_2d(),
      tint:  model.tint,
    };

    let texture = model
      .texture
      .as_ref()
      .and_then(|texture| texture.image::<Arc<ImageView>>())
      .unwrap_or(&self.default_texture)
      .clone();

    let layout = pipeline
      .layout()
      .set_layouts()
      .first()
      .ok_or_else(|| FrameError::new("binding descriptors", "pipeline has no descriptor set layout"))?;
    let descriptor_set = DescriptorSet::new(
      self.context.gpu.descriptor_set_allocator.clone(),
      layout.clone(),
      [
        WriteDescriptorSet::buffer(0, uniform_buffer),
        WriteDescriptorSet::image_view_sampler(1, texture, self.sampler.clone()),
      ],
      [],
    )
    .map_err(|e| FrameError::new("binding descriptors", e))?;

    builder
      .bind_pipeline_graphics(pipeline.clone())
      .map_err(recording)?
      .bind_descriptor_sets(
        PipelineBindPoint::Graphics,
        pipeline.layout().clone(),
        0,
        descriptor_set,
      )
      .map_err(recording)?;

    for mesh in &model.meshes {
      let Some(buffers) = mesh.buffers::<MeshBuffers>() else {
        warn!("skipping a mesh that was not uploaded by this context");
        continue;
      };
      builder
        .bind_vertex_buffers(
          0,
          (
            buffers.positions.clone(),
            buffers.normals.clone(),
            buffers.tex_coords.clone(),
          ),
        )
        .map_err(recording)?
        .bind_index_buffer(buffers.indices.clone())
        .map_err(recording)?;
      unsafe { builder.draw_indexed(buffers.indices.len() as u32, 1, 0, 0, 0) }.map_err(recording)?;
    }
    Ok(())
  }
}

impl CurrentContext<VulkanReleased> for VulkanCurrent {
  fn apply_size(&mut self, size: FrameSize) {
    if size != self.target_size {
      trace!("target size {}x{}", size.width, size.height);
      self.target_size = size;
      self.recreate_swapchain = true;
    }
  }

  fn resources(&mut self) -> &mut dyn GpuResources {
    &mut self.resources
  }

  fn build_ui(&mut self, ui: &mut dyn FnMut(&egui::Context)) {
    let events = std::mem::take(&mut *self.context.gui_inbox.lock());
    for event in &events {
      self.context.gui.update(event);
    }
    self.context.gui.immediate_ui(|gui| {
      let ctx = gui.context();
      ui(&ctx);
    });
  }

  fn draw(&mut self, scene: &Scene) -> Result<(), FrameError> {
    if let Some(previous_frame_end) = self.previous_frame_end.as_mut() {
      previous_frame_end.cleanup_finished();
    }

    // minimized; nothing to draw into
    if self.target_size.is_empty() {
      return Ok(());
    }
    if self.recreate_swapchain {
      self.rebuild_swapchain()?;
    }

    let (image_index, suboptimal, acquire_future) =
      match acquire_next_image(self.context.swapchain.clone(), None).map_err(Validated::unwrap) {
        Ok(r) => r,
        Err(VulkanError::OutOfDate) => {
          self.recreate_swapchain = true;
          return Ok(());
        }
        Err(e) => return Err(FrameError::new("acquiring a swapchain image", e)),
      };
    if suboptimal {
      self.recreate_swapchain = true;
    }

    let command_buffer = self.record(scene, image_index)?;

    let device = self.context.gpu.device.clone();
    let future = self
      .previous_frame_end
      .take()
      .unwrap_or_else(|| sync::now(device).boxed())
      .join(acquire_future)
      .then_execute(self.context.gpu.queue.clone(), command_buffer)
      .map_err(|e| FrameError::new("submitting commands", e))?;

    self.pending = Some(PendingFrame {
      future: future.boxed(),
      image_index,
    });
    Ok(())
  }

  fn swap_buffers(&mut self) -> Result<(), FrameError> {
    let Some(frame) = self.pending.take() else {
      return Ok(());
    };

    let presented = frame
      .future
      .then_swapchain_present(
        self.context.gpu.queue.clone(),
        SwapchainPresentInfo::swapchain_image_index(self.context.swapchain.clone(), frame.image_index),
      )
      .then_signal_fence_and_flush();

    match presented.map_err(Validated::unwrap) {
      Ok(future) => {
        self.previous_frame_end = Some(future.boxed());
        Ok(())
      }
      Err(VulkanError::OutOfDate) => {
        self.recreate_swapchain = true;
        self.previous_frame_end = Some(sync::now(self.context.gpu.device.clone()).boxed());
        Ok(())
      }
      Err(e) => {
        self.previous_frame_end = Some(sync::now(self.context.gpu.device.clone()).boxed());
        Err(FrameError::new("presenting", e))
      }
    }
  }

  fn release(mut self) -> VulkanReleased {
    // dropping the fence future blocks until the GPU is done with the last frame
    drop(self.pending.take());
    drop(self.previous_frame_end.take());
    let Self { context, .. } = self;
    debug!("renderer released");
    context.release()
  }
}

/// A ground grid in the XZ plane plus unit-colored X, Y and Z axes.
fn guide_vertices() -> (Vec<LineVertex>, Range<u32>, Range<u32>) {
  let mut vertices = Vec::new();
  let extent = GRID_HALF_EXTENT as f32;
  for i in -GRID_HALF_EXTENT..=GRID_HALF_EXTENT {
    let offset = i as f32;
    for (from, to) in [
      ([offset, 0.0, -extent], [offset, 0.0, extent]),
      ([-extent, 0.0, offset], [extent, 0.0, offset]),
    ] {
      vertices.push(LineVertex {
        position: from,
        color:    GRID_COLOR,
      });
      vertices.push(LineVertex {
        position: to,
        color:    GRID_COLOR,
      });
    }
  }
  let grid = 0..vertices.len() as u32;

  for axis in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
    vertices.push(LineVertex {
      position: [0.0; 3],
      color:    axis,
    });
    vertices.push(LineVertex {
      position: axis.map(|c| c * AXIS_LENGTH),
      color:    axis,
    });
  }
  let axes = grid.end..vertices.len() as u32;

  (vertices, grid, axes)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn guide_ranges_cover_all_vertices() {
    let (vertices, grid, axes) = guide_vertices();
    let lines_per_axis = (2 * GRID_HALF_EXTENT + 1) as u32;

    assert_eq!(grid, 0..lines_per_axis * 4);
    assert_eq!(axes.start, grid.end);
    assert_eq!(axes.end - axes.start, 6);
    assert_eq!(axes.end as usize, vertices.len());
  }

  #[test]
  fn axes_are_colored_by_direction() {
    let (vertices, _, axes) = guide_vertices();
    let axis_vertices = &vertices[axes.start as usize..axes.end as usize];
    for pair in axis_vertices.chunks_exact(2) {
      assert_eq!(pair[0].position, [0.0; 3]);
      assert_eq!(pair[1].position, pair[1].color.map(|c| c * AXIS_LENGTH));
    }
  }
}
