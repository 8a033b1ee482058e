//! Render pass, pipelines and framebuffers.
//!
//! The render pass has two subpasses. Subpass 0 draws the scene into a 4x
//! multisampled color target that resolves into the swapchain image; subpass 1
//! belongs to the GUI, which paints straight onto the resolved image.
//!
//! Pipelines use a dynamic viewport so they survive swapchain recreation; only
//! the framebuffers are rebuilt on resize.

use std::sync::Arc;

use vulkano::{
  Validated,
  VulkanError,
  device::Device,
  format::Format,
  image::{Image, ImageCreateInfo, ImageType, ImageUsage, SampleCount, view::ImageView},
  memory::allocator::{AllocationCreateInfo, StandardMemoryAllocator},
  pipeline::{
    DynamicState,
    GraphicsPipeline,
    PipelineLayout,
    PipelineShaderStageCreateInfo,
    graphics::{
      GraphicsPipelineCreateInfo,
      color_blend::{
        AttachmentBlend,
        BlendFactor,
        BlendOp,
        ColorBlendAttachmentState,
        ColorBlendState,
        ColorComponents,
      },
      depth_stencil::{DepthState, DepthStencilState},
      input_assembly::{InputAssemblyState, PrimitiveTopology},
      multisample::MultisampleState,
      rasterization::{CullMode, PolygonMode, RasterizationState},
      vertex_input::{Vertex, VertexDefinition},
      viewport::ViewportState,
    },
    layout::PipelineDescriptorSetLayoutCreateInfo,
  },
  render_pass::{Framebuffer, FramebufferCreateInfo, RenderPass, Subpass},
  shader::{EntryPoint, ShaderModule},
};

use crate::{
  error::{ContextError, FrameError},
  render::{
    shaders::{line_fs, line_vs, model_fs, model_vs},
    vertex::{LineVertex, Normal, Position, TexCoord},
  },
};

const SAMPLES: SampleCount = SampleCount::Sample4;
const DEPTH_FORMAT: Format = Format::D32_SFLOAT;

/// Every pipeline the scene subpass can bind.
pub(crate) struct Pipelines {
  pub fill:      Arc<GraphicsPipeline>,
  /// `None` when the device cannot rasterize polygons as lines.
  pub wireframe: Option<Arc<GraphicsPipeline>>,
  pub lines:     Arc<GraphicsPipeline>,
}

impl Pipelines {
  pub fn new(
    device: &Arc<Device>,
    render_pass: &Arc<RenderPass>,
    supports_wireframe: bool,
  ) -> Result<Self, ContextError> {
    let subpass = Subpass::from(render_pass.clone(), 0)
      .ok_or_else(|| ContextError::new("creating pipelines", "render pass has no scene subpass"))?;

    let model_vs = entry_point(model_vs::load(device.clone()))?;
    let model_fs = entry_point(model_fs::load(device.clone()))?;
    let fill = model_pipeline(device, &subpass, &model_vs, &model_fs, PolygonMode::Fill)?;
    let wireframe = if supports_wireframe {
      Some(model_pipeline(device, &subpass, &model_vs, &model_fs, PolygonMode::Line)?)
    } else {
      None
    };

    let line_vs = entry_point(line_vs::load(device.clone()))?;
    let line_fs = entry_point(line_fs::load(device.clone()))?;
    let lines = line_pipeline(device, &subpass, &line_vs, &line_fs)?;

    Ok(Self {
      fill,
      wireframe,
      lines,
    })
  }

  /// The pipeline for a model, falling back to fill when wireframe is unavailable.
  pub fn for_model(&self, wireframe: bool) -> &Arc<GraphicsPipeline> {
    match (&self.wireframe, wireframe) {
      (Some(pipeline), true) => pipeline,
      _ => &self.fill,
    }
  }
}

fn entry_point(module: Result<Arc<ShaderModule>, Validated<VulkanError>>) -> Result<EntryPoint, ContextError> {
  module
    .map_err(|e| ContextError::new("loading shaders", e))?
    .entry_point("main")
    .ok_or_else(|| ContextError::new("loading shaders", "shader has no `main` entry point"))
}

fn pipeline_layout(
  device: &Arc<Device>,
  stages: &[PipelineShaderStageCreateInfo],
) -> Result<Arc<PipelineLayout>, ContextError> {
  let create_info = PipelineDescriptorSetLayoutCreateInfo::from_stages(stages)
    .into_pipeline_layout_create_info(device.clone())
    .map_err(|e| ContextError::new("creating the pipeline layout", e))?;
  PipelineLayout::new(device.clone(), create_info)
    .map_err(|e| ContextError::new("creating the pipeline layout", e))
}

fn alpha_blending(subpass: &Subpass) -> ColorBlendState {
  ColorBlendState::with_attachment_states(subpass.num_color_attachments(), ColorBlendAttachmentState {
    blend: Some(AttachmentBlend {
      src_color_blend_factor: BlendFactor::SrcAlpha,
      dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
      color_blend_op:         BlendOp::Add,
      src_alpha_blend_factor: BlendFactor::One,
      dst_alpha_blend_factor: BlendFactor::Zero,
      alpha_blend_op:         BlendOp::Add,
    }),
    color_write_mask: ColorComponents::all(),
    ..Default::default()
  })
}

fn model_pipeline(
  device: &Arc<Device>,
  subpass: &Subpass,
  vs: &EntryPoint,
  fs: &EntryPoint,
  polygon_mode: PolygonMode,
) -> Result<Arc<GraphicsPipeline>, ContextError> {
  let vertex_input_state = [
    Position::per_vertex(),
    Normal::per_vertex(),
    TexCoord::per_vertex(),
  ]
  .definition(vs)
  .map_err(|e| ContextError::new("defining vertex input", e))?;

  let stages = [
    PipelineShaderStageCreateInfo::new(vs.clone()),
    PipelineShaderStageCreateInfo::new(fs.clone()),
  ];
  let layout = pipeline_layout(device, &stages)?;

  GraphicsPipeline::new(device.clone(), None, GraphicsPipelineCreateInfo {
    stages: stages.into_iter().collect(),
    vertex_input_state: Some(vertex_input_state),
    input_assembly_state: Some(InputAssemblyState::default()),
    viewport_state: Some(ViewportState::default()),
    rasterization_state: Some(RasterizationState {
      cull_mode: CullMode::None,
      polygon_mode,
      ..Default::default()
    }),
    depth_stencil_state: Some(DepthStencilState {
      depth: Some(DepthState::simple()),
      ..Default::default()
    }),
    multisample_state: Some(MultisampleState {
      rasterization_samples: SAMPLES,
      ..Default::default()
    }),
    color_blend_state: Some(alpha_blending(subpass)),
    dynamic_state: [DynamicState::Viewport].into_iter().collect(),
    subpass: Some(subpass.clone().into()),
    ..GraphicsPipelineCreateInfo::layout(layout)
  })
  .map_err(|e| ContextError::new("creating the model pipeline", e))
}

fn line_pipeline(
  device: &Arc<Device>,
  subpass: &Subpass,
  vs: &EntryPoint,
  fs: &EntryPoint,
) -> Result<Arc<GraphicsPipeline>, ContextError> {
  let vertex_input_state = LineVertex::per_vertex()
    .definition(vs)
    .map_err(|e| ContextError::new("defining vertex input", e))?;

  let stages = [
    PipelineShaderStageCreateInfo::new(vs.clone()),
    PipelineShaderStageCreateInfo::new(fs.clone()),
  ];
  let layout = pipeline_layout(device, &stages)?;

  GraphicsPipeline::new(device.clone(), None, GraphicsPipelineCreateInfo {
    stages: stages.into_iter().collect(),
    vertex_input_state: Some(vertex_input_state),
    input_assembly_state: Some(InputAssemblyState {
      topology: PrimitiveTopology::LineList,
      ..Default::default()
    }),
    viewport_state: Some(ViewportState::default()),
    rasterization_state: Some(RasterizationState {
      cull_mode: CullMode::None,
      ..Default::default()
    }),
    depth_stencil_state: Some(DepthStencilState {
      depth: Some(DepthState::simple()),
      ..Default::default()
    }),
    multisample_state: Some(MultisampleState {
      rasterization_samples: SAMPLES,
      ..Default::default()
    }),
    color_blend_state: Some(alpha_blending(subpass)),
    dynamic_state: [DynamicState::Viewport].into_iter().collect(),
    subpass: Some(subpass.clone().into()),
    ..GraphicsPipelineCreateInfo::layout(layout)
  })
  .map_err(|e| ContextError::new("creating the line pipeline", e))
}

/// Scene subpass with MSAA resolve, then the GUI subpass on the resolved image.
pub(crate) fn create_render_pass(
  device: Arc<Device>,
  image_format: Format,
) -> Result<Arc<RenderPass>, Validated<VulkanError>> {
  vulkano::ordered_passes_renderpass!(
    device,
    attachments: {
      msaa_color: {
        format: image_format,
        samples: 4,
        load_op: Clear,
        store_op: DontCare,
      },
      final_color: {
        format: image_format,
        samples: 1,
        load_op: DontCare,
        store_op: Store,
      },
      depth: {
        format: DEPTH_FORMAT,
        samples: 4,
        load_op: Clear,
        store_op: DontCare,
      }
    },
    passes: [
      {
        color: [msaa_color],
        color_resolve: [final_color],
        depth_stencil: {depth},
        input: []
      },
      {
        color: [final_color],
        depth_stencil: {},
        input: []
      }
    ]
  )
}

fn transient_attachment(
  memory_allocator: &Arc<StandardMemoryAllocator>,
  format: Format,
  extent: [u32; 3],
  usage: ImageUsage,
) -> Result<Arc<ImageView>, FrameError> {
  let image = Image::new(
    memory_allocator.clone(),
    ImageCreateInfo {
      image_type: ImageType::Dim2d,
      format,
      extent,
      usage: usage | ImageUsage::TRANSIENT_ATTACHMENT,
      samples: SAMPLES,
      ..Default::default()
    },
    AllocationCreateInfo::default(),
  )
  .map_err(|e| FrameError::new("allocating attachments", e))?;
  ImageView::new_default(image).map_err(|e| FrameError::new("allocating attachments", e))
}

/// One framebuffer per swapchain image: `[msaa color, swapchain image, depth]`.
/// The depth buffer is shared.
pub(crate) fn create_framebuffers(
  images: &[Arc<Image>],
  render_pass: &Arc<RenderPass>,
  memory_allocator: &Arc<StandardMemoryAllocator>,
) -> Result<Vec<Arc<Framebuffer>>, FrameError> {
  let Some(first) = images.first() else {
    return Err(FrameError::new("creating framebuffers", "swapchain has no images"));
  };
  let depth = transient_attachment(
    memory_allocator,
    DEPTH_FORMAT,
    first.extent(),
    ImageUsage::DEPTH_STENCIL_ATTACHMENT,
  )?;

  images
    .iter()
    .map(|image| {
      let view =
        ImageView::new_default(image.clone()).map_err(|e| FrameError::new("creating framebuffers", e))?;
      let msaa_color = transient_attachment(
        memory_allocator,
        image.format(),
        image.extent(),
        ImageUsage::COLOR_ATTACHMENT,
      )?;
      Framebuffer::new(render_pass.clone(), FramebufferCreateInfo {
        attachments: vec![msaa_color, view, depth.clone()],
        ..Default::default()
      })
      .map_err(|e| FrameError::new("creating framebuffers", e))
    })
    .collect()
}
