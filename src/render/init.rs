//! Vulkan bring-up on the main thread.
//!
//! Everything here runs inside the windowing library's resume callback, because
//! both the surface and the GUI integration need the active event loop:
//! * instance, physical device selection and logical device
//! * allocators shared by every later stage
//! * surface and swapchain for the new window
//! * the render pass, whose second subpass the GUI renders into

use std::sync::Arc;

use log::{debug, info};
use vulkano::{
  VulkanLibrary,
  command_buffer::allocator::StandardCommandBufferAllocator,
  descriptor_set::allocator::StandardDescriptorSetAllocator,
  device::{
    Device,
    DeviceCreateInfo,
    DeviceExtensions,
    DeviceFeatures,
    Queue,
    QueueCreateInfo,
    QueueFlags,
    physical::PhysicalDeviceType,
  },
  format::Format,
  image::{Image, ImageUsage},
  instance::{Instance, InstanceCreateFlags, InstanceCreateInfo},
  memory::allocator::StandardMemoryAllocator,
  swapchain::{CompositeAlpha, PresentMode, Surface, Swapchain, SwapchainCreateInfo},
};
use winit::event_loop::ActiveEventLoop;

use crate::{core::shared::FrameSize, error::WindowCreationError};

/// Device-level objects that live as long as the context.
pub(crate) struct Gpu {
  pub device:                   Arc<Device>,
  pub queue:                    Arc<Queue>,
  pub memory_allocator:         Arc<StandardMemoryAllocator>,
  pub descriptor_set_allocator: Arc<StandardDescriptorSetAllocator>,
  pub command_buffer_allocator: Arc<StandardCommandBufferAllocator>,
  /// Whether `PolygonMode::Line` may be used
  pub supports_wireframe:       bool,
}

pub(crate) fn create_instance(event_loop: &ActiveEventLoop) -> Result<Arc<Instance>, WindowCreationError> {
  let library =
    VulkanLibrary::new().map_err(|e| WindowCreationError::graphics("loading the Vulkan library", e))?;
  let required_extensions = Surface::required_extensions(event_loop)
    .map_err(|e| WindowCreationError::graphics("querying surface extensions", e))?;

  Instance::new(library, InstanceCreateInfo {
    flags: InstanceCreateFlags::ENUMERATE_PORTABILITY,
    enabled_extensions: required_extensions,
    ..Default::default()
  })
  .map_err(|e| WindowCreationError::graphics("creating the instance", e))
}

/// Picks the most capable device that can both render and present, preferring
/// discrete GPUs.
pub(crate) fn create_gpu(
  instance: &Arc<Instance>,
  event_loop: &ActiveEventLoop,
) -> Result<Gpu, WindowCreationError> {
  let device_extensions = DeviceExtensions {
    khr_swapchain: true,
    ..DeviceExtensions::empty()
  };

  let (physical_device, queue_family_index) = instance
    .enumerate_physical_devices()
    .map_err(|e| WindowCreationError::graphics("enumerating devices", e))?
    .filter(|p| p.supported_extensions().contains(&device_extensions))
    .filter_map(|p| {
      p.queue_family_properties()
        .iter()
        .enumerate()
        .position(|(i, q)| {
          q.queue_flags.intersects(QueueFlags::GRAPHICS)
            && p.presentation_support(i as u32, event_loop).unwrap_or(false)
        })
        .map(|i| (p, i as u32))
    })
    .min_by_key(|(p, _)| match p.properties().device_type {
      PhysicalDeviceType::DiscreteGpu => 0,
      PhysicalDeviceType::IntegratedGpu => 1,
      PhysicalDeviceType::VirtualGpu => 2,
      PhysicalDeviceType::Cpu => 3,
      PhysicalDeviceType::Other => 4,
      _ => 5,
    })
    .ok_or_else(|| {
      WindowCreationError::graphics("selecting a device", "no device supports graphics and presentation")
    })?;

  info!(
    "using device {} ({:?})",
    physical_device.properties().device_name,
    physical_device.properties().device_type,
  );

  let supports_wireframe = physical_device.supported_features().fill_mode_non_solid;
  if !supports_wireframe {
    debug!("device lacks fill_mode_non_solid; wireframe disabled");
  }

  let (device, mut queues) = Device::new(physical_device, DeviceCreateInfo {
    enabled_extensions: device_extensions,
    enabled_features: DeviceFeatures {
      fill_mode_non_solid: supports_wireframe,
      #[cfg(target_os = "macos")]
      image_view_format_swizzle: true,
      ..DeviceFeatures::empty()
    },
    queue_create_infos: vec![QueueCreateInfo {
      queue_family_index,
      ..Default::default()
    }],
    ..Default::default()
  })
  .map_err(|e| WindowCreationError::graphics("creating the device", e))?;

  let queue = queues
    .next()
    .ok_or_else(|| WindowCreationError::graphics("creating the device", "no queue returned"))?;

  let memory_allocator = Arc::new(StandardMemoryAllocator::new_default(device.clone()));
  let descriptor_set_allocator = Arc::new(StandardDescriptorSetAllocator::new(
    device.clone(),
    Default::default(),
  ));
  let command_buffer_allocator = Arc::new(StandardCommandBufferAllocator::new(
    device.clone(),
    Default::default(),
  ));

  Ok(Gpu {
    device,
    queue,
    memory_allocator,
    descriptor_set_allocator,
    command_buffer_allocator,
    supports_wireframe,
  })
}

/// FIFO when vsync is on; otherwise the lowest-latency mode the surface offers.
pub(crate) fn choose_present_mode(available: &[PresentMode], vsync: bool) -> PresentMode {
  if vsync {
    PresentMode::Fifo
  } else if available.contains(&PresentMode::Immediate) {
    PresentMode::Immediate
  } else if available.contains(&PresentMode::Mailbox) {
    PresentMode::Mailbox
  } else {
    PresentMode::Fifo
  }
}

pub(crate) fn create_swapchain(
  gpu: &Gpu,
  surface: &Arc<Surface>,
  size: FrameSize,
  vsync: bool,
) -> Result<(Arc<Swapchain>, Vec<Arc<Image>>), WindowCreationError> {
  let physical_device = gpu.device.physical_device();
  let surface_capabilities = physical_device
    .surface_capabilities(surface, Default::default())
    .map_err(|e| WindowCreationError::graphics("querying surface capabilities", e))?;

  let present_modes: Vec<PresentMode> = physical_device
    .surface_present_modes(surface, Default::default())
    .map_err(|e| WindowCreationError::graphics("querying present modes", e))?
    .into_iter()
    .collect();
  let present_mode = choose_present_mode(&present_modes, vsync);
  debug!("present mode {present_mode:?}");

  // the GUI renderer wants a linear target
  let formats = physical_device
    .surface_formats(surface, Default::default())
    .map_err(|e| WindowCreationError::graphics("querying surface formats", e))?;
  let (image_format, _) = formats
    .iter()
    .copied()
    .find(|(format, _)| {
      matches!(
        format,
        Format::B8G8R8A8_UNORM | Format::R8G8B8A8_UNORM | Format::A8B8G8R8_UNORM_PACK32
      )
    })
    .or_else(|| formats.first().copied())
    .ok_or_else(|| WindowCreationError::graphics("choosing a surface format", "no formats"))?;
  debug!("surface format {image_format:?}");

  Swapchain::new(gpu.device.clone(), surface.clone(), SwapchainCreateInfo {
    min_image_count: surface_capabilities.min_image_count.max(2),
    image_format,
    image_extent: size.into(),
    image_usage: ImageUsage::COLOR_ATTACHMENT,
    composite_alpha: CompositeAlpha::Opaque,
    pre_transform: surface_capabilities.current_transform,
    clipped: true,
    present_mode,
    ..Default::default()
  })
  .map_err(|e| WindowCreationError::graphics("creating the swapchain", e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn vsync_always_uses_fifo() {
    let all = [PresentMode::Immediate, PresentMode::Mailbox, PresentMode::Fifo];
    assert_eq!(choose_present_mode(&all, true), PresentMode::Fifo);
  }

  #[test]
  fn no_vsync_prefers_immediate_then_mailbox() {
    let all = [PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate];
    assert_eq!(choose_present_mode(&all, false), PresentMode::Immediate);
    let no_immediate = [PresentMode::Fifo, PresentMode::Mailbox];
    assert_eq!(choose_present_mode(&no_immediate, false), PresentMode::Mailbox);
    assert_eq!(choose_present_mode(&[PresentMode::Fifo], false), PresentMode::Fifo);
  }
}
