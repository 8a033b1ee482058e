//! The Vulkan graphics context in its main-thread and released forms.

use std::sync::Arc;

use egui_winit_vulkano::{Gui, GuiConfig};
use log::debug;
use vulkano::{
  image::Image,
  render_pass::{RenderPass, Subpass},
  swapchain::{Surface, Swapchain},
};
use winit::{event_loop::ActiveEventLoop, window::Window};

use crate::{
  config::AppConfig,
  core::{GraphicsContext, ReleasedContext, shared::FrameSize},
  error::{ContextError, WindowCreationError},
  render::{
    GuiInbox,
    frame::VulkanCurrent,
    init::{Gpu, create_gpu, create_instance, create_swapchain},
    pipeline::create_render_pass,
  },
};

/// Device, swapchain and GUI integration for one window.
pub struct VulkanContext {
  pub(super) gpu:         Gpu,
  pub(super) swapchain:   Arc<Swapchain>,
  pub(super) images:      Vec<Arc<Image>>,
  pub(super) render_pass: Arc<RenderPass>,
  pub(super) gui:         Gui,
  pub(super) gui_inbox:   GuiInbox,
}

impl VulkanContext {
  /// Brings up Vulkan for `window`. Must run inside the event loop's resume
  /// callback.
  pub fn new(
    event_loop: &ActiveEventLoop,
    window: Arc<Window>,
    config: &AppConfig,
    gui_inbox: GuiInbox,
  ) -> Result<Self, WindowCreationError> {
    let instance = create_instance(event_loop)?;
    let gpu = create_gpu(&instance, event_loop)?;

    let window_size = window.inner_size();
    let surface = Surface::from_window(instance, window)
      .map_err(|e| WindowCreationError::graphics("creating the surface", e))?;
    let size = FrameSize::new(window_size.width.max(1), window_size.height.max(1));
    let (swapchain, images) = create_swapchain(&gpu, &surface, size, config.vsync)?;

    let render_pass = create_render_pass(gpu.device.clone(), swapchain.image_format())
      .map_err(|e| WindowCreationError::graphics("creating the render pass", e))?;
    let gui_subpass = Subpass::from(render_pass.clone(), 1)
      .ok_or_else(|| WindowCreationError::graphics("creating the GUI", "render pass has no GUI subpass"))?;

    let gui = Gui::new_with_subpass(
      event_loop,
      surface,
      gpu.queue.clone(),
      gui_subpass,
      swapchain.image_format(),
      GuiConfig::default(),
    );
    debug!("graphics context ready at {}x{}", size.width, size.height);

    Ok(Self {
      gpu,
      swapchain,
      images,
      render_pass,
      gui,
      gui_inbox,
    })
  }
}

impl GraphicsContext for VulkanContext {
  type Released = VulkanReleased;

  fn gui(&self) -> egui::Context {
    self.gui.context()
  }

  // Vulkan has no thread-current state; giving the context up is a move.
  fn release(self) -> VulkanReleased {
    VulkanReleased(self)
  }
}

/// A [`VulkanContext`] in transit between threads.
pub struct VulkanReleased(VulkanContext);

// SAFETY: every field but `gui` is `Send` on its own: `gpu`, `swapchain`,
// `images` and `render_pass` are `Arc`s of vulkano objects, and `gui_inbox` is an
// `Arc<Mutex<_>>`. `Gui` is not, because of two fields of its
// `egui_winit::State`:
//
// * `clipboard` wraps a platform clipboard (arboard, or smithay-clipboard on
//   Wayland). It is only read or written from `Gui::update` and
//   `Gui::draw_on_subpass_image`, and both only run on the thread that owns the
//   context. Neither backend ties its handle to the thread that created it; they
//   only assume one caller at a time, which single ownership gives.
// * `accesskit` holds an `Option<accesskit_winit::Adapter>`, which would be tied
//   to the main thread. `Gui::new_with_subpass` never enables accessibility, so
//   it stays `None` for the life of the context and there is no adapter to move.
//
// A released context is owned by exactly one thread at a time: it moves into
// the render thread, is used only there, and moves back through the join handle
// after that thread has exited. Window events reach `Gui::update` through
// `gui_inbox` rather than by touching `gui` from the event thread.
unsafe impl Send for VulkanReleased {}

impl ReleasedContext for VulkanReleased {
  type Current = VulkanCurrent;

  fn claim(self, size: FrameSize) -> Result<VulkanCurrent, ContextError> {
    VulkanCurrent::new(self.0, size)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_send<T: Send>() {}

  #[test]
  fn released_context_can_cross_to_the_render_thread() {
    assert_send::<VulkanReleased>();
    assert_send::<Gpu>();
    assert_send::<Arc<Swapchain>>();
    assert_send::<Arc<RenderPass>>();
    assert_send::<GuiInbox>();
  }
}
