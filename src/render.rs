//! Vulkan backend of the viewer.
//!
//! * [`init`]: instance, device and swapchain bring-up
//! * [`pipeline`]: render pass, pipelines and framebuffers
//! * [`context`]: the context as created on the main thread and while in transit
//! * [`frame`]: the context claimed by the render thread, which records and presents
//! * [`resources`]: mesh and texture uploads

use std::sync::Arc;

use parking_lot::Mutex;
use winit::event::WindowEvent;

pub mod context;
pub mod frame;
pub(crate) mod init;
pub(crate) mod pipeline;
pub(crate) mod resources;
pub mod shaders;
pub mod vertex;

pub use context::{VulkanContext, VulkanReleased};
pub use frame::VulkanCurrent;

/// Raw window events queued by the main thread for the GUI, which lives on the
/// render thread.
pub type GuiInbox = Arc<Mutex<Vec<WindowEvent>>>;
