//! State visible to both the event thread and the render thread.
//!
//! Every field is an independent atomic. Width and height may disagree with the
//! swapchain for one frame; the render thread picks them up at the top of its
//! next frame.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Framebuffer dimensions in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
  pub width:  u32,
  pub height: u32,
}

impl FrameSize {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub const fn is_empty(self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn aspect_ratio(self) -> f32 {
    if self.height == 0 {
      1.0
    } else {
      self.width as f32 / self.height as f32
    }
  }
}

impl From<FrameSize> for [u32; 2] {
  fn from(size: FrameSize) -> Self {
    [size.width, size.height]
  }
}

#[derive(Debug)]
pub struct SharedFrameState {
  width:    AtomicU32,
  height:   AtomicU32,
  running:  AtomicBool,
  finished: AtomicBool,
}

impl SharedFrameState {
  pub fn new(size: FrameSize) -> Self {
    Self {
      width:    AtomicU32::new(size.width),
      height:   AtomicU32::new(size.height),
      running:  AtomicBool::new(false),
      finished: AtomicBool::new(false),
    }
  }

  pub fn size(&self) -> FrameSize {
    FrameSize {
      width:  self.width.load(Ordering::Acquire),
      height: self.height.load(Ordering::Acquire),
    }
  }

  /// Publishes a new size. Returns `false` when nothing changed.
  pub fn set_size(&self, size: FrameSize) -> bool {
    let old_width = self.width.swap(size.width, Ordering::AcqRel);
    let old_height = self.height.swap(size.height, Ordering::AcqRel);
    old_width != size.width || old_height != size.height
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  pub fn set_running(&self, running: bool) {
    self.running.store(running, Ordering::Release);
  }

  /// Set by the render thread once its loop exited and backend resources are gone.
  pub fn is_finished(&self) -> bool {
    self.finished.load(Ordering::Acquire)
  }

  pub(crate) fn set_finished(&self, finished: bool) {
    self.finished.store(finished, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_size_reports_changes_only() {
    let state = SharedFrameState::new(FrameSize::new(1600, 900));
    assert!(!state.set_size(FrameSize::new(1600, 900)));
    assert!(state.set_size(FrameSize::new(1280, 900)));
    assert_eq!(state.size(), FrameSize::new(1280, 900));
  }

  #[test]
  fn flags_start_cleared() {
    let state = SharedFrameState::new(FrameSize::new(1, 1));
    assert!(!state.is_running());
    assert!(!state.is_finished());
    state.set_running(true);
    assert!(state.is_running());
  }

  #[test]
  fn aspect_ratio_of_empty_size() {
    assert_eq!(FrameSize::new(0, 0).aspect_ratio(), 1.0);
    assert!(FrameSize::new(0, 10).is_empty());
    assert_eq!(FrameSize::new(200, 100).aspect_ratio(), 2.0);
  }
}
