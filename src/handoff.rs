//! Single-slot hand-off between the event thread and the render thread.

use std::sync::Arc;

use parking_lot::Mutex;

/// A mutex-guarded slot holding at most one pending item.
///
/// Writers overwrite whatever is pending; the reader takes the item out. Cloning
/// the box yields another handle to the same slot.
#[derive(Debug)]
pub struct HandoffBox<T> {
  slot: Arc<Mutex<Option<T>>>,
}

impl<T> HandoffBox<T> {
  pub fn new() -> Self {
    Self {
      slot: Arc::new(Mutex::new(None)),
    }
  }

  /// Stores `item`, returning the pending item it replaced, if any.
  pub fn put(&self, item: T) -> Option<T> {
    self.slot.lock().replace(item)
  }

  /// Removes and returns the pending item.
  pub fn take(&self) -> Option<T> {
    self.slot.lock().take()
  }

  pub fn is_pending(&self) -> bool {
    self.slot.lock().is_some()
  }
}

impl<T> Clone for HandoffBox<T> {
  fn clone(&self) -> Self {
    Self {
      slot: Arc::clone(&self.slot),
    }
  }
}

impl<T> Default for HandoffBox<T> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{Arc, Barrier},
    thread,
  };

  use super::*;

  #[test]
  fn last_write_wins() {
    let slot = HandoffBox::new();
    assert_eq!(slot.put("first"), None);
    assert_eq!(slot.put("second"), Some("first"));
    assert_eq!(slot.take(), Some("second"));
    assert_eq!(slot.take(), None);
    assert!(!slot.is_pending());
  }

  #[test]
  fn writer_and_drainer_on_different_threads() {
    let slot = HandoffBox::new();
    let writer = slot.clone();
    let barrier = Arc::new(Barrier::new(2));
    let writer_barrier = Arc::clone(&barrier);

    let handle = thread::spawn(move || {
      writer.put(1);
      writer.put(2);
      writer_barrier.wait();
    });

    barrier.wait();
    assert_eq!(slot.take(), Some(2));
    handle.join().unwrap();
  }
}
