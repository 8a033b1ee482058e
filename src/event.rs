//! Typed window/input events and the type-directed dispatcher.
//!
//! Events are created on the main thread while translating OS callbacks and are
//! consumed synchronously before the callback returns. They never cross threads.

use std::{fmt, ops::BitOr, path::PathBuf};

use winit::{event::MouseButton, keyboard::KeyCode};

/// Category bitset used to filter events coarsely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventCategory(u8);

impl EventCategory {
  pub const NONE: Self = Self(0);
  pub const APPLICATION: Self = Self(1 << 0);
  pub const INPUT: Self = Self(1 << 1);
  pub const KEYBOARD: Self = Self(1 << 2);
  pub const MOUSE: Self = Self(1 << 3);
  pub const MOUSE_BUTTON: Self = Self(1 << 4);

  pub const fn union(self, other: Self) -> Self {
    Self(self.0 | other.0)
  }

  pub const fn intersects(self, other: Self) -> bool {
    self.0 & other.0 != 0
  }
}

impl BitOr for EventCategory {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    self.union(rhs)
  }
}

/// A concrete event payload type that [`EventDispatcher::dispatch`] can match on.
pub trait EventType: Into<EventData> {
  const KIND: EventKind;
  const CATEGORIES: EventCategory;

  fn downcast_ref(data: &EventData) -> Option<&Self>;
  fn downcast_mut(data: &mut EventData) -> Option<&mut Self>;
}

macro_rules! event_types {
  ($($variant:ident($ty:ident) => $categories:expr),* $(,)?) => {
    /// Discriminant of every event the application understands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum EventKind {
      $($variant),*
    }

    impl EventKind {
      pub const fn name(self) -> &'static str {
        match self {
          $(Self::$variant => stringify!($variant)),*
        }
      }

      pub const fn categories(self) -> EventCategory {
        match self {
          $(Self::$variant => $categories),*
        }
      }
    }

    /// Kind-specific payload of an [`Event`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum EventData {
      $($variant($ty)),*
    }

    impl EventData {
      pub const fn kind(&self) -> EventKind {
        match self {
          $(Self::$variant(_) => EventKind::$variant),*
        }
      }
    }

    $(
      impl EventType for $ty {
        const KIND: EventKind = EventKind::$variant;
        const CATEGORIES: EventCategory = $categories;

        fn downcast_ref(data: &EventData) -> Option<&Self> {
          match data {
            EventData::$variant(event) => Some(event),
            #[allow(unreachable_patterns)]
            _ => None,
          }
        }

        fn downcast_mut(data: &mut EventData) -> Option<&mut Self> {
          match data {
            EventData::$variant(event) => Some(event),
            #[allow(unreachable_patterns)]
            _ => None,
          }
        }
      }

      impl From<$ty> for EventData {
        fn from(event: $ty) -> Self {
          Self::$variant(event)
        }
      }
    )*
  };
}

const APP: EventCategory = EventCategory::APPLICATION;
const APP_INPUT: EventCategory = EventCategory::APPLICATION.union(EventCategory::INPUT);
const KEY_INPUT: EventCategory = EventCategory::KEYBOARD.union(EventCategory::INPUT);
const MOUSE_INPUT: EventCategory = EventCategory::MOUSE.union(EventCategory::INPUT);
const MOUSE_BUTTON_INPUT: EventCategory = MOUSE_INPUT.union(EventCategory::MOUSE_BUTTON);

event_types! {
  WindowClose(WindowCloseEvent) => APP,
  WindowResize(WindowResizeEvent) => APP,
  WindowFocus(WindowFocusEvent) => APP,
  WindowLostFocus(WindowLostFocusEvent) => APP,
  WindowMoved(WindowMovedEvent) => APP,
  WindowDrop(WindowDropEvent) => APP_INPUT,
  AppTick(AppTickEvent) => APP,
  AppUpdate(AppUpdateEvent) => APP,
  AppRender(AppRenderEvent) => APP,
  KeyPressed(KeyPressedEvent) => KEY_INPUT,
  KeyReleased(KeyReleasedEvent) => KEY_INPUT,
  KeyTyped(KeyTypedEvent) => KEY_INPUT,
  MouseButtonPressed(MouseButtonPressedEvent) => MOUSE_BUTTON_INPUT,
  MouseButtonReleased(MouseButtonReleasedEvent) => MOUSE_BUTTON_INPUT,
  MouseMoved(MouseMovedEvent) => MOUSE_INPUT,
  MouseScrolled(MouseScrolledEvent) => MOUSE_INPUT,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCloseEvent;

/// New framebuffer size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowResizeEvent {
  pub width:  u32,
  pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowFocusEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowLostFocusEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMovedEvent {
  pub x: i32,
  pub y: i32,
}

/// Every file dropped onto the window in one OS event batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowDropEvent {
  pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppTickEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppUpdateEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppRenderEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPressedEvent {
  pub key:    KeyCode,
  pub repeat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyReleasedEvent {
  pub key: KeyCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTypedEvent {
  pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButtonPressedEvent {
  pub button: MouseButton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButtonReleasedEvent {
  pub button: MouseButton,
}

/// Cursor position in physical pixels relative to the window origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseMovedEvent {
  pub x: f32,
  pub y: f32,
}

/// Scroll offsets in lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseScrolledEvent {
  pub x_offset: f32,
  pub y_offset: f32,
}

/// One event instance plus its `handled` flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
  /// Once set, layer traversal stops delivering this event.
  pub handled: bool,
  data:        EventData,
}

impl Event {
  pub fn new(data: impl Into<EventData>) -> Self {
    Self {
      handled: false,
      data:    data.into(),
    }
  }

  pub fn kind(&self) -> EventKind {
    self.data.kind()
  }

  pub fn name(&self) -> &'static str {
    self.kind().name()
  }

  pub fn is_in_category(&self, category: EventCategory) -> bool {
    self.kind().categories().intersects(category)
  }

  pub fn data(&self) -> &EventData {
    &self.data
  }

  /// Typed view of the payload, if this event is a `T`.
  pub fn get<T: EventType>(&self) -> Option<&T> {
    T::downcast_ref(&self.data)
  }
}

impl<T: EventType> From<T> for Event {
  fn from(event: T) -> Self {
    Self::new(event)
  }
}

impl fmt::Display for Event {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.data {
      EventData::WindowResize(e) => write!(f, "WindowResizeEvent: {}, {}", e.width, e.height),
      EventData::WindowMoved(e) => write!(f, "WindowMovedEvent: {}, {}", e.x, e.y),
      EventData::WindowDrop(e) => write!(f, "WindowDropEvent: {} files", e.paths.len()),
      EventData::KeyPressed(e) => write!(f, "KeyPressedEvent: {:?} (repeat = {})", e.key, e.repeat),
      EventData::KeyReleased(e) => write!(f, "KeyReleasedEvent: {:?}", e.key),
      EventData::KeyTyped(e) => write!(f, "KeyTypedEvent: {:?}", e.text),
      EventData::MouseButtonPressed(e) => write!(f, "MouseButtonPressedEvent: {:?}", e.button),
      EventData::MouseButtonReleased(e) => write!(f, "MouseButtonReleasedEvent: {:?}", e.button),
      EventData::MouseMoved(e) => write!(f, "MouseMovedEvent: {}, {}", e.x, e.y),
      EventData::MouseScrolled(e) => write!(f, "MouseScrolledEvent: {}, {}", e.x_offset, e.y_offset),
      other => f.write_str(other.kind().name()),
    }
  }
}

/// Routes one event to the handler whose payload type matches.
///
/// Each `dispatch` call is independent: a match does not prevent later calls with
/// other types from running. Only layer traversal honours `handled`.
pub struct EventDispatcher<'a> {
  event: &'a mut Event,
}

impl<'a> EventDispatcher<'a> {
  pub fn new(event: &'a mut Event) -> Self {
    Self { event }
  }

  /// Invokes `handler` if the event is a `T`, OR-ing its result into `handled`.
  ///
  /// Returns whether the type matched, not whether the handler consumed it.
  pub fn dispatch<T: EventType>(&mut self, handler: impl FnOnce(&mut T) -> bool) -> bool {
    let Event { handled, data } = &mut *self.event;
    match T::downcast_mut(data) {
      Some(typed) => {
        *handled |= handler(typed);
        true
      }
      None => false,
    }
  }
}
