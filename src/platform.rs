//! Concrete [`Platform`](crate::core::Platform) implementations.
//!
//! [`DesktopPlatform`] opens a real window. [`HeadlessPlatform`] drives the
//! same lifecycle without a display or GPU and records what happened.

pub mod desktop;
pub mod headless;

pub use desktop::{DesktopPlatform, DesktopShell};
pub use headless::{HeadlessMonitor, HeadlessPlatform, Milestone};
