use std::f32::consts::FRAC_PI_4;

use glam::{Mat4, Vec3};

use crate::{model::Bounds, scene::CameraMatrices};

/// Radians per pixel of mouse drag.
pub const ORBIT_SENSITIVITY: f32 = 0.005;
/// Target movement per pixel of drag, as a fraction of the orbit distance.
pub const PAN_FACTOR: f32 = 0.01;
/// Distance change per scroll line.
pub const ZOOM_STEP: f32 = 0.5;
/// Orbit distance limits shared by zooming, fitting and the inspector slider.
pub const MIN_DISTANCE: f32 = 1.0;
pub const MAX_DISTANCE: f32 = 20.0;
/// Keeps the camera off the poles, where the up vector degenerates.
pub const MAX_PITCH: f32 = 1.55;

/// Camera orbiting a target point on a sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
  pub target:   Vec3,
  pub distance: f32,
  /// Rotation around the Y axis, radians
  pub yaw:      f32,
  /// Elevation above the XZ plane, radians
  pub pitch:    f32,
  /// Vertical field of view, degrees
  pub fov:      f32,
  pub near:     f32,
  pub far:      f32,
}

impl OrbitCamera {
  pub fn new() -> Self {
    // starts at (5, 5, 5) looking at the origin
    Self {
      target:   Vec3::ZERO,
      distance: 75.0_f32.sqrt(),
      yaw:      FRAC_PI_4,
      pitch:    (1.0 / 3.0_f32.sqrt()).asin(),
      fov:      45.0,
      near:     0.01,
      far:      1000.0,
    }
  }

  pub fn position(&self) -> Vec3 {
    let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
    let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
    self.target + self.distance * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
  }

  /// Rotates around the target by a mouse delta in pixels.
  pub fn orbit(&mut self, dx: f32, dy: f32) {
    self.yaw -= dx * ORBIT_SENSITIVITY;
    self.pitch = (self.pitch - dy * ORBIT_SENSITIVITY).clamp(-MAX_PITCH, MAX_PITCH);
  }

  /// Slides the target in the view plane by a mouse delta in pixels.
  pub fn pan(&mut self, dx: f32, dy: f32) {
    let speed = PAN_FACTOR * self.distance;
    let forward = (self.target - self.position()).normalize_or_zero();
    let right = forward.cross(Vec3::Y).normalize_or_zero();
    let up = right.cross(forward);

    self.target -= right * dx * speed;
    self.target += up * dy * speed;
  }

  /// Moves toward the target for positive `lines`, staying within
  /// [`MIN_DISTANCE`] and [`MAX_DISTANCE`].
  pub fn zoom(&mut self, lines: f32) {
    self.distance = (self.distance - lines * ZOOM_STEP).clamp(MIN_DISTANCE, MAX_DISTANCE);
  }

  /// Frames `bounds`: aims at its centre from 2.5 times its largest extent,
  /// clamped to the zoom range.
  pub fn fit(&mut self, bounds: &Bounds) {
    self.target = bounds.center();
    self.distance = (bounds.max_extent() * 2.5).clamp(MIN_DISTANCE, MAX_DISTANCE);
    self.yaw = 0.0;
    self.pitch = 0.5;
  }

  pub fn view(&self) -> Mat4 {
    Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
  }

  /// Perspective projection in Vulkan clip space (Y down).
  pub fn projection(&self, aspect_ratio: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(self.fov.to_radians(), aspect_ratio, self.near, self.far);
    proj.y_axis.y *= -1.0;
    proj
  }

  pub fn matrices(&self, aspect_ratio: f32) -> CameraMatrices {
    CameraMatrices {
      view: self.view(),
      proj: self.projection(aspect_ratio),
    }
  }
}

impl Default for OrbitCamera {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn close(a: Vec3, b: Vec3) -> bool {
    (a - b).length() < 1e-4
  }

  #[test]
  fn default_position_matches_initial_eye() {
    assert!(close(OrbitCamera::new().position(), Vec3::splat(5.0)));
  }

  #[test]
  fn zoom_is_clamped() {
    let mut camera = OrbitCamera::new();
    camera.zoom(1000.0);
    assert_eq!(camera.distance, MIN_DISTANCE);
    camera.zoom(-2.0);
    assert_eq!(camera.distance, MIN_DISTANCE + 1.0);
    camera.zoom(-1000.0);
    assert_eq!(camera.distance, MAX_DISTANCE);
  }

  #[test]
  fn fit_stays_within_the_zoom_range() {
    let mut camera = OrbitCamera::new();
    camera.fit(&Bounds {
      min: Vec3::splat(-50.0),
      max: Vec3::splat(50.0),
    });
    assert_eq!(camera.distance, MAX_DISTANCE);
    camera.fit(&Bounds {
      min: Vec3::ZERO,
      max: Vec3::splat(0.01),
    });
    assert_eq!(camera.distance, MIN_DISTANCE);
  }

  #[test]
  fn pitch_never_reaches_the_poles() {
    let mut camera = OrbitCamera::new();
    camera.orbit(0.0, -100_000.0);
    assert_eq!(camera.pitch, MAX_PITCH);
    camera.orbit(0.0, 100_000.0);
    assert_eq!(camera.pitch, -MAX_PITCH);
  }

  #[test]
  fn fit_frames_the_bounds() {
    let mut camera = OrbitCamera::new();
    camera.fit(&Bounds {
      min: Vec3::new(-1.0, 0.0, -1.0),
      max: Vec3::new(3.0, 2.0, 1.0),
    });
    assert!(close(camera.target, Vec3::new(1.0, 1.0, 0.0)));
    assert_eq!(camera.distance, 10.0);
    assert!((camera.position() - camera.target).length() - 10.0 < 1e-4);
  }

  #[test]
  fn pan_keeps_the_viewing_direction() {
    let mut camera = OrbitCamera::new();
    let before = (camera.target - camera.position()).normalize();
    camera.pan(10.0, -4.0);
    let after = (camera.target - camera.position()).normalize();
    assert!(close(before, after));
    assert!(!close(camera.target, Vec3::ZERO));
  }
}
