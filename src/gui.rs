//! GUI styling and frame statistics.
//!
//! [`setup`] runs on the main thread right after window creation, while the GUI
//! context is still owned there. It installs the dark theme and, when configured,
//! a TTF font. Fonts are only rasterized at the first frame, on the render
//! thread, so font files are parsed here first and rejected before egui sees them.

use std::{fs, path::Path};

use egui::{Color32, CornerRadius, FontData, FontDefinitions, FontFamily, Margin, Stroke, TextStyle, vec2};

use crate::{config::AppConfig, error::FontError};

const FONT_NAME: &str = "ui-font";

// Palette
const BG_DARK: Color32 = Color32::from_rgb(26, 27, 28);
const BG_MEDIUM: Color32 = Color32::from_rgb(31, 33, 36);
const BG_LIGHT: Color32 = Color32::from_rgb(38, 41, 43);
pub(crate) const ACCENT: Color32 = Color32::from_rgb(51, 115, 230);
const ACCENT_HOVER: Color32 = Color32::from_rgb(77, 140, 242);
const ACCENT_ACTIVE: Color32 = Color32::from_rgb(38, 102, 217);
const TEXT: Color32 = Color32::from_rgb(230, 230, 235);
pub(crate) const TEXT_DISABLED: Color32 = Color32::from_rgb(128, 128, 140);
const BORDER: Color32 = Color32::from_rgba_premultiplied(32, 32, 34, 128);

/// Applies the theme and the configured font to `ctx`.
pub fn setup(ctx: &egui::Context, config: &AppConfig) {
  apply_theme(ctx, config.font_size);

  if let Some(path) = &config.font_path {
    match load_font(ctx, path) {
      Ok(()) => log::debug!("using UI font {}", path.display()),
      Err(err) => log::warn!(
        "failed to load font {}: {err}; falling back to the built-in font",
        path.display()
      ),
    }
  }
}

/// Dark palette with a blue accent, flat title bars and slightly rounded frames.
pub fn apply_theme(ctx: &egui::Context, font_size: f32) {
  ctx.style_mut(|style| {
    let visuals = &mut style.visuals;
    *visuals = egui::Visuals::dark();

    visuals.override_text_color = Some(TEXT);
    visuals.window_fill = BG_DARK;
    visuals.panel_fill = BG_DARK;
    visuals.faint_bg_color = BG_MEDIUM;
    visuals.extreme_bg_color = BG_MEDIUM;
    visuals.window_stroke = Stroke::new(1.0, BORDER);
    visuals.hyperlink_color = ACCENT_HOVER;
    visuals.selection.bg_fill = ACCENT.gamma_multiply(0.25);
    visuals.selection.stroke = Stroke::new(1.0, ACCENT);
    visuals.window_corner_radius = CornerRadius::same(4);
    visuals.menu_corner_radius = CornerRadius::same(4);

    let widgets = &mut visuals.widgets;
    widgets.noninteractive.bg_fill = BG_DARK;
    widgets.noninteractive.bg_stroke = Stroke::new(1.0, BORDER);
    widgets.noninteractive.fg_stroke = Stroke::new(1.0, TEXT_DISABLED);
    widgets.inactive.bg_fill = BG_LIGHT;
    widgets.inactive.weak_bg_fill = BG_LIGHT;
    widgets.hovered.bg_fill = ACCENT_HOVER;
    widgets.hovered.weak_bg_fill = ACCENT_HOVER;
    widgets.active.bg_fill = ACCENT_ACTIVE;
    widgets.active.weak_bg_fill = ACCENT_ACTIVE;
    for widget in [
      &mut widgets.noninteractive,
      &mut widgets.inactive,
      &mut widgets.hovered,
      &mut widgets.active,
      &mut widgets.open,
    ] {
      widget.corner_radius = CornerRadius::same(4);
    }

    style.spacing.window_margin = Margin::same(12);
    style.spacing.button_padding = vec2(8.0, 5.0);
    style.spacing.item_spacing = vec2(8.0, 8.0);

    for (text_style, font_id) in style.text_styles.iter_mut() {
      font_id.size = match text_style {
        TextStyle::Heading => font_size * 1.3,
        TextStyle::Small => font_size * 0.75,
        _ => font_size,
      };
    }
  });
}

/// Makes the TTF/OTF file at `path` the first choice for proportional text.
pub fn load_font(ctx: &egui::Context, path: &Path) -> Result<(), FontError> {
  let bytes = fs::read(path)?;
  ttf_parser::Face::parse(&bytes, 0)?;

  let mut fonts = FontDefinitions::default();
  fonts
    .font_data
    .insert(FONT_NAME.to_owned(), FontData::from_owned(bytes).into());
  fonts
    .families
    .entry(FontFamily::Proportional)
    .or_default()
    .insert(0, FONT_NAME.to_owned());
  ctx.set_fonts(fonts);
  Ok(())
}

/// Frame timing shown in the inspector.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
  /// Frames per second of the last frame
  pub fps:        f32,
  /// Average frames per second, refreshed once per second
  pub avg_fps:    f32,
  /// Last frame time in seconds
  pub frame_time: f32,
  frame_count:    u32,
  accumulated:    f32,
}

impl FrameStats {
  pub fn record(&mut self, dt: f32) {
    if dt <= 0.0 {
      return;
    }
    self.frame_time = dt;
    self.fps = 1.0 / dt;
    self.frame_count += 1;
    self.accumulated += dt;

    if self.accumulated >= 1.0 {
      self.avg_fps = self.frame_count as f32 / self.accumulated;
      self.frame_count = 0;
      self.accumulated = 0.0;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn average_refreshes_after_a_second() {
    let mut stats = FrameStats::default();
    for _ in 0..59 {
      stats.record(1.0 / 60.0);
    }
    assert_eq!(stats.avg_fps, 0.0);
    assert!((stats.fps - 60.0).abs() < 0.01);

    stats.record(1.0 / 60.0 + 0.001);
    assert!((stats.avg_fps - 60.0).abs() < 0.1);
  }

  #[test]
  fn non_positive_frame_times_are_ignored() {
    let mut stats = FrameStats::default();
    stats.record(0.0);
    stats.record(-1.0);
    assert_eq!(stats.fps, 0.0);
  }

  #[test]
  fn theme_scales_text_styles() {
    let ctx = egui::Context::default();
    apply_theme(&ctx, 20.0);
    let style = ctx.style();
    assert_eq!(style.text_styles[&TextStyle::Body].size, 20.0);
    assert!((style.text_styles[&TextStyle::Heading].size - 26.0).abs() < 1e-4);
    assert_eq!(style.visuals.window_fill, BG_DARK);
  }

  #[test]
  fn missing_font_file_is_an_error() {
    let ctx = egui::Context::default();
    assert!(matches!(
      load_font(&ctx, Path::new("/no/such/font.ttf")),
      Err(FontError::Io(_))
    ));
  }

  #[test]
  fn garbage_font_file_is_rejected_before_the_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.ttf");
    std::fs::write(&path, b"not a font").unwrap();

    let ctx = egui::Context::default();
    assert!(matches!(load_font(&ctx, &path), Err(FontError::Parse(_))));

    // the built-in fonts still render
    let config = AppConfig {
      font_path: Some(path),
      ..AppConfig::default()
    };
    setup(&ctx, &config);
    let _ = ctx.run(egui::RawInput::default(), |ctx| {
      egui::CentralPanel::default().show(ctx, |ui| ui.label("still here"));
    });
  }
}
