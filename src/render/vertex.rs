//! Vertex layouts. Mesh attributes live in separate buffers, one binding each.

use vulkano::{buffer::BufferContents, pipeline::graphics::vertex_input::Vertex};

#[derive(BufferContents, Vertex, Clone, Copy)]
#[repr(C)]
pub struct Position {
  #[format(R32G32B32_SFLOAT)]
  pub position: [f32; 3],
}

#[derive(BufferContents, Vertex, Clone, Copy)]
#[repr(C)]
pub struct Normal {
  #[format(R32G32B32_SFLOAT)]
  pub normal: [f32; 3],
}

#[derive(BufferContents, Vertex, Clone, Copy)]
#[repr(C)]
pub struct TexCoord {
  #[format(R32G32_SFLOAT)]
  pub tex_coord: [f32; 2],
}

/// Interleaved vertex of the grid and axis lines.
#[derive(BufferContents, Vertex, Clone, Copy)]
#[repr(C)]
pub struct LineVertex {
  #[format(R32G32B32_SFLOAT)]
  pub position: [f32; 3],
  #[format(R32G32B32_SFLOAT)]
  pub color:    [f32; 3],
}
