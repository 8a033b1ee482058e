//! Model file import.
//!
//! [`load_model`] dispatches on the file extension and returns CPU-side mesh data
//! ready for upload. Parsing happens on whichever thread calls it; uploading is
//! the render thread's job (see [`crate::scene::GpuResources`]).

use std::{
  fs,
  path::{Path, PathBuf},
};

use glam::Vec3;

use crate::error::ModelLoadError;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
  pub min: Vec3,
  pub max: Vec3,
}

impl Bounds {
  pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f32; 3]>) -> Option<Self> {
    let mut points = points.into_iter().map(|p| Vec3::from_array(*p));
    let first = points.next()?;
    Some(points.fold(Self { min: first, max: first }, |bounds, p| Self {
      min: bounds.min.min(p),
      max: bounds.max.max(p),
    }))
  }

  pub fn union(self, other: Self) -> Self {
    Self {
      min: self.min.min(other.min),
      max: self.max.max(other.max),
    }
  }

  pub fn center(&self) -> Vec3 {
    (self.min + self.max) * 0.5
  }

  pub fn size(&self) -> Vec3 {
    (self.max - self.min).abs()
  }

  /// Largest side length, never zero.
  pub fn max_extent(&self) -> f32 {
    let extent = self.size().max_element();
    if extent > 0.0 { extent } else { 1.0 }
  }
}

/// Triangle mesh with per-vertex attributes sharing one index buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
  pub positions:  Vec<[f32; 3]>,
  pub normals:    Vec<[f32; 3]>,
  pub tex_coords: Vec<[f32; 2]>,
  pub indices:    Vec<u32>,
}

impl MeshData {
  pub fn vertex_count(&self) -> usize {
    self.positions.len()
  }

  pub fn triangle_count(&self) -> usize {
    self.indices.len() / 3
  }

  pub fn is_empty(&self) -> bool {
    self.positions.is_empty() || self.indices.len() < 3
  }

  pub fn bounds(&self) -> Option<Bounds> {
    Bounds::from_points(&self.positions)
  }

  /// Replaces normals with smooth normals accumulated from face geometry.
  pub fn generate_normals(&mut self) {
    let mut normals = vec![Vec3::ZERO; self.positions.len()];
    for triangle in self.indices.chunks_exact(3) {
      let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
      if a >= normals.len() || b >= normals.len() || c >= normals.len() {
        continue;
      }
      let pa = Vec3::from_array(self.positions[a]);
      let pb = Vec3::from_array(self.positions[b]);
      let pc = Vec3::from_array(self.positions[c]);
      let face = (pb - pa).cross(pc - pa);
      normals[a] += face;
      normals[b] += face;
      normals[c] += face;
    }
    self.normals = normals
      .into_iter()
      .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
      .collect();
  }

  /// An axis-aligned cube centred on the origin.
  pub fn cube(size: f32) -> Self {
    let h = size * 0.5;
    // (normal, u axis, v axis) per face
    let faces = [
      (Vec3::X, Vec3::NEG_Z, Vec3::Y),
      (Vec3::NEG_X, Vec3::Z, Vec3::Y),
      (Vec3::Y, Vec3::X, Vec3::NEG_Z),
      (Vec3::NEG_Y, Vec3::X, Vec3::Z),
      (Vec3::Z, Vec3::X, Vec3::Y),
      (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut mesh = Self::default();
    for (normal, u, v) in faces {
      let base = mesh.positions.len() as u32;
      for (du, dv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
        let corner = (normal + u * du + v * dv) * h;
        mesh.positions.push(corner.to_array());
        mesh.normals.push(normal.to_array());
        mesh.tex_coords.push([(du + 1.0) * 0.5, 1.0 - (dv + 1.0) * 0.5]);
      }
      mesh
        .indices
        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh
  }
}

/// Result of a successful import.
#[derive(Debug, Clone)]
pub struct LoadedModel {
  pub path:            PathBuf,
  pub meshes:          Vec<MeshData>,
  pub material_count:  usize,
  pub diffuse_texture: Option<PathBuf>,
}

impl LoadedModel {
  pub fn bounds(&self) -> Bounds {
    self
      .meshes
      .iter()
      .filter_map(MeshData::bounds)
      .reduce(Bounds::union)
      .unwrap_or_default()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
  Obj,
  Gltf,
  Glb,
  Iqm,
  Fbx,
}

impl ModelFormat {
  pub fn from_path(path: &Path) -> Option<Self> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
      "obj" => Some(Self::Obj),
      "gltf" => Some(Self::Gltf),
      "glb" => Some(Self::Glb),
      "iqm" => Some(Self::Iqm),
      "fbx" => Some(Self::Fbx),
      _ => None,
    }
  }

  /// Formats with an importer wired up.
  pub fn is_supported(self) -> bool {
    !matches!(self, Self::Iqm)
  }
}

/// Imports the model at `path`.
///
/// Fails with [`ModelLoadError::NoMeshes`] when the file parses but yields no
/// drawable geometry.
pub fn load_model(path: &Path) -> Result<LoadedModel, ModelLoadError> {
  let format = ModelFormat::from_path(path)
    .filter(|format| format.is_supported())
    .ok_or_else(|| ModelLoadError::UnsupportedFormat(path.to_path_buf()))?;

  // surface missing files as I/O errors rather than parser noise
  fs::metadata(path)?;

  match format {
    ModelFormat::Obj => load_obj(path),
    ModelFormat::Gltf | ModelFormat::Glb => load_gltf(path),
    ModelFormat::Fbx => load_fbx(path),
    ModelFormat::Iqm => Err(ModelLoadError::UnsupportedFormat(path.to_path_buf())),
  }
}

fn parse_error(path: &Path, message: impl ToString) -> ModelLoadError {
  ModelLoadError::Parse {
    path:    path.to_path_buf(),
    message: message.to_string(),
  }
}

fn load_obj(path: &Path) -> Result<LoadedModel, ModelLoadError> {
  let (models, materials) = tobj::load_obj(path, &tobj::LoadOptions {
    single_index: true,
    triangulate: true,
    ..Default::default()
  })
  .map_err(|err| parse_error(path, err))?;

  let materials = materials.unwrap_or_else(|err| {
    log::warn!("ignoring materials of {}: {err}", path.display());
    Vec::new()
  });

  let meshes: Vec<MeshData> = models
    .into_iter()
    .map(|model| {
      let mesh = model.mesh;
      let positions: Vec<[f32; 3]> = mesh
        .positions
        .chunks_exact(3)
        .map(|xyz| [xyz[0], xyz[1], xyz[2]])
        .collect();
      let tex_coords = if mesh.texcoords.len() / 2 == positions.len() {
        mesh
          .texcoords
          .chunks_exact(2)
          .map(|uv| [uv[0], 1.0 - uv[1]])
          .collect()
      } else {
        vec![[0.0; 2]; positions.len()]
      };
      let mut data = MeshData {
        normals: Vec::new(),
        tex_coords,
        indices: mesh.indices,
        positions,
      };
      if mesh.normals.len() / 3 == data.positions.len() {
        data.normals = mesh
          .normals
          .chunks_exact(3)
          .map(|xyz| [xyz[0], xyz[1], xyz[2]])
          .collect();
      } else {
        data.generate_normals();
      }
      data
    })
    .filter(|mesh| !mesh.is_empty())
    .collect();

  if meshes.is_empty() {
    return Err(ModelLoadError::NoMeshes(path.to_path_buf()));
  }

  let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
  let diffuse_texture = materials
    .iter()
    .filter_map(|material| material.diffuse_texture.as_deref())
    .find(|name| !name.trim().is_empty())
    .map(|name| base_dir.join(name.trim()));

  Ok(LoadedModel {
    path: path.to_path_buf(),
    material_count: materials.len(),
    meshes,
    diffuse_texture,
  })
}

/// Triangle primitives of every glTF mesh; buffers and images may be embedded or
/// referenced relative to `path`.
fn load_gltf(path: &Path) -> Result<LoadedModel, ModelLoadError> {
  let (document, buffers, _images) = gltf::import(path).map_err(|err| parse_error(path, err))?;

  let mut meshes = Vec::new();
  for primitive in document.meshes().flat_map(|mesh| mesh.primitives()) {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
      log::debug!("skipping {:?} primitive in {}", primitive.mode(), path.display());
      continue;
    }
    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
    let Some(positions) = reader.read_positions() else {
      continue;
    };
    let positions: Vec<[f32; 3]> = positions.collect();
    let count = positions.len();

    let mut data = MeshData {
      tex_coords: reader
        .read_tex_coords(0)
        .map(|uvs| uvs.into_f32().collect())
        .filter(|uvs: &Vec<[f32; 2]>| uvs.len() == count)
        .unwrap_or_else(|| vec![[0.0; 2]; count]),
      indices: reader
        .read_indices()
        .map(|indices| indices.into_u32().collect())
        .unwrap_or_else(|| (0..count as u32).collect()),
      normals: Vec::new(),
      positions,
    };
    match reader.read_normals() {
      Some(normals) => data.normals = normals.collect(),
      None => data.generate_normals(),
    }
    if data.normals.len() != count {
      data.generate_normals();
    }
    if !data.is_empty() {
      meshes.push(data);
    }
  }

  if meshes.is_empty() {
    return Err(ModelLoadError::NoMeshes(path.to_path_buf()));
  }

  let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
  let diffuse_texture = document
    .materials()
    .filter_map(|material| material.pbr_metallic_roughness().base_color_texture())
    .find_map(|info| match info.texture().source().source() {
      gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => Some(base_dir.join(uri)),
      _ => None,
    });

  Ok(LoadedModel {
    path: path.to_path_buf(),
    material_count: document.materials().len(),
    meshes,
    diffuse_texture,
  })
}

/// Every FBX mesh, fan-triangulated and unrolled so each corner owns its vertex.
fn load_fbx(path: &Path) -> Result<LoadedModel, ModelLoadError> {
  let filename = path
    .to_str()
    .ok_or_else(|| parse_error(path, "path is not valid UTF-8"))?;
  let opts = ufbx::LoadOpts {
    target_axes: ufbx::CoordinateAxes {
      right: ufbx::CoordinateAxis::PositiveX,
      up:    ufbx::CoordinateAxis::PositiveY,
      front: ufbx::CoordinateAxis::PositiveZ,
    },
    target_unit_meters: 1.0,
    ..Default::default()
  };
  let scene = ufbx::load_file(filename, opts).map_err(|err| parse_error(path, format!("{err:?}")))?;

  let mut meshes = Vec::new();
  for mesh in scene.meshes.iter() {
    let mut data = MeshData::default();
    let has_normals = mesh.vertex_normal.exists;
    let has_uvs = mesh.vertex_uv.exists;

    for face in mesh.faces.iter() {
      for corner in 2..face.num_indices {
        for index in [face.index_begin, face.index_begin + corner - 1, face.index_begin + corner] {
          let index = index as usize;
          if index >= mesh.vertex_position.indices.len() {
            continue;
          }
          let p = mesh.vertex_position.values[mesh.vertex_position.indices[index] as usize];
          data.positions.push([p.x as f32, p.y as f32, p.z as f32]);
          if has_normals && index < mesh.vertex_normal.indices.len() {
            let n = mesh.vertex_normal.values[mesh.vertex_normal.indices[index] as usize];
            data.normals.push([n.x as f32, n.y as f32, n.z as f32]);
          }
          let uv = if has_uvs && index < mesh.vertex_uv.indices.len() {
            let uv = mesh.vertex_uv.values[mesh.vertex_uv.indices[index] as usize];
            [uv.x as f32, 1.0 - uv.y as f32]
          } else {
            [0.0; 2]
          };
          data.tex_coords.push(uv);
        }
      }
    }

    data.indices = (0..data.positions.len() as u32).collect();
    if data.normals.len() != data.positions.len() {
      data.generate_normals();
    }
    if !data.is_empty() {
      meshes.push(data);
    }
  }

  if meshes.is_empty() {
    log::debug!("{} has no mesh geometry", path.display());
    return Err(ModelLoadError::NoMeshes(path.to_path_buf()));
  }

  Ok(LoadedModel {
    path: path.to_path_buf(),
    material_count: scene.materials.len(),
    meshes,
    diffuse_texture: None,
  })
}

/// Decodes an image file to RGBA8.
pub fn load_texture(path: &Path) -> Result<image::RgbaImage, ModelLoadError> {
  let decoded = image::open(path).map_err(|err| ModelLoadError::Texture {
    path:    path.to_path_buf(),
    message: err.to_string(),
  })?;
  Ok(decoded.to_rgba8())
}

#[cfg(test)]
mod tests {
  use super::*;

  const TRIANGLE_OBJ: &str = "v 0 0 0\nv 2 0 0\nv 0 1 0\nf 1 2 3\n";
  const QUAD_OBJ: &str = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nvt 0 0\nf 1//1 2//1 3//1 4//1\n";

  fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
  }

  #[test]
  fn obj_without_normals_gets_generated_ones() {
    let dir = tempfile::tempdir().unwrap();
    let model = load_model(&write(&dir, "tri.obj", TRIANGLE_OBJ)).unwrap();

    assert_eq!(model.meshes.len(), 1);
    let mesh = &model.meshes[0];
    assert_eq!(mesh.vertex_count(), 3);
    assert_eq!(mesh.triangle_count(), 1);
    assert_eq!(mesh.normals.len(), 3);
    for normal in &mesh.normals {
      assert!((Vec3::from_array(*normal) - Vec3::Z).length() < 1e-5);
    }
    assert_eq!(model.bounds().max_extent(), 2.0);
  }

  #[test]
  fn quads_are_triangulated() {
    let dir = tempfile::tempdir().unwrap();
    let model = load_model(&write(&dir, "quad.obj", QUAD_OBJ)).unwrap();
    assert_eq!(model.meshes[0].triangle_count(), 2);
    assert_eq!(model.material_count, 0);
    assert!(model.diffuse_texture.is_none());
  }

  #[test]
  fn empty_obj_reports_no_meshes() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_model(&write(&dir, "empty.obj", "# nothing here\n")).unwrap_err();
    assert!(matches!(err, ModelLoadError::NoMeshes(_)));
  }

  #[test]
  fn unknown_and_unwired_formats_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_model(&write(&dir, "notes.txt", "hello")).unwrap_err();
    assert!(matches!(err, ModelLoadError::UnsupportedFormat(_)));

    let err = load_model(&write(&dir, "rig.IQM", "")).unwrap_err();
    assert!(matches!(err, ModelLoadError::UnsupportedFormat(_)));
    assert_eq!(ModelFormat::from_path(Path::new("a.GLB")), Some(ModelFormat::Glb));
    assert!(ModelFormat::Fbx.is_supported());
  }

  // one triangle, positions only, buffer embedded as a data URI
  const TRIANGLE_GLTF: &str = r#"{
    "asset": { "version": "2.0" },
    "scene": 0,
    "scenes": [{ "nodes": [0] }],
    "nodes": [{ "mesh": 0 }],
    "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
    "accessors": [{
      "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
      "min": [0, 0, 0], "max": [1, 1, 0]
    }],
    "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
    "buffers": [{
      "byteLength": 36,
      "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAA"
    }]
  }"#;

  #[test]
  fn gltf_triangle_without_indices_or_normals() {
    let dir = tempfile::tempdir().unwrap();
    let model = load_model(&write(&dir, "tri.gltf", TRIANGLE_GLTF)).unwrap();

    assert_eq!(model.meshes.len(), 1);
    let mesh = &model.meshes[0];
    assert_eq!(mesh.indices, vec![0, 1, 2]);
    assert_eq!(mesh.tex_coords, vec![[0.0; 2]; 3]);
    assert!((Vec3::from_array(mesh.normals[0]) - Vec3::Z).length() < 1e-5);
    assert_eq!(model.bounds().max, Vec3::new(1.0, 1.0, 0.0));
  }

  fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
    let mut json = json.as_bytes().to_vec();
    while json.len() % 4 != 0 {
      json.push(b' ');
    }
    let mut bin = bin.to_vec();
    while bin.len() % 4 != 0 {
      bin.push(0);
    }

    let total = 12 + 8 + json.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(b"JSON");
    out.extend_from_slice(&json);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(b"BIN\0");
    out.extend_from_slice(&bin);
    out
  }

  #[test]
  fn glb_indexed_quad() {
    let positions: [f32; 12] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 6] = [0, 1, 2, 0, 2, 3];
    let mut bin: Vec<u8> = positions.iter().flat_map(|v| v.to_le_bytes()).collect();
    bin.extend(indices.iter().flat_map(|i| i.to_le_bytes()));

    let json = r#"{
      "asset": { "version": "2.0" },
      "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }],
      "accessors": [
        { "bufferView": 0, "componentType": 5126, "count": 4, "type": "VEC3",
          "min": [0, 0, 0], "max": [1, 1, 0] },
        { "bufferView": 1, "componentType": 5123, "count": 6, "type": "SCALAR" }
      ],
      "bufferViews": [
        { "buffer": 0, "byteLength": 48 },
        { "buffer": 0, "byteOffset": 48, "byteLength": 12 }
      ],
      "buffers": [{ "byteLength": 60 }]
    }"#;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quad.glb");
    fs::write(&path, glb(json, &bin)).unwrap();

    let model = load_model(&path).unwrap();
    let mesh = &model.meshes[0];
    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.triangle_count(), 2);
  }

  #[test]
  fn gltf_without_meshes_reports_no_meshes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "empty.gltf", r#"{ "asset": { "version": "2.0" } }"#);
    assert!(matches!(load_model(&path), Err(ModelLoadError::NoMeshes(_))));
  }

  const QUAD_FBX: &str = r#"; FBX 7.4.0 project file
FBXHeaderExtension:  {
	FBXHeaderVersion: 1003
	FBXVersion: 7400
}
Objects:  {
	Geometry: 1000, "Geometry::Quad", "Mesh" {
		Vertices: *12 {
			a: 0,0,0,1,0,0,1,1,0,0,1,0
		}
		PolygonVertexIndex: *4 {
			a: 0,1,2,-4
		}
	}
	Model: 2000, "Model::Quad", "Mesh" {
	}
}
Connections:  {
	C: "OO",1000,2000
	C: "OO",2000,0
}
"#;

  #[test]
  fn fbx_quad_is_fan_triangulated() {
    let dir = tempfile::tempdir().unwrap();
    let model = load_model(&write(&dir, "quad.fbx", QUAD_FBX)).unwrap();

    assert_eq!(model.meshes.len(), 1);
    let mesh = &model.meshes[0];
    assert_eq!(mesh.triangle_count(), 2);
    // unrolled: one vertex per triangle corner
    assert_eq!(mesh.vertex_count(), 6);
    assert_eq!(mesh.positions[3], [0.0, 0.0, 0.0]);
    assert_eq!(mesh.normals.len(), 6);
  }

  #[test]
  fn unparseable_fbx_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "broken.fbx", "definitely not fbx");
    assert!(matches!(load_model(&path), Err(ModelLoadError::Parse { .. })));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let err = load_model(Path::new("/definitely/not/here.obj")).unwrap_err();
    assert!(matches!(err, ModelLoadError::Io(_)));
  }

  #[test]
  fn cube_is_closed_and_centred() {
    let cube = MeshData::cube(2.0);
    assert_eq!(cube.vertex_count(), 24);
    assert_eq!(cube.triangle_count(), 12);
    let bounds = cube.bounds().unwrap();
    assert_eq!(bounds.center(), Vec3::ZERO);
    assert_eq!(bounds.size(), Vec3::splat(2.0));
  }

  #[test]
  fn degenerate_bounds_have_unit_extent() {
    let bounds = Bounds::from_points(&[[1.0, 1.0, 1.0]]).unwrap();
    assert_eq!(bounds.max_extent(), 1.0);
    assert!(Bounds::from_points(&[]).is_none());
  }
}
