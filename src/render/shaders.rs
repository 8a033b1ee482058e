//! GLSL shaders, compiled at build time by `vulkano_shaders`.

/// Transforms meshes and forwards normals and texture coordinates.
pub mod model_vs {
  vulkano_shaders::shader! {
    ty: "vertex",
    src: r"
      #version 450

      layout(location = 0) in vec3 position;
      layout(location = 1) in vec3 normal;
      layout(location = 2) in vec2 tex_coord;

      layout(location = 0) out vec3 v_normal;
      layout(location = 1) out vec2 v_tex_coord;

      layout(set = 0, binding = 0) uniform Data {
        mat4 world;
        mat4 view;
        mat4 proj;
        vec4 tint;
      } uniforms;

      void main() {
        v_normal = mat3(transpose(inverse(uniforms.world))) * normal;
        v_tex_coord = tex_coord;
        gl_Position = uniforms.proj * uniforms.view * uniforms.world * vec4(position, 1.0);
      }
    ",
  }
}

/// Textured, tinted, with one directional light.
pub mod model_fs {
  vulkano_shaders::shader! {
    ty: "fragment",
    src: r"
      #version 450

      layout(location = 0) in vec3 v_normal;
      layout(location = 1) in vec2 v_tex_coord;

      layout(location = 0) out vec4 f_color;

      layout(set = 0, binding = 0) uniform Data {
        mat4 world;
        mat4 view;
        mat4 proj;
        vec4 tint;
      } uniforms;
      layout(set = 0, binding = 1) uniform sampler2D tex;

      void main() {
        vec3 light_dir = normalize(vec3(0.4, 1.0, 0.6));
        vec4 base = texture(tex, v_tex_coord) * uniforms.tint;
        float diffuse = max(dot(normalize(v_normal), light_dir), 0.0);
        f_color = vec4(base.rgb * (0.25 + 0.75 * diffuse), base.a);
      }
    ",
  }
}

pub mod line_vs {
  vulkano_shaders::shader! {
    ty: "vertex",
    src: r"
      #version 450

      layout(location = 0) in vec3 position;
      layout(location = 1) in vec3 color;

      layout(location = 0) out vec3 v_color;

      layout(push_constant) uniform PushConstants {
        mat4 view_proj;
      } push;

      void main() {
        v_color = color;
        gl_Position = push.view_proj * vec4(position, 1.0);
      }
    ",
  }
}

pub mod line_fs {
  vulkano_shaders::shader! {
    ty: "fragment",
    src: r"
      #version 450

      layout(location = 0) in vec3 v_color;
      layout(location = 0) out vec4 f_color;

      void main() {
        f_color = vec4(v_color, 1.0);
      }
    ",
  }
}
