//! Shader stages shipped inside the renderer, addressed by reserved names.

/// Names starting with this prefix never reach the external source provider.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// The shared fullscreen-quad vertex stage.
pub const QUAD_VERTEX: &str = "builtin:quad.vert";

/// Blends up to `MAX_LAYER_SLOTS` layer textures over the background.
pub const COMPOSITOR_FRAGMENT: &str = "builtin:compositor.frag";

const QUAD_VERTEX_SOURCE: &str = include_str!("../shaders/quad.vert");
const COMPOSITOR_FRAGMENT_SOURCE: &str = include_str!("../shaders/compositor.frag");

/// Two triangles covering clip space, as `vec2` positions.
pub const QUAD_VERTICES: [f32; 12] = [
    -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, //
    -1.0, -1.0, 1.0, 1.0, -1.0, 1.0,
];

pub fn is_builtin(name: &str) -> bool {
    name.starts_with(BUILTIN_PREFIX)
}

pub fn source(name: &str) -> Option<&'static str> {
    match name {
        QUAD_VERTEX => Some(QUAD_VERTEX_SOURCE),
        COMPOSITOR_FRAGMENT => Some(COMPOSITOR_FRAGMENT_SOURCE),
        _ => None,
    }
}
