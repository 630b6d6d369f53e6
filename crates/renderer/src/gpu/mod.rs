//! wgpu implementation of the graphics seam.
//!
//! - `context` owns the wgpu instance, device, and either a window surface or
//!   a headless visible texture, and rebuilds them on resize.
//! - `wrap` rewrites ES-dialect GLSL stages into GLSL 450 with explicit
//!   bindings, gathering loose uniforms into one block.
//! - `layout` places those uniforms with std140 rules and writes values.
//! - `pipeline` builds bind group layouts and fullscreen-quad pipelines.
//! - `backend` maps the immediate-mode `GraphicsBackend` calls onto wgpu
//!   render passes, one command encoder per frame.

mod backend;
mod context;
mod layout;
mod pipeline;
mod wrap;

pub use backend::WgpuBackend;
pub use context::ContextOptions;
