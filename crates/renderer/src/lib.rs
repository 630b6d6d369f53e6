//! Layered shader compositor.
//!
//! Each frame every enabled layer renders its own fragment shader into an
//! offscreen target sized like the surface, then one composite pass blends the
//! background image and the layer targets onto the visible surface.
//!
//! ```text
//!   ConfigHandle ──(generation bump)──▶ CompositingRenderer::draw_frame
//!                                          │  per layer: ProgramCache ─▶ target slot
//!                                          └─ composite: background + slots ─▶ surface
//! ```
//!
//! The renderer only talks to the GPU through [`GraphicsBackend`]. The
//! [`WgpuBackend`] drives real hardware (windowed or headless) and the
//! [`RecordingBackend`] keeps everything in memory so the lifecycle can be
//! tested without a device. [`WindowRuntime`] hosts a renderer on its own
//! thread behind a winit window.

mod backend;
mod background;
mod builtin;
mod cache;
mod compositor;
mod glsl;
mod gpu;
mod loader;
mod recording;
mod runtime;
mod targets;
mod types;
mod window;

pub use backend::GraphicsBackend;
pub use background::{
    downsampled_size, DecodeError, DecodedImage, FileImageProvider, ImageProvider,
    MAX_DOWNSAMPLE_STEPS, PLACEHOLDER_PIXEL,
};
pub use builtin::{is_builtin, BUILTIN_PREFIX, COMPOSITOR_FRAGMENT, QUAD_VERTEX, QUAD_VERTICES};
pub use cache::{enabled_ordered, CompiledProgram, ProgramCache};
pub use compositor::{
    resolve_params, uniform_value, CompositingRenderer, FrameOutcome, FrameStats, RendererError,
    RendererState,
};
pub use gpu::{ContextOptions, WgpuBackend};
pub use loader::{ShaderError, ShaderLoader};
pub use recording::{Call, RecordingBackend};
pub use runtime::{
    run_loop, run_loop_for, ConfigHandle, FixedTimeSource, FramePacer, StopSignal,
    SystemTimeSource, TimeSource, DEFAULT_FPS,
};
pub use targets::{OffscreenTarget, OffscreenTargetManager, TargetAllocationError, MAX_LAYER_SLOTS};
pub use types::{
    BackendError, BufferHandle, FrameError, FramebufferHandle, HandleAllocator, ProgramHandle,
    StageHandle, StageKind, TextureHandle, UniformLocation, UniformValue,
};
pub use window::{parallax_from_cursor, RenderSetup, WindowOptions, WindowRuntime};
