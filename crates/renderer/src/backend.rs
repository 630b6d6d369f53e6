//! The graphics seam the compositor drives.
//!
//! The trait is handle based and immediate mode: objects are created and
//! destroyed explicitly and state (target, program, texture units) persists
//! between calls until changed. Every method must be called from the thread
//! that owns the backend.
use crate::types::{
    BackendError, BufferHandle, FrameError, FramebufferHandle, ProgramHandle, StageHandle,
    StageKind, TextureHandle, UniformLocation, UniformValue,
};

pub trait GraphicsBackend {
    /// Compiles one stage. The error string is the compiler diagnostic log.
    fn compile_stage(&mut self, source: &str, kind: StageKind) -> Result<StageHandle, String>;

    fn delete_stage(&mut self, stage: StageHandle);

    /// Links two stages. Both remain valid and must be deleted separately.
    fn link_program(
        &mut self,
        vertex: StageHandle,
        fragment: StageHandle,
    ) -> Result<ProgramHandle, String>;

    fn delete_program(&mut self, program: ProgramHandle);

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;

    /// Allocates an RGBA8 texture, optionally filled with `pixels` (top row first).
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<TextureHandle, BackendError>;

    fn delete_texture(&mut self, texture: TextureHandle);

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle, BackendError>;

    fn attach_color(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
    ) -> Result<(), BackendError>;

    fn framebuffer_complete(&self, framebuffer: FramebufferHandle) -> bool;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Uploads tightly packed `vec2` positions.
    fn create_vertex_buffer(&mut self, vertices: &[f32]) -> Result<BufferHandle, BackendError>;

    fn delete_buffer(&mut self, buffer: BufferHandle);

    fn resize_surface(&mut self, width: u32, height: u32);

    fn begin_frame(&mut self) -> Result<(), FrameError>;

    /// `None` selects the visible surface.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    fn set_viewport(&mut self, width: u32, height: u32);

    fn clear(&mut self, color: [f32; 4]);

    fn use_program(&mut self, program: ProgramHandle);

    /// Applies to the program selected by `use_program`.
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    fn draw_triangles(&mut self, buffer: BufferHandle, vertex_count: u32);

    /// Presents the visible surface.
    fn end_frame(&mut self) -> Result<(), FrameError>;

    fn max_texture_dimension(&self) -> u32;
}
