//! In-memory `GraphicsBackend` that records every call.
//!
//! Used to drive the compositor without a GPU: it hands out handles, reflects
//! uniform declarations from stage sources, tracks live objects for leak
//! checks, and can be told to fail specific operations.
use std::collections::{HashMap, HashSet, VecDeque};

use crate::backend::GraphicsBackend;
use crate::glsl::declared_uniforms;
use crate::types::{
    BackendError, BufferHandle, FrameError, FramebufferHandle, HandleAllocator, ProgramHandle,
    StageHandle, StageKind, TextureHandle, UniformLocation, UniformValue,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CompileStage {
        kind: StageKind,
        stage: StageHandle,
    },
    DeleteStage(StageHandle),
    LinkProgram {
        vertex: StageHandle,
        fragment: StageHandle,
        program: ProgramHandle,
    },
    DeleteProgram(ProgramHandle),
    CreateTexture {
        texture: TextureHandle,
        width: u32,
        height: u32,
        with_pixels: bool,
    },
    DeleteTexture(TextureHandle),
    CreateFramebuffer(FramebufferHandle),
    AttachColor {
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
    },
    DeleteFramebuffer(FramebufferHandle),
    CreateBuffer(BufferHandle),
    DeleteBuffer(BufferHandle),
    ResizeSurface {
        width: u32,
        height: u32,
    },
    BeginFrame,
    BindFramebuffer(Option<FramebufferHandle>),
    Viewport {
        width: u32,
        height: u32,
    },
    Clear([f32; 4]),
    UseProgram(ProgramHandle),
    SetUniform {
        program: Option<ProgramHandle>,
        name: String,
        value: UniformValue,
    },
    BindTexture {
        unit: u32,
        texture: TextureHandle,
    },
    Draw {
        framebuffer: Option<FramebufferHandle>,
        program: Option<ProgramHandle>,
        vertex_count: u32,
    },
    EndFrame,
}

#[derive(Debug)]
struct RecordedStage {
    kind: StageKind,
    source: String,
    uniforms: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    ids: HandleAllocator,
    calls: Vec<Call>,
    stages: HashMap<StageHandle, RecordedStage>,
    programs: HashMap<ProgramHandle, HashMap<String, UniformLocation>>,
    locations: HashMap<UniformLocation, String>,
    textures: HashMap<TextureHandle, (u32, u32)>,
    framebuffers: HashMap<FramebufferHandle, Option<TextureHandle>>,
    buffers: HashSet<BufferHandle>,
    current_framebuffer: Option<FramebufferHandle>,
    current_program: Option<ProgramHandle>,
    compile_counts: HashMap<StageKind, usize>,
    compile_failures: Vec<String>,
    link_failures: Vec<String>,
    texture_failures: usize,
    incomplete_framebuffers: bool,
    frame_failures: VecDeque<FrameError>,
    max_dimension: Option<u32>,
    frames_presented: u64,
}

impl RecordingBackend {
    pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

    pub fn new() -> Self {
        Self::default()
    }

    /// Compilation fails for any stage whose source contains `marker`.
    pub fn fail_compile_containing(&mut self, marker: impl Into<String>) {
        self.compile_failures.push(marker.into());
    }

    /// Linking fails when either stage source contains `marker`.
    pub fn fail_link_containing(&mut self, marker: impl Into<String>) {
        self.link_failures.push(marker.into());
    }

    /// The next `count` texture allocations fail.
    pub fn fail_next_textures(&mut self, count: usize) {
        self.texture_failures = count;
    }

    pub fn set_incomplete_framebuffers(&mut self, incomplete: bool) {
        self.incomplete_framebuffers = incomplete;
    }

    /// Queues an error returned by a future `end_frame`.
    pub fn fail_next_present(&mut self, error: FrameError) {
        self.frame_failures.push_back(error);
    }

    pub fn set_max_texture_dimension(&mut self, max_dimension: u32) {
        self.max_dimension = Some(max_dimension);
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn compile_count(&self, kind: StageKind) -> usize {
        self.compile_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn live_stages(&self) -> usize {
        self.stages.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Total of every object kind still allocated.
    pub fn live_objects(&self) -> usize {
        self.live_stages()
            + self.live_programs()
            + self.live_textures()
            + self.live_framebuffers()
            + self.live_buffers()
    }

    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).copied()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn should_fail(markers: &[String], source: &str) -> Option<String> {
        markers
            .iter()
            .find(|marker| source.contains(marker.as_str()))
            .cloned()
    }
}

impl GraphicsBackend for RecordingBackend {
    fn compile_stage(&mut self, source: &str, kind: StageKind) -> Result<StageHandle, String> {
        *self.compile_counts.entry(kind).or_default() += 1;
        if let Some(marker) = Self::should_fail(&self.compile_failures, source) {
            return Err(format!("0:1: error: rejected stage containing '{marker}'"));
        }
        let uniforms = declared_uniforms(source)?
            .into_iter()
            .map(|decl| decl.name)
            .collect();
        let stage = StageHandle::from_raw(self.ids.next());
        self.stages.insert(
            stage,
            RecordedStage {
                kind,
                source: source.to_string(),
                uniforms,
            },
        );
        self.calls.push(Call::CompileStage { kind, stage });
        Ok(stage)
    }

    fn delete_stage(&mut self, stage: StageHandle) {
        if self.stages.remove(&stage).is_some() {
            self.calls.push(Call::DeleteStage(stage));
        }
    }

    fn link_program(
        &mut self,
        vertex: StageHandle,
        fragment: StageHandle,
    ) -> Result<ProgramHandle, String> {
        let (Some(vs), Some(fs)) = (self.stages.get(&vertex), self.stages.get(&fragment)) else {
            return Err("link: unknown stage handle".into());
        };
        if vs.kind != StageKind::Vertex || fs.kind != StageKind::Fragment {
            return Err("link: stages attached in the wrong slots".into());
        }
        for source in [&vs.source, &fs.source] {
            if let Some(marker) = Self::should_fail(&self.link_failures, source) {
                return Err(format!("link error: rejected program using '{marker}'"));
            }
        }

        let names: Vec<String> = vs.uniforms.iter().chain(&fs.uniforms).cloned().collect();
        let program = ProgramHandle::from_raw(self.ids.next());
        let mut table = HashMap::new();
        for name in names {
            if table.contains_key(&name) {
                continue;
            }
            let location = UniformLocation::from_raw(self.ids.next());
            self.locations.insert(location, name.clone());
            table.insert(name, location);
        }
        self.programs.insert(program, table);
        self.calls.push(Call::LinkProgram {
            vertex,
            fragment,
            program,
        });
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if let Some(table) = self.programs.remove(&program) {
            for location in table.values() {
                self.locations.remove(location);
            }
            if self.current_program == Some(program) {
                self.current_program = None;
            }
            self.calls.push(Call::DeleteProgram(program));
        }
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        self.programs.get(&program)?.get(name).copied()
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<TextureHandle, BackendError> {
        if self.texture_failures > 0 {
            self.texture_failures -= 1;
            return Err(BackendError::Allocation("injected texture failure".into()));
        }
        let max_dimension = self.max_texture_dimension();
        if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
            return Err(BackendError::TooLarge {
                width,
                height,
                max_dimension,
            });
        }
        if let Some(pixels) = pixels {
            let expected = width as usize * height as usize * 4;
            if pixels.len() != expected {
                return Err(BackendError::PixelSize {
                    expected,
                    actual: pixels.len(),
                });
            }
        }
        let texture = TextureHandle::from_raw(self.ids.next());
        self.textures.insert(texture, (width, height));
        self.calls.push(Call::CreateTexture {
            texture,
            width,
            height,
            with_pixels: pixels.is_some(),
        });
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.calls.push(Call::DeleteTexture(texture));
        }
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle, BackendError> {
        let framebuffer = FramebufferHandle::from_raw(self.ids.next());
        self.framebuffers.insert(framebuffer, None);
        self.calls.push(Call::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn attach_color(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
    ) -> Result<(), BackendError> {
        if !self.textures.contains_key(&texture) {
            return Err(BackendError::UnknownHandle {
                kind: "texture",
                id: texture.get(),
            });
        }
        let slot = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or(BackendError::UnknownHandle {
                kind: "framebuffer",
                id: framebuffer.get(),
            })?;
        *slot = Some(texture);
        self.calls.push(Call::AttachColor {
            framebuffer,
            texture,
        });
        Ok(())
    }

    fn framebuffer_complete(&self, framebuffer: FramebufferHandle) -> bool {
        !self.incomplete_framebuffers
            && matches!(
                self.framebuffers.get(&framebuffer),
                Some(Some(texture)) if self.textures.contains_key(texture)
            )
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            if self.current_framebuffer == Some(framebuffer) {
                self.current_framebuffer = None;
            }
            self.calls.push(Call::DeleteFramebuffer(framebuffer));
        }
    }

    fn create_vertex_buffer(&mut self, vertices: &[f32]) -> Result<BufferHandle, BackendError> {
        if vertices.is_empty() || vertices.len() % 2 != 0 {
            return Err(BackendError::Allocation(format!(
                "expected vec2 positions, got {} floats",
                vertices.len()
            )));
        }
        let buffer = BufferHandle::from_raw(self.ids.next());
        self.buffers.insert(buffer);
        self.calls.push(Call::CreateBuffer(buffer));
        Ok(buffer)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer) {
            self.calls.push(Call::DeleteBuffer(buffer));
        }
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.calls.push(Call::ResizeSurface { width, height });
    }

    fn begin_frame(&mut self) -> Result<(), FrameError> {
        self.calls.push(Call::BeginFrame);
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.current_framebuffer = framebuffer;
        self.calls.push(Call::BindFramebuffer(framebuffer));
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.calls.push(Call::Viewport { width, height });
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.calls.push(Call::Clear(color));
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = Some(program);
        self.calls.push(Call::UseProgram(program));
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let name = self
            .locations
            .get(&location)
            .cloned()
            .unwrap_or_else(|| format!("<location {location}>"));
        self.calls.push(Call::SetUniform {
            program: self.current_program,
            name,
            value,
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.calls.push(Call::BindTexture { unit, texture });
    }

    fn draw_triangles(&mut self, _buffer: BufferHandle, vertex_count: u32) {
        self.calls.push(Call::Draw {
            framebuffer: self.current_framebuffer,
            program: self.current_program,
            vertex_count,
        });
    }

    fn end_frame(&mut self) -> Result<(), FrameError> {
        self.calls.push(Call::EndFrame);
        if let Some(error) = self.frame_failures.pop_front() {
            return Err(error);
        }
        self.frames_presented += 1;
        Ok(())
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension.unwrap_or(Self::DEFAULT_MAX_DIMENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_never_reused() {
        let mut backend = RecordingBackend::new();
        let first = backend.create_texture(4, 4, None).unwrap();
        backend.delete_texture(first);
        let second = backend.create_texture(4, 4, None).unwrap();
        assert_ne!(first, second);
        assert_eq!(backend.live_textures(), 1);
    }

    #[test]
    fn reflects_uniforms_at_link() {
        let mut backend = RecordingBackend::new();
        let vertex = backend
            .compile_stage("in vec2 a_position;\n", StageKind::Vertex)
            .unwrap();
        let fragment = backend
            .compile_stage("uniform float u_time;\nuniform vec2 u_resolution;\n", StageKind::Fragment)
            .unwrap();
        let program = backend.link_program(vertex, fragment).unwrap();
        assert!(backend.uniform_location(program, "u_time").is_some());
        assert!(backend.uniform_location(program, "u_missing").is_none());

        backend.use_program(program);
        let location = backend.uniform_location(program, "u_time").unwrap();
        backend.set_uniform(location, UniformValue::Float(2.0));
        assert!(backend.calls().contains(&Call::SetUniform {
            program: Some(program),
            name: "u_time".into(),
            value: UniformValue::Float(2.0),
        }));
    }

    #[test]
    fn swapped_stages_fail_to_link() {
        let mut backend = RecordingBackend::new();
        let vertex = backend.compile_stage("", StageKind::Vertex).unwrap();
        let fragment = backend.compile_stage("", StageKind::Fragment).unwrap();
        assert!(backend.link_program(fragment, vertex).is_err());
    }

    #[test]
    fn framebuffer_completeness_tracks_attachment() {
        let mut backend = RecordingBackend::new();
        let framebuffer = backend.create_framebuffer().unwrap();
        assert!(!backend.framebuffer_complete(framebuffer));
        let texture = backend.create_texture(2, 2, None).unwrap();
        backend.attach_color(framebuffer, texture).unwrap();
        assert!(backend.framebuffer_complete(framebuffer));
        backend.set_incomplete_framebuffers(true);
        assert!(!backend.framebuffer_complete(framebuffer));
    }

    #[test]
    fn texture_limits_and_injected_failures() {
        let mut backend = RecordingBackend::new();
        backend.set_max_texture_dimension(16);
        assert!(matches!(
            backend.create_texture(32, 4, None),
            Err(BackendError::TooLarge { .. })
        ));
        assert!(matches!(
            backend.create_texture(2, 2, Some(&[0; 3])),
            Err(BackendError::PixelSize { .. })
        ));
        backend.fail_next_textures(1);
        assert!(backend.create_texture(2, 2, None).is_err());
        assert!(backend.create_texture(2, 2, None).is_ok());
    }
}
