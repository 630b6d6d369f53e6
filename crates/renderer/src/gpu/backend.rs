use std::borrow::Cow;
use std::collections::HashMap;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, warn};
use wgpu::naga::ShaderStage;
use wgpu::util::DeviceExt;

use crate::backend::GraphicsBackend;
use crate::types::{
    BackendError, BufferHandle, FrameError, FramebufferHandle, HandleAllocator, ProgramHandle,
    StageHandle, StageKind, TextureHandle, UniformLocation, UniformValue,
};

use super::context::{AcquiredFrame, ContextOptions, GpuContext, OFFSCREEN_FORMAT};
use super::layout::BlockLayout;
use super::pipeline::{self, SAMPLERS_GROUP};
use super::wrap::{wrap_stage, WrappedStage};

struct Stage {
    kind: StageKind,
    module: wgpu::ShaderModule,
    layout: BlockLayout,
    samplers: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    Member(usize),
    Sampler(usize),
}

struct Program {
    layout: BlockLayout,
    data: Vec<u8>,
    buffer: wgpu::Buffer,
    uniform_group: wgpu::BindGroup,
    sampler_layout: wgpu::BindGroupLayout,
    sampler_units: Vec<u32>,
    names: HashMap<String, UniformLocation>,
    pipelines: Vec<(wgpu::TextureFormat, wgpu::RenderPipeline)>,
}

struct Texture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct Frame {
    acquired: AcquiredFrame,
    encoder: wgpu::CommandEncoder,
}

struct RenderTarget {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    size: (u32, u32),
    texture: Option<TextureHandle>,
}

/// `GraphicsBackend` on top of wgpu.
///
/// Immediate-mode calls are recorded into one command encoder per frame:
/// every draw becomes its own render pass, clears are folded into the next
/// pass on the same target (or flushed as an empty pass), and uniforms are
/// copied through a staging buffer before each pass so consecutive draws with
/// one program see their own values.
pub struct WgpuBackend {
    context: GpuContext,
    ids: HandleAllocator,
    uniform_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    fallback: Texture,
    stages: HashMap<StageHandle, Stage>,
    programs: HashMap<ProgramHandle, Program>,
    locations: HashMap<UniformLocation, (ProgramHandle, Binding)>,
    textures: HashMap<TextureHandle, Texture>,
    framebuffers: HashMap<FramebufferHandle, Option<TextureHandle>>,
    buffers: HashMap<BufferHandle, wgpu::Buffer>,
    frame: Option<Frame>,
    target: Option<FramebufferHandle>,
    viewport: (u32, u32),
    pending_clear: Option<[f32; 4]>,
    program: Option<ProgramHandle>,
    units: HashMap<u32, TextureHandle>,
}

/// Runs `build` inside validation and out-of-memory error scopes.
fn scoped<T>(device: &wgpu::Device, build: impl FnOnce() -> T) -> Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        Some(err) => Err(err.to_string()),
        None => Ok(value),
    }
}

fn color(rgba: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(rgba[0]),
        g: f64::from(rgba[1]),
        b: f64::from(rgba[2]),
        a: f64::from(rgba[3]),
    }
}

fn create_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    label: &str,
) -> Result<Texture, String> {
    let texture = scoped(device, || {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    })?;
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(Texture {
        texture,
        view,
        width,
        height,
    })
}

fn upload(queue: &wgpu::Queue, texture: &Texture, pixels: &[u8]) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * texture.width),
            rows_per_image: Some(texture.height),
        },
        wgpu::Extent3d {
            width: texture.width,
            height: texture.height,
            depth_or_array_layers: 1,
        },
    );
}

impl WgpuBackend {
    pub fn for_window<T>(target: &T, size: (u32, u32), options: ContextOptions) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        Self::from_context(GpuContext::for_window(target, size, options)?)
    }

    /// Renders the visible target into an internal texture; nothing is shown.
    pub fn headless(size: (u32, u32), options: ContextOptions) -> Result<Self> {
        Self::from_context(GpuContext::headless(size, options)?)
    }

    fn from_context(context: GpuContext) -> Result<Self> {
        context.device.on_uncaptured_error(Box::new(|err| {
            error!(error = %err, "uncaptured GPU error");
        }));
        let uniform_layout = pipeline::uniform_layout(&context.device);
        let sampler = pipeline::linear_sampler(&context.device);
        let fallback = create_texture(&context.device, 1, 1, "fallback texture")
            .map_err(|err| anyhow::anyhow!("failed to create fallback texture: {err}"))?;
        upload(&context.queue, &fallback, &[0, 0, 0, 255]);
        let viewport = context.size;

        Ok(Self {
            context,
            ids: HandleAllocator::new(),
            uniform_layout,
            sampler,
            fallback,
            stages: HashMap::new(),
            programs: HashMap::new(),
            locations: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            frame: None,
            target: None,
            viewport,
            pending_clear: None,
            program: None,
            units: HashMap::new(),
        })
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.context.format
    }

    pub fn is_headless(&self) -> bool {
        self.context.is_headless()
    }

    fn resolve_target(&self) -> Option<RenderTarget> {
        let frame = self.frame.as_ref()?;
        match self.target {
            None => Some(RenderTarget {
                view: frame.acquired.view.clone(),
                format: self.context.format,
                size: self.context.size,
                texture: None,
            }),
            Some(framebuffer) => {
                let handle = self.framebuffers.get(&framebuffer).copied().flatten()?;
                let texture = self.textures.get(&handle)?;
                Some(RenderTarget {
                    view: texture.view.clone(),
                    format: OFFSCREEN_FORMAT,
                    size: (texture.width, texture.height),
                    texture: Some(handle),
                })
            }
        }
    }

    fn flush_clear(&mut self) {
        let Some(clear) = self.pending_clear.take() else {
            return;
        };
        let Some(target) = self.resolve_target() else {
            return;
        };
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        let _pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(color(clear)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
    }
}

impl GraphicsBackend for WgpuBackend {
    fn compile_stage(&mut self, source: &str, kind: StageKind) -> Result<StageHandle, String> {
        let WrappedStage {
            source: wrapped,
            layout,
            samplers,
        } = wrap_stage(source, kind)?;
        let stage = match kind {
            StageKind::Vertex => ShaderStage::Vertex,
            StageKind::Fragment => ShaderStage::Fragment,
        };
        let device = &self.context.device;
        let module = scoped(device, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("layer stage"),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Owned(wrapped),
                    stage,
                    defines: &[],
                },
            })
        })?;

        let handle = StageHandle::from_raw(self.ids.next());
        self.stages.insert(
            handle,
            Stage {
                kind,
                module,
                layout,
                samplers,
            },
        );
        Ok(handle)
    }

    fn delete_stage(&mut self, stage: StageHandle) {
        self.stages.remove(&stage);
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
        let vertex_module = vs.module.clone();
        let fragment_module = fs.module.clone();
        let layout = fs.layout.clone();
        let samplers = fs.samplers.clone();

        let device = &self.context.device;
        let sampler_layout = pipeline::sampler_layout(device, samplers.len());
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("layer pipeline layout"),
            bind_group_layouts: &[&self.uniform_layout, &sampler_layout],
            push_constant_ranges: &[],
        });
        let mut formats = vec![OFFSCREEN_FORMAT];
        if self.context.format != OFFSCREEN_FORMAT {
            formats.push(self.context.format);
        }
        let pipelines = scoped(device, || {
            formats
                .iter()
                .map(|format| {
                    let pipeline = pipeline::create_pipeline(
                        device,
                        &pipeline_layout,
                        &vertex_module,
                        &fragment_module,
                        *format,
                    );
                    (*format, pipeline)
                })
                .collect::<Vec<_>>()
        })?;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("layer uniforms"),
            size: layout.size() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });

        let program = ProgramHandle::from_raw(self.ids.next());
        let mut names = HashMap::new();
        for (index, member) in layout.members().iter().enumerate() {
            let location = UniformLocation::from_raw(self.ids.next());
            self.locations
                .insert(location, (program, Binding::Member(index)));
            names.insert(member.name.clone(), location);
        }
        for (index, name) in samplers.iter().enumerate() {
            let location = UniformLocation::from_raw(self.ids.next());
            self.locations
                .insert(location, (program, Binding::Sampler(index)));
            names.insert(name.clone(), location);
        }

        self.programs.insert(
            program,
            Program {
                data: vec![0; layout.size()],
                layout,
                buffer,
                uniform_group,
                sampler_layout,
                sampler_units: vec![0; samplers.len()],
                names,
                pipelines,
            },
        );
        debug!(%program, samplers = samplers.len(), "linked wgpu program");
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if let Some(entry) = self.programs.remove(&program) {
            for location in entry.names.values() {
                self.locations.remove(location);
            }
            if self.program == Some(program) {
                self.program = None;
            }
        }
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        self.programs.get(&program)?.names.get(name).copied()
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<TextureHandle, BackendError> {
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
        let texture = create_texture(&self.context.device, width, height, "layer texture")
            .map_err(BackendError::Allocation)?;
        if let Some(pixels) = pixels {
            upload(&self.context.queue, &texture, pixels);
        }
        let handle = TextureHandle::from_raw(self.ids.next());
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.units.retain(|_, bound| *bound != texture);
        }
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle, BackendError> {
        let framebuffer = FramebufferHandle::from_raw(self.ids.next());
        self.framebuffers.insert(framebuffer, None);
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
        Ok(())
    }

    fn framebuffer_complete(&self, framebuffer: FramebufferHandle) -> bool {
        matches!(
            self.framebuffers.get(&framebuffer),
            Some(Some(texture)) if self.textures.contains_key(texture)
        )
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(&framebuffer).is_some() && self.target == Some(framebuffer) {
            self.pending_clear = None;
            self.target = None;
        }
    }

    fn create_vertex_buffer(&mut self, vertices: &[f32]) -> Result<BufferHandle, BackendError> {
        let device = &self.context.device;
        let buffer = scoped(device, || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad vertices"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            })
        })
        .map_err(BackendError::Allocation)?;
        let handle = BufferHandle::from_raw(self.ids.next());
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
    }

    fn begin_frame(&mut self) -> Result<(), FrameError> {
        if self.frame.is_some() {
            return Err(FrameError::Other("a frame is already in progress".into()));
        }
        let acquired = self.context.acquire()?;
        let encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        self.frame = Some(Frame { acquired, encoder });
        self.target = None;
        self.pending_clear = None;
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.flush_clear();
        self.target = framebuffer;
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.pending_clear = Some(color);
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.program = Some(program);
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let Some(&(program, binding)) = self.locations.get(&location) else {
            debug!(%location, "uniform location not found");
            return;
        };
        let Some(entry) = self.programs.get_mut(&program) else {
            return;
        };
        match (binding, value) {
            (Binding::Member(index), value) => {
                if let Err(err) = entry.layout.write(&mut entry.data, index, value) {
                    debug!(%program, error = %err, "uniform write rejected");
                }
            }
            (Binding::Sampler(index), UniformValue::Int(unit)) if unit >= 0 => {
                entry.sampler_units[index] = unit as u32;
            }
            (Binding::Sampler(_), other) => {
                debug!(%program, value = ?other, "sampler uniforms take a texture unit");
            }
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.units.insert(unit, texture);
    }

    fn draw_triangles(&mut self, buffer: BufferHandle, vertex_count: u32) {
        let Some(target) = self.resolve_target() else {
            debug!("draw ignored; no frame or target");
            return;
        };
        let Some(program) = self.program.and_then(|handle| self.programs.get(&handle)) else {
            debug!("draw ignored; no program in use");
            return;
        };
        let Some(vertices) = self.buffers.get(&buffer) else {
            debug!(%buffer, "draw ignored; unknown vertex buffer");
            return;
        };
        let Some(pipeline) = program
            .pipelines
            .iter()
            .find(|(format, _)| *format == target.format)
            .map(|(_, pipeline)| pipeline)
        else {
            warn!(format = ?target.format, "no pipeline for target format");
            return;
        };

        let device = &self.context.device;
        let views: Vec<&wgpu::TextureView> = program
            .sampler_units
            .iter()
            .map(|unit| {
                self.units
                    .get(unit)
                    .filter(|texture| Some(**texture) != target.texture)
                    .and_then(|texture| self.textures.get(texture))
                    .map_or(&self.fallback.view, |texture| &texture.view)
            })
            .collect();
        let sampler_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sampler bind group"),
            layout: &program.sampler_layout,
            entries: &pipeline::sampler_entries(&views, &self.sampler),
        });
        let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("uniform staging"),
            contents: &program.data,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let load = match self.pending_clear.take() {
            Some(clear) => wgpu::LoadOp::Clear(color(clear)),
            None => wgpu::LoadOp::Load,
        };
        let width = self.viewport.0.clamp(1, target.size.0);
        let height = self.viewport.1.clamp(1, target.size.1);

        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        frame
            .encoder
            .copy_buffer_to_buffer(&staging, 0, &program.buffer, 0, program.data.len() as u64);
        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("layer pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &program.uniform_group, &[]);
        pass.set_bind_group(SAMPLERS_GROUP, &sampler_group, &[]);
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.draw(0..vertex_count, 0..1);
    }

    fn end_frame(&mut self) -> Result<(), FrameError> {
        self.flush_clear();
        let Some(frame) = self.frame.take() else {
            return Err(FrameError::Other("no frame in progress".into()));
        };
        self.context
            .queue
            .submit(std::iter::once(frame.encoder.finish()));
        if let Some(surface_texture) = frame.acquired.surface_texture {
            surface_texture.present();
        }
        self.target = None;
        Ok(())
    }

    fn max_texture_dimension(&self) -> u32 {
        self.context.device.limits().max_texture_dimension_2d
    }
}
