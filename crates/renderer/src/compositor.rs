//! The compositing renderer: a finite state machine driven by host lifecycle
//! calls.
//!
//! `Uninitialized -> Created -> Sized -> Rendering (<-> Sized on resize) ->
//! Released`. Each frame renders every enabled layer into its own offscreen
//! target, then blends up to `MAX_LAYER_SLOTS` of them over the background on
//! the visible surface.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use catalog::{ParamValue, ShaderDescriptor, ShaderSourceProvider};
use layerconfig::{BackgroundConfig, CropRect, LayerConfig, RenderConfig};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::background::{FileImageProvider, ImageProvider, PLACEHOLDER_PIXEL};
use crate::backend::GraphicsBackend;
use crate::builtin::{COMPOSITOR_FRAGMENT, QUAD_VERTEX, QUAD_VERTICES};
use crate::cache::{enabled_ordered, ProgramCache};
use crate::loader::{ShaderError, ShaderLoader};
use crate::runtime::{ConfigHandle, SystemTimeSource, TimeSource};
use crate::targets::{OffscreenTargetManager, MAX_LAYER_SLOTS};
use crate::types::{
    BackendError, BufferHandle, FrameError, ProgramHandle, StageHandle, StageKind, TextureHandle,
    UniformLocation, UniformValue,
};

const QUAD_VERTEX_COUNT: u32 = (QUAD_VERTICES.len() / 2) as u32;
const LAYER_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];
const SURFACE_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const BACKGROUND_UNIT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Uninitialized,
    Created,
    Sized,
    Rendering,
    Released,
}

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to build the shared vertex stage: {0}")]
    VertexStage(#[source] ShaderError),
    #[error("failed to build the compositor program: {0}")]
    Compositor(#[source] ShaderError),
    #[error("failed to create the fullscreen quad: {0}")]
    Geometry(#[source] BackendError),
    #[error("failed to create the placeholder background: {0}")]
    Placeholder(#[source] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub layers_drawn: usize,
    pub layers_skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The renderer is not in a drawable state.
    NotReady,
    Presented(FrameStats),
}

#[derive(Debug, Clone, Copy, Default)]
struct CompositorUniforms {
    background: Option<UniformLocation>,
    layers: [Option<UniformLocation>; MAX_LAYER_SLOTS],
    opacities: [Option<UniformLocation>; MAX_LAYER_SLOTS],
    layer_count: Option<UniformLocation>,
    resolution: Option<UniformLocation>,
}

impl CompositorUniforms {
    fn resolve<B: GraphicsBackend + ?Sized>(backend: &B, program: ProgramHandle) -> Self {
        let mut uniforms = Self {
            background: backend.uniform_location(program, "u_background"),
            layer_count: backend.uniform_location(program, "u_layerCount"),
            resolution: backend.uniform_location(program, "u_resolution"),
            ..Self::default()
        };
        for index in 0..MAX_LAYER_SLOTS {
            uniforms.layers[index] = backend.uniform_location(program, &format!("u_layer{index}"));
            uniforms.opacities[index] =
                backend.uniform_location(program, &format!("u_opacity{index}"));
        }
        uniforms
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FpsWindow {
    last_report: f32,
    frames_at_report: u64,
}

pub struct CompositingRenderer<B: GraphicsBackend> {
    backend: B,
    loader: ShaderLoader,
    shaders: HashMap<String, ShaderDescriptor>,
    cache: ProgramCache,
    targets: OffscreenTargetManager,
    images: Arc<dyn ImageProvider>,
    clock: Box<dyn TimeSource>,
    config: ConfigHandle,
    state: RendererState,

    vertex: Option<StageHandle>,
    compositor: Option<ProgramHandle>,
    compositor_uniforms: CompositorUniforms,
    quad: Option<BufferHandle>,
    placeholder: Option<TextureHandle>,
    background: Option<TextureHandle>,

    current: Arc<RenderConfig>,
    applied_generation: Option<u64>,
    background_pending: bool,
    size: (u32, u32),
    frame_count: u64,
    fps: FpsWindow,
}

impl<B: GraphicsBackend> CompositingRenderer<B> {
    pub fn new(backend: B, provider: Arc<dyn ShaderSourceProvider>, config: ConfigHandle) -> Self {
        Self {
            backend,
            loader: ShaderLoader::new(provider),
            shaders: HashMap::new(),
            cache: ProgramCache::new(),
            targets: OffscreenTargetManager::new(),
            images: Arc::new(FileImageProvider::new()),
            clock: Box::new(SystemTimeSource::new()),
            config,
            state: RendererState::Uninitialized,
            vertex: None,
            compositor: None,
            compositor_uniforms: CompositorUniforms::default(),
            quad: None,
            placeholder: None,
            background: None,
            current: Arc::new(RenderConfig::default()),
            applied_generation: None,
            background_pending: false,
            size: (0, 0),
            frame_count: 0,
            fps: FpsWindow::default(),
        }
    }

    /// Descriptors whose parameter defaults fill values a layer leaves unset.
    /// Each layer program is built from its descriptor's source entry.
    pub fn with_shaders(mut self, descriptors: impl IntoIterator<Item = ShaderDescriptor>) -> Self {
        self.shaders = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.id.clone(), descriptor))
            .collect();
        for descriptor in self.shaders.values() {
            self.cache
                .set_source(descriptor.id.clone(), descriptor.shader_source.clone());
        }
        self
    }

    pub fn with_image_provider(mut self, images: Arc<dyn ImageProvider>) -> Self {
        self.images = images;
        self
    }

    pub fn with_time_source(mut self, clock: Box<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds every session-wide resource. Calling it again after success is
    /// a no-op; a failure leaves no objects behind and the renderer stays
    /// `Uninitialized`.
    pub fn create(&mut self) -> Result<(), RendererError> {
        if self.state != RendererState::Uninitialized {
            debug!(state = ?self.state, "create ignored");
            return Ok(());
        }
        if let Err(err) = self.build_session() {
            self.release_resources();
            return Err(err);
        }
        self.clock.reset();
        self.frame_count = 0;
        self.fps = FpsWindow::default();
        self.state = RendererState::Created;
        info!(
            layers = self.cache.len(),
            background = self.background_pending,
            "renderer created"
        );
        Ok(())
    }

    fn build_session(&mut self) -> Result<(), RendererError> {
        let vertex_source = self
            .loader
            .load_source(QUAD_VERTEX)
            .map_err(RendererError::VertexStage)?;
        let vertex = self
            .loader
            .compile_stage(&mut self.backend, &vertex_source, StageKind::Vertex)
            .map_err(RendererError::VertexStage)?;
        self.vertex = Some(vertex);

        let (generation, config) = self.config.snapshot();
        self.background_pending = config.background.is_some();
        self.applied_generation = Some(generation);
        self.current = config;
        self.report_unbindable_params();

        let config = Arc::clone(&self.current);
        for layer in enabled_ordered(&config.layers) {
            self.cache
                .get_or_create(&mut self.backend, &self.loader, &layer.shader_id, vertex);
        }

        let compositor = self
            .build_compositor(vertex)
            .map_err(RendererError::Compositor)?;
        self.compositor = Some(compositor);
        self.compositor_uniforms = CompositorUniforms::resolve(&self.backend, compositor);

        let quad = self
            .backend
            .create_vertex_buffer(&QUAD_VERTICES)
            .map_err(RendererError::Geometry)?;
        self.quad = Some(quad);

        let placeholder = self
            .backend
            .create_texture(1, 1, Some(&PLACEHOLDER_PIXEL))
            .map_err(RendererError::Placeholder)?;
        self.placeholder = Some(placeholder);
        Ok(())
    }

    fn build_compositor(&mut self, vertex: StageHandle) -> Result<ProgramHandle, ShaderError> {
        let source = self.loader.load_source(COMPOSITOR_FRAGMENT)?;
        let fragment = self
            .loader
            .compile_stage(&mut self.backend, &source, StageKind::Fragment)?;
        let program = self.loader.link_program(&mut self.backend, vertex, fragment);
        self.backend.delete_stage(fragment);
        program
    }

    /// Sets the visible viewport and (re)allocates one offscreen target per
    /// enabled layer at the new size. Zero sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if !matches!(
            self.state,
            RendererState::Created | RendererState::Sized | RendererState::Rendering
        ) {
            debug!(state = ?self.state, "resize ignored");
            return;
        }
        if width == 0 || height == 0 {
            debug!(width, height, "ignoring zero-sized resize");
            return;
        }
        self.size = (width, height);
        self.backend.resize_surface(width, height);
        self.backend.set_viewport(width, height);
        self.sync_config();

        self.targets.resize(&mut self.backend, width, height);
        let slots = enabled_ordered(&self.current.layers).len();
        self.targets
            .ensure_slots(&mut self.backend, slots, width, height);

        if self.background_pending {
            self.load_background();
        }
        self.state = RendererState::Sized;
        debug!(width, height, targets = self.targets.len(), "renderer sized");
    }

    /// Renders and presents one frame.
    pub fn draw_frame(&mut self) -> Result<FrameOutcome, FrameError> {
        if !matches!(self.state, RendererState::Sized | RendererState::Rendering) {
            debug!(state = ?self.state, "draw ignored");
            return Ok(FrameOutcome::NotReady);
        }
        let (Some(vertex), Some(compositor), Some(quad)) = (self.vertex, self.compositor, self.quad)
        else {
            return Ok(FrameOutcome::NotReady);
        };

        self.sync_config();
        if self.background_pending {
            self.load_background();
        }

        let time = self.clock.elapsed();
        let parallax = self.config.parallax();
        let (width, height) = self.size;
        let resolution = UniformValue::Vec2([width as f32, height as f32]);
        let background = self.background_texture();

        self.backend.begin_frame()?;

        let config = Arc::clone(&self.current);
        let layers = enabled_ordered(&config.layers);
        let mut drawn: Vec<(usize, f32)> = Vec::with_capacity(MAX_LAYER_SLOTS);
        let mut skipped = 0;
        for (slot, layer) in layers.iter().enumerate() {
            let Some(program) =
                self.cache
                    .get_or_create(&mut self.backend, &self.loader, &layer.shader_id, vertex)
            else {
                skipped += 1;
                continue;
            };
            if !self.targets.bind(&mut self.backend, slot) {
                debug!(slot, shader = %layer.shader_id, "no offscreen target; skipping layer");
                skipped += 1;
                continue;
            }
            self.backend.clear(LAYER_CLEAR);
            self.backend.use_program(program);

            let standard = [
                ("u_time", UniformValue::Float(time)),
                ("u_resolution", resolution),
                ("u_gyroOffset", UniformValue::Vec2(parallax)),
                ("u_depth", UniformValue::Float(layer.depth)),
                ("u_backgroundTexture", UniformValue::Int(BACKGROUND_UNIT as i32)),
            ];
            for (name, value) in standard {
                set_named(&mut self.backend, program, name, value);
            }
            if let Some(texture) = background {
                self.backend.bind_texture(BACKGROUND_UNIT, texture);
            }
            bind_params(&mut self.backend, &self.shaders, program, layer);

            self.backend.draw_triangles(quad, QUAD_VERTEX_COUNT);
            drawn.push((slot, layer.opacity));
        }
        self.targets.unbind(&mut self.backend);

        self.backend.set_viewport(width, height);
        self.backend.clear(SURFACE_CLEAR);
        self.backend.use_program(compositor);
        let uniforms = self.compositor_uniforms;
        if let Some(texture) = background {
            self.backend.bind_texture(BACKGROUND_UNIT, texture);
        }
        set_at(
            &mut self.backend,
            uniforms.background,
            UniformValue::Int(BACKGROUND_UNIT as i32),
        );
        set_at(&mut self.backend, uniforms.resolution, resolution);

        let mut active = 0usize;
        for (slot, opacity) in drawn.iter().take(MAX_LAYER_SLOTS) {
            let Some(texture) = self.targets.texture_of(*slot) else {
                continue;
            };
            let unit = 1 + active as u32;
            self.backend.bind_texture(unit, texture);
            set_at(
                &mut self.backend,
                uniforms.layers[active],
                UniformValue::Int(unit as i32),
            );
            set_at(
                &mut self.backend,
                uniforms.opacities[active],
                UniformValue::Float(*opacity),
            );
            active += 1;
        }
        set_at(
            &mut self.backend,
            uniforms.layer_count,
            UniformValue::Int(active as i32),
        );
        self.backend.draw_triangles(quad, QUAD_VERTEX_COUNT);
        self.backend.end_frame()?;

        self.frame_count += 1;
        self.state = RendererState::Rendering;
        self.report_fps(time);

        Ok(FrameOutcome::Presented(FrameStats {
            layers_drawn: active,
            layers_skipped: skipped,
        }))
    }

    /// Frees every GPU object in reverse creation order. Further calls are
    /// no-ops.
    pub fn release(&mut self) {
        match self.state {
            RendererState::Released => {
                debug!("release ignored; already released");
                return;
            }
            RendererState::Uninitialized => {}
            _ => self.release_resources(),
        }
        self.state = RendererState::Released;
        info!(frames = self.frame_count, "renderer released");
    }

    fn release_resources(&mut self) {
        if let Some(texture) = self.background.take() {
            self.backend.delete_texture(texture);
        }
        self.targets.release(&mut self.backend);
        if let Some(texture) = self.placeholder.take() {
            self.backend.delete_texture(texture);
        }
        if let Some(buffer) = self.quad.take() {
            self.backend.delete_buffer(buffer);
        }
        if let Some(program) = self.compositor.take() {
            self.backend.delete_program(program);
        }
        self.compositor_uniforms = CompositorUniforms::default();
        self.cache.release(&mut self.backend);
        if let Some(stage) = self.vertex.take() {
            self.backend.delete_stage(stage);
        }
    }

    /// Adopts a newly published configuration, if any. Returns whether one
    /// was applied.
    fn sync_config(&mut self) -> bool {
        let (generation, config) = self.config.snapshot();
        if self.applied_generation == Some(generation) {
            return false;
        }
        let background_changed = config.background != self.current.background;
        self.current = config;
        self.applied_generation = Some(generation);
        self.cache.forget_failures();
        self.report_unbindable_params();
        if background_changed {
            self.background_pending = true;
        }

        let slots = enabled_ordered(&self.current.layers).len();
        if matches!(self.state, RendererState::Sized | RendererState::Rendering) {
            let (width, height) = self.size;
            self.targets
                .ensure_slots(&mut self.backend, slots, width, height);
        }
        debug!(generation, layers = slots, "applied configuration");
        true
    }

    fn report_unbindable_params(&self) {
        for layer in &self.current.layers {
            let Some(descriptor) = self.shaders.get(&layer.shader_id) else {
                continue;
            };
            for (id, value) in &layer.params {
                let Some(param) = descriptor.param(id) else {
                    continue;
                };
                if param.coerce(*value).is_none() {
                    warn!(
                        shader = %layer.shader_id,
                        param = %id,
                        expected = %param.kind,
                        actual = %value.kind(),
                        "ignoring parameter of the wrong kind"
                    );
                }
            }
        }
    }

    fn load_background(&mut self) {
        self.background_pending = false;
        let Some(BackgroundConfig { image, crop }) = self.current.background.clone() else {
            self.drop_background();
            return;
        };
        let max_dimension = self.backend.max_texture_dimension();
        let texture = self
            .images
            .decode(&image, crop, self.size, max_dimension)
            .map_err(|err| err.to_string())
            .and_then(|decoded| {
                self.backend
                    .create_texture(decoded.width, decoded.height, Some(&decoded.pixels))
                    .map(|texture| (texture, decoded.width, decoded.height))
                    .map_err(|err| err.to_string())
            });
        self.drop_background();
        match texture {
            Ok((texture, width, height)) => {
                info!(image = %image, width, height, "background loaded");
                self.background = Some(texture);
            }
            Err(err) => {
                warn!(image = %image, error = %err, "background unavailable; using placeholder");
            }
        }
    }

    fn drop_background(&mut self) {
        if let Some(texture) = self.background.take() {
            self.backend.delete_texture(texture);
        }
    }

    fn background_texture(&self) -> Option<TextureHandle> {
        self.background.or(self.placeholder)
    }

    fn report_fps(&mut self, time: f32) {
        let window = time - self.fps.last_report;
        if window < 1.0 {
            return;
        }
        let frames = self.frame_count - self.fps.frames_at_report;
        debug!(
            fps = frames as f32 / window,
            average = self.current_fps(),
            frames = self.frame_count,
            "frame stats"
        );
        self.fps = FpsWindow {
            last_report: time,
            frames_at_report: self.frame_count,
        };
    }

    /// Seconds since `create`, or zero outside a live session.
    pub fn elapsed_seconds(&self) -> f32 {
        match self.state {
            RendererState::Created | RendererState::Sized | RendererState::Rendering => {
                self.clock.elapsed()
            }
            RendererState::Uninitialized | RendererState::Released => 0.0,
        }
    }

    /// Frames presented per second since `create`.
    pub fn current_fps(&self) -> f32 {
        let elapsed = self.elapsed_seconds();
        if elapsed > 0.0 {
            self.frame_count as f32 / elapsed
        } else {
            0.0
        }
    }

    /// Takes effect at the next resize or frame boundary. Callable from any
    /// thread holding a clone of the config handle.
    pub fn set_background(&self, image_ref: impl Into<String>, crop: Option<CropRect>) {
        self.config.set_background(image_ref, crop);
    }

    pub fn set_parallax(&self, x: f32, y: f32) {
        self.config.set_parallax(x, y);
    }

    pub fn config_handle(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn cache(&self) -> &ProgramCache {
        &self.cache
    }

    pub fn targets(&self) -> &OffscreenTargetManager {
        &self.targets
    }

    pub fn has_background(&self) -> bool {
        self.background.is_some()
    }
}

impl<B: GraphicsBackend> Drop for CompositingRenderer<B> {
    fn drop(&mut self) {
        if self.state != RendererState::Released {
            self.release();
        }
    }
}

/// Converts a parameter value to the uniform it binds as.
pub fn uniform_value(value: ParamValue) -> UniformValue {
    match value {
        ParamValue::Float(v) => UniformValue::Float(v),
        ParamValue::Int(v) => UniformValue::Int(v),
        ParamValue::Bool(v) => UniformValue::Int(i32::from(v)),
        ParamValue::Color(color) => UniformValue::Vec4(color.to_array()),
        ParamValue::Vec2(v) => UniformValue::Vec2(v),
        ParamValue::Vec3(v) => UniformValue::Vec3(v),
        ParamValue::Vec4(v) => UniformValue::Vec4(v),
    }
}

/// Descriptor defaults overlaid with the layer's own values.
///
/// Layer values are converted to the declared kind where possible (integers
/// widen to floats); values that cannot bind are dropped in favour of the
/// default and reported once per applied configuration by the renderer.
/// Parameters the descriptor does not declare pass through as given.
pub fn resolve_params(
    descriptor: Option<&ShaderDescriptor>,
    layer: &LayerConfig,
) -> BTreeMap<String, ParamValue> {
    let mut values = descriptor
        .map(ShaderDescriptor::defaults)
        .unwrap_or_default();
    for (id, value) in &layer.params {
        let value = match descriptor.and_then(|descriptor| descriptor.param(id)) {
            Some(param) => match param.coerce(*value) {
                Some(value) => value,
                None => continue,
            },
            None => *value,
        };
        values.insert(id.clone(), value);
    }
    values
}

fn bind_params<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    shaders: &HashMap<String, ShaderDescriptor>,
    program: ProgramHandle,
    layer: &LayerConfig,
) {
    for (name, value) in resolve_params(shaders.get(&layer.shader_id), layer) {
        set_named(backend, program, &name, uniform_value(value));
    }
}

fn set_named<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    program: ProgramHandle,
    name: &str,
    value: UniformValue,
) {
    set_at(backend, backend.uniform_location(program, name), value);
}

fn set_at<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    location: Option<UniformLocation>,
    value: UniformValue,
) {
    if let Some(location) = location {
        backend.set_uniform(location, value);
    }
}
