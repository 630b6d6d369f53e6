//! One linked program per shader id for the lifetime of a render session.
use std::collections::{HashMap, HashSet};

use catalog::FRAGMENT_EXTENSION;
use layerconfig::LayerConfig;
use tracing::{debug, warn};

use crate::backend::GraphicsBackend;
use crate::loader::ShaderLoader;
use crate::types::{ProgramHandle, StageHandle, StageKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub shader_id: String,
    pub handle: ProgramHandle,
}

#[derive(Debug, Default)]
pub struct ProgramCache {
    programs: HashMap<String, CompiledProgram>,
    failed: HashSet<String>,
    sources: HashMap<String, String>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the provider entry holding `shader_id`'s fragment source.
    pub fn set_source(&mut self, shader_id: impl Into<String>, source_name: impl Into<String>) {
        self.sources.insert(shader_id.into(), source_name.into());
    }

    /// Entry loaded for `shader_id`: the recorded one, else `<id>.frag`.
    pub fn source_name(&self, shader_id: &str) -> String {
        self.sources
            .get(shader_id)
            .cloned()
            .unwrap_or_else(|| format!("{shader_id}.{FRAGMENT_EXTENSION}"))
    }

    /// Returns the cached program for `shader_id`, building it on first use
    /// against the shared vertex stage.
    ///
    /// Failures are logged and reported as `None`; a shader that failed is
    /// not retried until `forget_failures` is called.
    pub fn get_or_create<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        loader: &ShaderLoader,
        shader_id: &str,
        vertex: StageHandle,
    ) -> Option<ProgramHandle> {
        if let Some(program) = self.programs.get(shader_id) {
            return Some(program.handle);
        }
        if self.failed.contains(shader_id) {
            return None;
        }

        match build(backend, loader, &self.source_name(shader_id), vertex) {
            Ok(handle) => {
                debug!(shader = shader_id, program = %handle, "compiled layer program");
                self.programs.insert(
                    shader_id.to_string(),
                    CompiledProgram {
                        shader_id: shader_id.to_string(),
                        handle,
                    },
                );
                Some(handle)
            }
            Err(err) => {
                warn!(shader = shader_id, error = %err, "layer program unavailable; skipping layer");
                self.failed.insert(shader_id.to_string());
                None
            }
        }
    }

    pub fn get(&self, shader_id: &str) -> Option<&CompiledProgram> {
        self.programs.get(shader_id)
    }

    pub fn has_failed(&self, shader_id: &str) -> bool {
        self.failed.contains(shader_id)
    }

    /// Allows previously failed shaders to be rebuilt on their next request.
    pub fn forget_failures(&mut self) {
        self.failed.clear();
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Deletes every cached program. Safe to call on an empty cache.
    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, program) in self.programs.drain() {
            backend.delete_program(program.handle);
        }
        self.failed.clear();
    }
}

fn build<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    loader: &ShaderLoader,
    source_name: &str,
    vertex: StageHandle,
) -> Result<ProgramHandle, crate::loader::ShaderError> {
    let source = loader.load_source(source_name)?;
    let fragment = loader.compile_stage(backend, &source, StageKind::Fragment)?;
    let program = loader.link_program(backend, vertex, fragment);
    backend.delete_stage(fragment);
    program
}

/// Enabled layers sorted by ascending `order`; equal orders keep their input
/// order.
pub fn enabled_ordered(layers: &[LayerConfig]) -> Vec<&LayerConfig> {
    let mut enabled: Vec<&LayerConfig> = layers.iter().filter(|layer| layer.enabled).collect();
    enabled.sort_by_key(|layer| layer.order);
    enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::QUAD_VERTEX;
    use crate::recording::RecordingBackend;
    use catalog::MemorySource;
    use std::sync::Arc;

    const FRAGMENT: &str = "out vec4 fragColor;\nvoid main() { fragColor = vec4(1.0); }\n";

    fn setup(source: MemorySource) -> (RecordingBackend, ShaderLoader, StageHandle) {
        let mut backend = RecordingBackend::new();
        let loader = ShaderLoader::new(Arc::new(source));
        let vertex_source = loader.load_source(QUAD_VERTEX).unwrap();
        let vertex = loader
            .compile_stage(&mut backend, &vertex_source, StageKind::Vertex)
            .unwrap();
        (backend, loader, vertex)
    }

    #[test]
    fn second_request_hits_the_cache() {
        let (mut backend, loader, vertex) = setup(MemorySource::new().with("rain.frag", FRAGMENT));
        let mut cache = ProgramCache::new();
        let first = cache.get_or_create(&mut backend, &loader, "rain", vertex);
        let second = cache.get_or_create(&mut backend, &loader, "rain", vertex);
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(backend.compile_count(StageKind::Fragment), 1);
        assert_eq!(cache.get("rain").unwrap().shader_id, "rain");
        // fragment stage is discarded, the shared vertex stage survives
        assert_eq!(backend.live_stages(), 1);
    }

    #[test]
    fn failures_return_none_and_are_remembered() {
        let (mut backend, loader, vertex) = setup(
            MemorySource::new().with("broken.frag", "BROKEN"),
        );
        backend.fail_compile_containing("BROKEN");
        let mut cache = ProgramCache::new();
        assert_eq!(cache.get_or_create(&mut backend, &loader, "broken", vertex), None);
        assert_eq!(cache.get_or_create(&mut backend, &loader, "broken", vertex), None);
        assert_eq!(backend.compile_count(StageKind::Fragment), 1);
        assert!(cache.has_failed("broken"));

        cache.forget_failures();
        assert_eq!(cache.get_or_create(&mut backend, &loader, "broken", vertex), None);
        assert_eq!(backend.compile_count(StageKind::Fragment), 2);
    }

    #[test]
    fn recorded_source_name_overrides_id() {
        let (mut backend, loader, vertex) =
            setup(MemorySource::new().with("heavy_rain.frag", FRAGMENT));
        let mut cache = ProgramCache::new();
        assert_eq!(cache.source_name("rain"), "rain.frag");
        cache.set_source("rain", "heavy_rain.frag");
        assert_eq!(cache.source_name("rain"), "heavy_rain.frag");
        assert!(cache.get_or_create(&mut backend, &loader, "rain", vertex).is_some());
    }

    #[test]
    fn missing_source_returns_none() {
        let (mut backend, loader, vertex) = setup(MemorySource::new());
        let mut cache = ProgramCache::new();
        assert_eq!(cache.get_or_create(&mut backend, &loader, "absent", vertex), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn link_failure_discards_fragment_stage() {
        let (mut backend, loader, vertex) = setup(
            MemorySource::new().with("bad.frag", "uniform float u_unlinkable;\n"),
        );
        backend.fail_link_containing("u_unlinkable");
        let mut cache = ProgramCache::new();
        assert_eq!(cache.get_or_create(&mut backend, &loader, "bad", vertex), None);
        assert_eq!(backend.live_stages(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let (mut backend, loader, vertex) = setup(
            MemorySource::new()
                .with("a.frag", FRAGMENT)
                .with("b.frag", FRAGMENT),
        );
        let mut cache = ProgramCache::new();
        cache.get_or_create(&mut backend, &loader, "a", vertex);
        cache.get_or_create(&mut backend, &loader, "b", vertex);
        assert_eq!(cache.len(), 2);

        cache.release(&mut backend);
        assert_eq!(cache.len(), 0);
        assert_eq!(backend.live_programs(), 0);
        cache.release(&mut backend);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn enabled_ordered_filters_and_sorts() {
        let layers = vec![
            LayerConfig::new("two", 2),
            LayerConfig::new("zero", 0).disabled(),
            LayerConfig::new("one", 1),
        ];
        let ordered: Vec<_> = enabled_ordered(&layers)
            .into_iter()
            .map(|layer| layer.shader_id.as_str())
            .collect();
        assert_eq!(ordered, vec!["one", "two"]);
    }

    #[test]
    fn enabled_ordered_ties_keep_input_order() {
        let layers = vec![
            LayerConfig::new("b", 1),
            LayerConfig::new("a", 0),
            LayerConfig::new("c", 1),
            LayerConfig::new("d", 1),
        ];
        let ordered: Vec<_> = enabled_ordered(&layers)
            .into_iter()
            .map(|layer| layer.shader_id.as_str())
            .collect();
        assert_eq!(ordered, vec!["a", "b", "c", "d"]);
    }
}
