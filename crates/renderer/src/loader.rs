//! Turns named shader sources into compiled stages and linked programs.
use std::sync::Arc;

use catalog::{ShaderSourceProvider, SourceError};
use thiserror::Error;
use tracing::debug;

use crate::backend::GraphicsBackend;
use crate::builtin;
use crate::types::{ProgramHandle, StageHandle, StageKind};

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader source '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Source(SourceError),

    #[error("{stage} stage failed to compile:\n{log}")]
    Compilation { stage: StageKind, log: String },

    #[error("program failed to link:\n{log}")]
    Link { log: String },
}

impl From<SourceError> for ShaderError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(name) => Self::NotFound(name),
            other => Self::Source(other),
        }
    }
}

#[derive(Clone)]
pub struct ShaderLoader {
    provider: Arc<dyn ShaderSourceProvider>,
}

impl ShaderLoader {
    pub fn new(provider: Arc<dyn ShaderSourceProvider>) -> Self {
        Self { provider }
    }

    /// Resolves reserved `builtin:` names first, then the external provider.
    pub fn load_source(&self, name: &str) -> Result<String, ShaderError> {
        if builtin::is_builtin(name) {
            return builtin::source(name)
                .map(str::to_string)
                .ok_or_else(|| ShaderError::NotFound(name.to_string()));
        }
        Ok(self.provider.load_source(name)?)
    }

    pub fn compile_stage<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        source: &str,
        stage: StageKind,
    ) -> Result<StageHandle, ShaderError> {
        backend
            .compile_stage(source, stage)
            .map_err(|log| ShaderError::Compilation { stage, log })
    }

    pub fn link_program<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        vertex: StageHandle,
        fragment: StageHandle,
    ) -> Result<ProgramHandle, ShaderError> {
        backend
            .link_program(vertex, fragment)
            .map_err(|log| ShaderError::Link { log })
    }

    /// Loads, compiles and links both stages. Stage objects are deleted
    /// before returning, whether or not linking succeeded.
    pub fn create_program<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        vertex_name: &str,
        fragment_name: &str,
    ) -> Result<ProgramHandle, ShaderError> {
        let vertex_source = self.load_source(vertex_name)?;
        let fragment_source = self.load_source(fragment_name)?;

        let vertex = self.compile_stage(backend, &vertex_source, StageKind::Vertex)?;
        let fragment = match self.compile_stage(backend, &fragment_source, StageKind::Fragment) {
            Ok(fragment) => fragment,
            Err(err) => {
                backend.delete_stage(vertex);
                return Err(err);
            }
        };
        let program = self.link_program(backend, vertex, fragment);
        backend.delete_stage(fragment);
        backend.delete_stage(vertex);
        if program.is_ok() {
            debug!(vertex = vertex_name, fragment = fragment_name, "linked program");
        }
        program
    }
}

impl std::fmt::Debug for ShaderLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderLoader").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{COMPOSITOR_FRAGMENT, QUAD_VERTEX};
    use crate::recording::RecordingBackend;
    use catalog::MemorySource;

    fn loader(source: MemorySource) -> ShaderLoader {
        ShaderLoader::new(Arc::new(source))
    }

    const FRAGMENT: &str = "out vec4 fragColor;\nuniform float u_time;\nvoid main() { fragColor = vec4(u_time); }\n";

    #[test]
    fn builtins_shadow_the_provider() {
        let loader = loader(MemorySource::new().with(QUAD_VERTEX, "not the builtin"));
        assert!(loader
            .load_source(QUAD_VERTEX)
            .unwrap()
            .contains("v_texCoord"));
        assert!(matches!(
            loader.load_source("builtin:nope.frag"),
            Err(ShaderError::NotFound(_))
        ));
    }

    #[test]
    fn missing_source_is_not_found() {
        let loader = loader(MemorySource::new());
        assert!(matches!(
            loader.load_source("rain.frag"),
            Err(ShaderError::NotFound(name)) if name == "rain.frag"
        ));
    }

    #[test]
    fn compilation_error_carries_stage_and_log() {
        let mut backend = RecordingBackend::new();
        backend.fail_compile_containing("BROKEN");
        let loader = loader(MemorySource::new());
        let err = loader
            .compile_stage(&mut backend, "BROKEN", StageKind::Fragment)
            .unwrap_err();
        match err {
            ShaderError::Compilation { stage, log } => {
                assert_eq!(stage, StageKind::Fragment);
                assert!(log.contains("BROKEN"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn create_program_releases_stages() {
        let mut backend = RecordingBackend::new();
        let loader = loader(MemorySource::new().with("fx.frag", FRAGMENT));
        let program = loader
            .create_program(&mut backend, QUAD_VERTEX, "fx.frag")
            .unwrap();
        assert_eq!(backend.live_stages(), 0);
        assert_eq!(backend.live_programs(), 1);
        assert!(backend.uniform_location(program, "u_time").is_some());

        let compositor = loader
            .create_program(&mut backend, QUAD_VERTEX, COMPOSITOR_FRAGMENT)
            .unwrap();
        assert!(backend.uniform_location(compositor, "u_layerCount").is_some());
    }

    #[test]
    fn link_failure_still_releases_stages() {
        let mut backend = RecordingBackend::new();
        backend.fail_link_containing("u_time");
        let loader = loader(MemorySource::new().with("fx.frag", FRAGMENT));
        let err = loader
            .create_program(&mut backend, QUAD_VERTEX, "fx.frag")
            .unwrap_err();
        assert!(matches!(err, ShaderError::Link { .. }));
        assert_eq!(backend.live_stages(), 0);
        assert_eq!(backend.live_programs(), 0);
    }
}
