//! Shader catalog: metadata extraction, source providers, and discovery.
mod descriptor;
pub mod metadata;
mod registry;
mod source;
mod value;

pub use descriptor::{ApiVersion, ParameterDescriptor, ShaderDescriptor};
pub use metadata::{parse, MetadataError};
pub use registry::ShaderRegistry;
pub use source::{
    DirectorySource, MemorySource, ShaderSourceProvider, SourceError, FRAGMENT_EXTENSION,
};
pub use value::{parse_vector, ParamKind, ParamValue, Rgba};
