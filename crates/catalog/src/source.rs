//! Shader source collections the registry and the shader loader read from.
//!
//! Types:
//!
//! - `ShaderSourceProvider` lists entry names and loads their text.
//! - `DirectorySource` serves the `.frag` files of one directory in sorted
//!   file-name order.
//! - `MemorySource` serves an ordered in-memory collection for tests and
//!   embedded shader sets.
//! - `SourceError` separates missing entries from I/O failures.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// File extension appended to a shader id to locate its fragment stage.
pub const FRAGMENT_EXTENSION: &str = "frag";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("shader source '{0}' not found")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub trait ShaderSourceProvider: Send + Sync {
    /// Entry names in scan order.
    fn list(&self) -> Result<Vec<String>, SourceError>;

    fn load_source(&self, name: &str) -> Result<String, SourceError>;
}

#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> Option<PathBuf> {
        let candidate = Path::new(name);
        let mut components = candidate.components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => Some(self.root.join(candidate)),
            _ => None,
        }
    }
}

impl ShaderSourceProvider for DirectorySource {
    fn list(&self) -> Result<Vec<String>, SourceError> {
        let io_error = |source| SourceError::Io {
            path: self.root.clone(),
            source,
        };
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(FRAGMENT_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn load_source(&self, name: &str) -> Result<String, SourceError> {
        let path = self
            .entry_path(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(name.to_string()),
            _ => SourceError::Io { path, source },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: Vec<(String, String)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry at the end of the scan order, or replaces its text in
    /// place when the name already exists.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        let name = name.into();
        let text = text.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = text,
            None => self.entries.push((name, text)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(name, text);
        self
    }
}

impl ShaderSourceProvider for MemorySource {
    fn list(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.entries.iter().map(|(name, _)| name.clone()).collect())
    }

    fn load_source(&self, name: &str) -> Result<String, SourceError> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}
