//! Discovers shaders from a source provider and keeps the descriptors of the
//! most recent scan for lookup.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::descriptor::{ApiVersion, ShaderDescriptor};
use crate::metadata;
use crate::source::{ShaderSourceProvider, SourceError};

pub struct ShaderRegistry {
    provider: Arc<dyn ShaderSourceProvider>,
    descriptors: Vec<ShaderDescriptor>,
    index: HashMap<String, usize>,
}

impl ShaderRegistry {
    pub fn new(provider: Arc<dyn ShaderSourceProvider>) -> Self {
        Self {
            provider,
            descriptors: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ShaderSourceProvider> {
        &self.provider
    }

    /// Rescans the provider. Entries that fail to load or parse are logged and
    /// skipped; a later entry with an id already seen replaces the earlier one
    /// in place.
    pub fn discover(&mut self) -> Result<&[ShaderDescriptor], SourceError> {
        let names = self.provider.list()?;
        self.descriptors.clear();
        self.index.clear();

        for name in names {
            let text = match self.provider.load_source(&name) {
                Ok(text) => text,
                Err(err) => {
                    warn!(source = %name, error = %err, "skipping unreadable shader");
                    continue;
                }
            };
            let descriptor = match metadata::parse(&text, &name) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    warn!(source = %name, error = %err, "skipping shader with invalid metadata");
                    continue;
                }
            };

            if source_stem(&name) != descriptor.id {
                debug!(
                    shader = %descriptor.id,
                    source = %name,
                    "shader id differs from its source name"
                );
            }

            match self.index.get(&descriptor.id) {
                Some(&slot) => {
                    warn!(
                        shader = %descriptor.id,
                        replaced = %self.descriptors[slot].shader_source,
                        source = %name,
                        "duplicate shader id; later entry wins"
                    );
                    self.descriptors[slot] = descriptor;
                }
                None => {
                    self.index
                        .insert(descriptor.id.clone(), self.descriptors.len());
                    self.descriptors.push(descriptor);
                }
            }
        }

        debug!(count = self.descriptors.len(), "shader discovery complete");
        Ok(&self.descriptors)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ShaderDescriptor> {
        self.index.get(id).map(|&slot| &self.descriptors[slot])
    }

    /// Results of the last `discover` call; empty before the first one.
    pub fn get_all(&self) -> &[ShaderDescriptor] {
        &self.descriptors
    }

    pub fn compatible(&self, api: ApiVersion) -> impl Iterator<Item = &ShaderDescriptor> {
        self.descriptors
            .iter()
            .filter(move |descriptor| api.satisfies(descriptor.min_graphics_api))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn source_stem(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

impl std::fmt::Debug for ShaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderRegistry")
            .field("descriptors", &self.descriptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn shader(id: &str, name: &str) -> String {
        format!("/**\n * @shader {name}\n * @id {id}\n * @version 1.0.0\n */\nvoid main() {{}}\n")
    }

    fn registry(source: MemorySource) -> ShaderRegistry {
        ShaderRegistry::new(Arc::new(source))
    }

    #[test]
    fn get_all_is_empty_before_discovery() {
        let registry = registry(MemorySource::new().with("a.frag", shader("a", "A")));
        assert!(registry.get_all().is_empty());
        assert!(registry.is_empty());
        assert!(registry.get_by_id("a").is_none());
    }

    #[test]
    fn malformed_entry_only_skips_itself() {
        let mut registry = registry(
            MemorySource::new()
                .with("a.frag", shader("a", "A"))
                .with("broken.frag", "void main() {}")
                .with("c.frag", shader("c", "C")),
        );
        let ids: Vec<_> = registry
            .discover()
            .unwrap()
            .iter()
            .map(|d| d.id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(registry.get_by_id("c").unwrap().name, "C");
    }

    #[test]
    fn later_duplicate_wins_in_place() {
        let mut registry = registry(
            MemorySource::new()
                .with("first.frag", shader("dup", "First"))
                .with("other.frag", shader("other", "Other"))
                .with("second.frag", shader("dup", "Second")),
        );
        let found = registry.discover().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "dup");
        assert_eq!(found[0].name, "Second");
        assert_eq!(found[0].shader_source, "second.frag");
        assert_eq!(registry.get_by_id("dup").unwrap().name, "Second");
    }

    #[test]
    fn descriptor_keeps_its_source_name() {
        let mut registry =
            registry(MemorySource::new().with("heavy_rain.frag", shader("rain", "Rain")));
        registry.discover().unwrap();
        assert_eq!(registry.get_by_id("rain").unwrap().shader_source, "heavy_rain.frag");
        assert_eq!(source_stem("heavy_rain.frag"), "heavy_rain");
        assert_eq!(source_stem("plain"), "plain");
    }

    #[test]
    fn discover_is_repeatable() {
        let mut registry = registry(MemorySource::new().with("a.frag", shader("a", "A")));
        let first: Vec<_> = registry.discover().unwrap().to_vec();
        let second: Vec<_> = registry.discover().unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(registry.get_all(), second.as_slice());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn compatible_filters_by_api_level() {
        let modern = "/**\n * @shader M\n * @id m\n * @version 1.0.0\n * @minGraphicsApi 3.2\n */\n";
        let mut registry = registry(
            MemorySource::new()
                .with("a.frag", shader("a", "A"))
                .with("m.frag", modern),
        );
        registry.discover().unwrap();
        let ids: Vec<_> = registry
            .compatible(ApiVersion::new(3, 0))
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(registry.compatible(ApiVersion::new(3, 2)).count(), 2);
    }
}
