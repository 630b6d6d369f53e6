use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use catalog::{ShaderDescriptor, ShaderSourceProvider};
use renderer::{ContextOptions, GraphicsBackend, ShaderLoader, WgpuBackend, QUAD_VERTEX};

use crate::paths::AppPaths;
use crate::run::discover;

const CHECK_SIZE: (u32, u32) = (64, 64);

pub fn list(paths: &AppPaths, json: bool) -> Result<()> {
    let (_, descriptors) = discover(paths)?;
    print!("{}", render_listing(&descriptors, json)?);
    Ok(())
}

pub(crate) fn render_listing(descriptors: &[ShaderDescriptor], json: bool) -> Result<String> {
    if json {
        let mut text =
            serde_json::to_string_pretty(descriptors).context("failed to encode descriptors")?;
        text.push('\n');
        return Ok(text);
    }
    if descriptors.is_empty() {
        return Ok("No shaders found.\n".into());
    }
    let mut out = String::new();
    for descriptor in descriptors {
        let _ = writeln!(
            out,
            "{:<20} {:<24} v{:<10} params={:<2} api={}",
            descriptor.id,
            descriptor.name,
            descriptor.version,
            descriptor.params.len(),
            descriptor.min_graphics_api
        );
    }
    Ok(out)
}

pub fn check(paths: &AppPaths) -> Result<()> {
    let (provider, descriptors) = discover(paths)?;
    let mut backend = WgpuBackend::headless(CHECK_SIZE, ContextOptions::default())?;
    let failures = check_all(&mut backend, provider, &descriptors);
    if failures > 0 {
        bail!("{failures} of {} shaders failed to compile", descriptors.len());
    }
    println!("{} shaders compiled cleanly", descriptors.len());
    Ok(())
}

/// Compiles and links each descriptor against the shared vertex stage,
/// printing one line per shader; returns the number of failures.
pub(crate) fn check_all<B: GraphicsBackend>(
    backend: &mut B,
    provider: Arc<dyn ShaderSourceProvider>,
    descriptors: &[ShaderDescriptor],
) -> usize {
    let loader = ShaderLoader::new(provider);
    let mut failures = 0;
    for descriptor in descriptors {
        match loader.create_program(backend, QUAD_VERTEX, &descriptor.shader_source) {
            Ok(program) => {
                backend.delete_program(program);
                println!("ok    {}", descriptor.id);
            }
            Err(err) => {
                failures += 1;
                println!("FAIL  {}: {err}", descriptor.id);
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{MemorySource, ShaderRegistry};
    use renderer::RecordingBackend;

    const RAIN: &str = "/**\n * @shader Rain\n * @id rain\n * @version 1.0.0\n * @param u_speed float 1.0\n */\nvoid main() {}\n";
    const BROKEN: &str = "/**\n * @shader Broken\n * @id broken\n * @version 1.0.0\n */\nBROKEN\n";

    fn registry() -> (Arc<dyn ShaderSourceProvider>, Vec<ShaderDescriptor>) {
        let provider: Arc<dyn ShaderSourceProvider> = Arc::new(
            MemorySource::new()
                .with("rain.frag", RAIN)
                .with("broken.frag", BROKEN),
        );
        let mut registry = ShaderRegistry::new(Arc::clone(&provider));
        let descriptors = registry.discover().unwrap().to_vec();
        (provider, descriptors)
    }

    #[test]
    fn text_listing_has_one_row_per_shader() {
        let (_, descriptors) = registry();
        let listing = render_listing(&descriptors, false).unwrap();
        assert_eq!(listing.lines().count(), 2);
        assert!(listing.contains("rain"));
        assert!(listing.contains("params=1"));
    }

    #[test]
    fn json_listing_round_trips_ids() {
        let (_, descriptors) = registry();
        let listing = render_listing(&descriptors, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&listing).unwrap();
        let ids: Vec<_> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["id"].as_str().unwrap().to_string())
            .collect();
        assert!(ids.contains(&"rain".to_string()));
        assert!(ids.contains(&"broken".to_string()));
    }

    #[test]
    fn check_counts_compile_failures() {
        let (provider, descriptors) = registry();
        let mut backend = RecordingBackend::new();
        backend.fail_compile_containing("BROKEN");
        assert_eq!(check_all(&mut backend, provider, &descriptors), 1);
        assert_eq!(backend.live_programs(), 0);
        assert_eq!(backend.live_stages(), 0);
    }

    #[test]
    fn empty_catalog_lists_placeholder() {
        assert_eq!(render_listing(&[], false).unwrap(), "No shaders found.\n");
    }
}
