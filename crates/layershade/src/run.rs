use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use catalog::{DirectorySource, ShaderDescriptor, ShaderRegistry, ShaderSourceProvider};
use layerconfig::{LayerConfig, RenderConfig};
use renderer::{
    run_loop_for, CompositingRenderer, ConfigHandle, ContextOptions, FileImageProvider,
    FramePacer, ImageProvider, RenderSetup, StopSignal, WgpuBackend, WindowOptions, WindowRuntime,
    MAX_LAYER_SLOTS,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{BenchArgs, RunArgs};
use crate::paths::AppPaths;

const DEFAULT_FILTER: &str = "warn,naga=error,wgpu=error,wgpu_core=error,wgpu_hal=error,winit=error";
const DEFAULT_WINDOW_SIZE: (u32, u32) = (1280, 720);
// bench runs unpaced
const BENCH_FPS: f32 = 100_000.0;

pub fn initialise_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub(crate) fn discover(paths: &AppPaths) -> Result<(Arc<dyn ShaderSourceProvider>, Vec<ShaderDescriptor>)> {
    let provider: Arc<dyn ShaderSourceProvider> = Arc::new(DirectorySource::new(paths.shader_dir()));
    let mut registry = ShaderRegistry::new(Arc::clone(&provider));
    let descriptors = registry
        .discover()
        .with_context(|| format!("failed to scan shaders in {}", paths.shader_dir().display()))?
        .to_vec();
    tracing::debug!(
        shaders = descriptors.len(),
        dir = %paths.shader_dir().display(),
        "discovered shaders"
    );
    Ok((provider, descriptors))
}

/// Loads the configuration file. A missing file yields one layer per
/// discovered shader (up to the slot budget) so a fresh install shows
/// something.
pub(crate) fn load_config(path: &Path, descriptors: &[ShaderDescriptor]) -> Result<RenderConfig> {
    if path.exists() {
        return RenderConfig::load(path)
            .with_context(|| format!("failed to load render config {}", path.display()));
    }
    tracing::info!(
        path = %path.display(),
        "no render config found; layering every discovered shader"
    );
    let mut config = RenderConfig::default();
    config.layers = descriptors
        .iter()
        .take(MAX_LAYER_SLOTS)
        .enumerate()
        .map(|(order, descriptor)| LayerConfig::new(descriptor.id.clone(), order as u32))
        .collect();
    Ok(config)
}

pub fn run(args: RunArgs, paths: &AppPaths) -> Result<()> {
    let (provider, descriptors) = discover(paths)?;
    let config = load_config(paths.config_file(), &descriptors)?;
    let handle = ConfigHandle::new(config.clone());

    let options = WindowOptions {
        title: "layershade".into(),
        size: args.size.unwrap_or(DEFAULT_WINDOW_SIZE),
        fps: args.fps.unwrap_or(config.runtime.fps),
        context: ContextOptions {
            power: config.runtime.power,
            vsync: config.runtime.vsync,
            ..ContextOptions::default()
        },
    };
    let images: Arc<dyn ImageProvider> = Arc::new(FileImageProvider::with_root(paths.config_dir()));
    let runtime = WindowRuntime::spawn(
        options,
        RenderSetup {
            descriptors,
            provider,
            images: Some(images),
            config: handle.clone(),
        },
    )?;
    tracing::info!(
        layers = config.enabled_count(),
        config = %paths.config_file().display(),
        "layershade running"
    );

    let mut watcher = ConfigWatcher::new(paths.config_file());
    let mut poll_interval = config.runtime.poll_interval;
    while !runtime.is_finished() {
        thread::sleep(poll_interval);
        if let Some(next) = watcher.poll() {
            poll_interval = next.runtime.poll_interval;
            let generation = handle.publish(next);
            tracing::info!(generation, "render config reloaded");
        }
    }
    runtime.wait()
}

pub fn bench(args: BenchArgs, paths: &AppPaths) -> Result<()> {
    let (provider, descriptors) = discover(paths)?;
    let config = load_config(paths.config_file(), &descriptors)?;
    let layers = config.enabled_count();

    let backend = WgpuBackend::headless(
        args.size,
        ContextOptions {
            power: config.runtime.power,
            ..ContextOptions::default()
        },
    )?;
    let images: Arc<dyn ImageProvider> = Arc::new(FileImageProvider::with_root(paths.config_dir()));
    let mut renderer = CompositingRenderer::new(backend, provider, ConfigHandle::new(config))
        .with_shaders(descriptors)
        .with_image_provider(images);
    renderer.create().context("failed to initialise renderer")?;
    renderer.resize(args.size.0, args.size.1);

    let mut pacer = FramePacer::new(BENCH_FPS);
    let started = Instant::now();
    let frames = run_loop_for(&mut renderer, &mut pacer, &StopSignal::new(), Some(args.frames))
        .context("bench render loop failed")?;
    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 {
        frames as f64 / elapsed
    } else {
        0.0
    };
    println!(
        "{frames} frames at {}x{} with {layers} layers in {elapsed:.2}s ({rate:.1} fps)",
        args.size.0, args.size.1
    );
    Ok(())
}

/// Re-reads a configuration file when its modification time changes.
#[derive(Debug)]
pub(crate) struct ConfigWatcher {
    path: PathBuf,
    seen: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            seen: modified(path),
        }
    }

    /// Returns the new configuration when the file changed and still loads;
    /// an invalid edit is logged and the running configuration stays.
    pub fn poll(&mut self) -> Option<RenderConfig> {
        let current = modified(&self.path);
        if current.is_none() || current == self.seen {
            return None;
        }
        self.seen = current;
        match RenderConfig::load(&self.path) {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "ignoring invalid render config edit"
                );
                None
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
