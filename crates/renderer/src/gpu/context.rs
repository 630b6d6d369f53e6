use anyhow::{anyhow, Context as AnyhowContext, Result};
use layerconfig::PowerPreference;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::types::FrameError;

/// Format of offscreen layer targets and the headless visible target.
pub(crate) const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub power: PowerPreference,
    pub vsync: bool,
    /// Frames the presentation engine may queue, clamped to 1..=3.
    pub latency: u32,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            power: PowerPreference::Low,
            vsync: true,
            latency: 2,
        }
    }
}

enum Presentation {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Headless {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
}

/// Visible target acquired for one frame.
pub(crate) struct AcquiredFrame {
    pub surface_texture: Option<wgpu::SurfaceTexture>,
    pub view: wgpu::TextureView,
}

pub(crate) struct GpuContext {
    _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub format: wgpu::TextureFormat,
    pub size: (u32, u32),
    presentation: Presentation,
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn power_preference(power: PowerPreference) -> wgpu::PowerPreference {
    match power {
        PowerPreference::Low => wgpu::PowerPreference::LowPower,
        PowerPreference::High => wgpu::PowerPreference::HighPerformance,
    }
}

fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    let info = adapter.get_info();
    tracing::debug!(
        name = %info.name,
        backend = ?info.backend,
        device_type = ?info.device_type,
        "selected GPU adapter"
    );
    let limits = adapter.limits();
    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("layershade device"),
        required_features: wgpu::Features::empty(),
        required_limits: limits.clone(),
        memory_hints: wgpu::MemoryHints::MemoryUsage,
        trace: wgpu::Trace::default(),
    }))
    .context("failed to create GPU device")
}

fn check_size(device: &wgpu::Device, width: u32, height: u32) -> Result<()> {
    let max_dimension = device.limits().max_texture_dimension_2d;
    if width > max_dimension || height > max_dimension {
        anyhow::bail!(
            "GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}"
        );
    }
    Ok(())
}

impl GpuContext {
    pub(crate) fn for_window<T>(target: &T, size: (u32, u32), options: ContextOptions) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = new_instance();

        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;

        // SAFETY: the host keeps the window alive for as long as this context.
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: power_preference(options.power),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;
        let (device, queue) = request_device(&adapter)?;

        let width = size.0.max(1);
        let height = size.1.max(1);
        check_size(&device, width, height)?;

        let caps = surface.get_capabilities(&adapter);
        let fallback = *caps
            .formats
            .first()
            .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .unwrap_or_else(|| {
                tracing::warn!(
                    ?fallback,
                    "no linear (non-sRGB) surface format available; falling back to {:?}",
                    fallback
                );
                fallback
            });

        let fifo = caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo);
        let present_mode = if options.vsync {
            fifo.unwrap_or(wgpu::PresentMode::AutoVsync)
        } else {
            caps.present_modes
                .iter()
                .copied()
                .find(|mode| matches!(mode, wgpu::PresentMode::Immediate | wgpu::PresentMode::Mailbox))
                .unwrap_or(wgpu::PresentMode::AutoNoVsync)
        };

        let latency = options.latency.clamp(1, 3);
        if latency != options.latency {
            tracing::warn!(
                requested = options.latency,
                clamped = latency,
                "GPU frame latency clamped to valid range (1-3)"
            );
        }
        tracing::debug!(?present_mode, ?format, "configuring surface");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: latency,
        };
        surface.configure(&device, &config);

        Ok(Self {
            _instance: instance,
            device,
            queue,
            format,
            size: (width, height),
            presentation: Presentation::Surface { surface, config },
        })
    }

    /// A context without a window; frames render into an internal texture.
    pub(crate) fn headless(size: (u32, u32), options: ContextOptions) -> Result<Self> {
        let instance = new_instance();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: power_preference(options.power),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;
        let (device, queue) = request_device(&adapter)?;

        let width = size.0.max(1);
        let height = size.1.max(1);
        check_size(&device, width, height)?;
        let (texture, view) = headless_target(&device, width, height);

        Ok(Self {
            _instance: instance,
            device,
            queue,
            format: OFFSCREEN_FORMAT,
            size: (width, height),
            presentation: Presentation::Headless { texture, view },
        })
    }

    pub(crate) fn is_headless(&self) -> bool {
        matches!(self.presentation, Presentation::Headless { .. })
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.size = (width, height);
        match &mut self.presentation {
            Presentation::Surface { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            Presentation::Headless { texture, view } => {
                if texture.width() != width || texture.height() != height {
                    let (new_texture, new_view) = headless_target(&self.device, width, height);
                    *texture = new_texture;
                    *view = new_view;
                }
            }
        }
    }

    pub(crate) fn acquire(&self) -> Result<AcquiredFrame, FrameError> {
        match &self.presentation {
            Presentation::Surface { surface, .. } => {
                let frame = surface.get_current_texture().map_err(map_surface_error)?;
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(AcquiredFrame {
                    surface_texture: Some(frame),
                    view,
                })
            }
            Presentation::Headless { view, .. } => Ok(AcquiredFrame {
                surface_texture: None,
                view: view.clone(),
            }),
        }
    }
}

fn headless_target(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("headless visible target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

pub(crate) fn map_surface_error(err: wgpu::SurfaceError) -> FrameError {
    match err {
        wgpu::SurfaceError::Lost => FrameError::ContextLost,
        wgpu::SurfaceError::Outdated => FrameError::Outdated,
        wgpu::SurfaceError::Timeout => FrameError::Timeout,
        wgpu::SurfaceError::OutOfMemory => FrameError::OutOfMemory,
        other => FrameError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_errors_map_to_frame_errors() {
        assert_eq!(map_surface_error(wgpu::SurfaceError::Lost), FrameError::ContextLost);
        assert_eq!(map_surface_error(wgpu::SurfaceError::Outdated), FrameError::Outdated);
        assert!(map_surface_error(wgpu::SurfaceError::Timeout).is_transient());
        assert_eq!(
            map_surface_error(wgpu::SurfaceError::OutOfMemory),
            FrameError::OutOfMemory
        );
    }

    #[test]
    fn default_options_prefer_vsync() {
        let options = ContextOptions::default();
        assert!(options.vsync);
        assert_eq!(options.power, PowerPreference::Low);
    }
}
