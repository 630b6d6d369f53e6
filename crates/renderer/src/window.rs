use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Result};
use catalog::{ShaderDescriptor, ShaderSourceProvider};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, info, warn};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy};
use winit::window::{Window, WindowBuilder};

use crate::background::ImageProvider;
use crate::compositor::{CompositingRenderer, FrameOutcome};
use crate::gpu::{ContextOptions, WgpuBackend};
use crate::runtime::{ConfigHandle, FramePacer};
use crate::types::FrameError;

#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub title: String,
    pub size: (u32, u32),
    pub fps: f32,
    pub context: ContextOptions,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: "layershade".into(),
            size: (1280, 720),
            fps: crate::runtime::DEFAULT_FPS,
            context: ContextOptions::default(),
        }
    }
}

/// Everything the render thread needs to build its renderer.
pub struct RenderSetup {
    pub descriptors: Vec<ShaderDescriptor>,
    pub provider: Arc<dyn ShaderSourceProvider>,
    pub images: Option<Arc<dyn ImageProvider>>,
    pub config: ConfigHandle,
}

#[derive(Debug, Clone, Copy)]
enum WindowCommand {
    Shutdown,
}

/// A preview window driven by its own render thread.
///
/// The thread owns the event loop, the window and the renderer. It exits when
/// the window closes or `shutdown` is called, releasing the renderer first.
pub struct WindowRuntime {
    proxy: EventLoopProxy<WindowCommand>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl WindowRuntime {
    pub fn spawn(options: WindowOptions, setup: RenderSetup) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("layershade-render".into())
            .spawn(move || run_window_thread(options, setup, ready_tx))
            .map_err(|err| anyhow!("failed to spawn render thread: {err}"))?;

        let proxy = ready_rx
            .recv()
            .map_err(|err| anyhow!("render thread failed to initialise: {err}"))??;

        Ok(Self {
            proxy,
            join_handle: Some(handle),
        })
    }

    /// True once the render thread has exited, e.g. after the window closed.
    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Blocks until the window closes on its own.
    pub fn wait(mut self) -> Result<()> {
        self.join()
    }

    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.proxy.send_event(WindowCommand::Shutdown);
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        match self.join_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|err| anyhow!("render thread panicked: {err:?}"))?,
            None => Ok(()),
        }
    }
}

impl Drop for WindowRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.proxy.send_event(WindowCommand::Shutdown);
            let _ = handle.join();
        }
    }
}

/// Maps a cursor position inside a `size` window to a parallax offset in
/// [-1, 1] on both axes, centred on the middle of the window.
pub fn parallax_from_cursor(position: (f64, f64), size: (u32, u32)) -> [f32; 2] {
    let axis = |coordinate: f64, extent: u32| -> f32 {
        if extent == 0 {
            return 0.0;
        }
        ((coordinate / f64::from(extent)) * 2.0 - 1.0).clamp(-1.0, 1.0) as f32
    };
    [axis(position.0, size.0), axis(position.1, size.1)]
}

// Field order matters: the renderer holds a surface created from the window
// and must drop first.
struct WindowHost {
    renderer: CompositingRenderer<WgpuBackend>,
    window: Arc<Window>,
    pacer: FramePacer,
    failure: Option<FrameError>,
}

impl WindowHost {
    fn redraw(&mut self) -> bool {
        match self.renderer.draw_frame() {
            Ok(FrameOutcome::Presented(stats)) => {
                tracing::trace!(
                    drawn = stats.layers_drawn,
                    skipped = stats.layers_skipped,
                    "frame presented"
                );
                self.pacer.mark(Instant::now());
                true
            }
            Ok(FrameOutcome::NotReady) => true,
            Err(FrameError::Outdated) => {
                let size = self.window.inner_size();
                self.renderer.resize(size.width, size.height);
                true
            }
            Err(err) if err.is_transient() => {
                warn!(error = %err, "skipping frame");
                true
            }
            Err(err) => {
                error!(error = %err, "presentation failed; closing window");
                self.failure = Some(err);
                false
            }
        }
    }

    fn cursor_moved(&self, position: PhysicalPosition<f64>) {
        let size = self.window.inner_size();
        let [x, y] = parallax_from_cursor((position.x, position.y), (size.width, size.height));
        self.renderer.set_parallax(x, y);
    }
}

fn run_window_thread(
    options: WindowOptions,
    setup: RenderSetup,
    ready_tx: Sender<Result<EventLoopProxy<WindowCommand>>>,
) -> Result<()> {
    let mut builder = EventLoopBuilder::<WindowCommand>::with_user_event();
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    }

    let (event_loop, mut host) = match build_host(&options, setup, builder) {
        Ok(parts) => parts,
        Err(err) => {
            let message = format!("{err:#}");
            let _ = ready_tx.send(Err(anyhow!(message)));
            return Err(err);
        }
    };
    let _ = ready_tx.send(Ok(event_loop.create_proxy()));
    info!(title = %options.title, "preview window running");

    let run_result = event_loop.run(|event, elwt| match event {
        Event::UserEvent(WindowCommand::Shutdown) => elwt.exit(),
        Event::WindowEvent { window_id, event } if window_id == host.window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::Resized(size) => host.renderer.resize(size.width, size.height),
            WindowEvent::CursorMoved { position, .. } => host.cursor_moved(position),
            WindowEvent::RedrawRequested => {
                if !host.redraw() {
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if host.pacer.ready(now) {
                host.window.request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            } else if let Some(deadline) = host.pacer.next_deadline() {
                elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
            } else {
                elwt.set_control_flow(ControlFlow::Wait);
            }
        }
        Event::LoopExiting => {
            debug!("event loop exiting; releasing renderer");
            host.renderer.release();
        }
        _ => {}
    });

    host.renderer.release();
    if let Err(err) = run_result {
        return Err(anyhow!("window event loop error: {err}"));
    }
    match host.failure.take() {
        Some(err) => Err(anyhow!("render thread stopped: {err}")),
        None => Ok(()),
    }
}

fn build_host(
    options: &WindowOptions,
    setup: RenderSetup,
    mut builder: EventLoopBuilder<WindowCommand>,
) -> Result<(winit::event_loop::EventLoop<WindowCommand>, WindowHost)> {
    let event_loop = builder
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let window = WindowBuilder::new()
        .with_title(options.title.clone())
        .with_inner_size(PhysicalSize::new(options.size.0, options.size.1))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);
    let size = window.inner_size();

    let backend = WgpuBackend::for_window(window.as_ref(), (size.width, size.height), options.context)?;
    let RenderSetup {
        descriptors,
        provider,
        images,
        config,
    } = setup;
    let mut renderer = CompositingRenderer::new(backend, provider, config).with_shaders(descriptors);
    if let Some(images) = images {
        renderer = renderer.with_image_provider(images);
    }
    renderer
        .create()
        .map_err(|err| anyhow!("failed to initialise renderer: {err}"))?;
    renderer.resize(size.width, size.height);

    Ok((
        event_loop,
        WindowHost {
            renderer,
            window,
            pacer: FramePacer::new(options.fps),
            failure: None,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_maps_to_unit_square() {
        assert_eq!(parallax_from_cursor((0.0, 0.0), (200, 100)), [-1.0, -1.0]);
        assert_eq!(parallax_from_cursor((100.0, 50.0), (200, 100)), [0.0, 0.0]);
        assert_eq!(parallax_from_cursor((200.0, 100.0), (200, 100)), [1.0, 1.0]);
    }

    #[test]
    fn cursor_outside_window_is_clamped() {
        assert_eq!(parallax_from_cursor((-50.0, 500.0), (200, 100)), [-1.0, 1.0]);
        assert_eq!(parallax_from_cursor((10.0, 10.0), (0, 0)), [0.0, 0.0]);
    }
}
