use anyhow::{Context, Result};
use ctxcue_core::{InputKey, SessionPhase};
use ctxcue_experiment::{Session, SessionError};
use ctxcue_render::{FontArc, FrameContent, FrameStats, SkiaRenderer};
use ctxcue_timing::{HighPrecisionTimer, Timer};
use pixels::{Pixels, SurfaceTexture};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

pub type WindowedSession = Session<HighPrecisionTimer, StdRng>;

pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    session: WindowedSession,
    renderer: Option<SkiaRenderer>,
    font: Option<FontArc>,
    current_size: Option<PhysicalSize<u32>>,
    scale_factor: f64,
    refresh_rate: Option<f64>,
    last_present: Option<u64>,

    should_exit: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    pub fn new(session: WindowedSession, font: Option<FontArc>) -> Self {
        Self {
            window: None,
            pixels: None,
            session,
            renderer: None,
            font,
            current_size: None,
            scale_factor: 1.0,
            refresh_rate: None,
            last_present: None,
            should_exit: false,
            failure: None,
        }
    }

    pub fn run(mut self) -> Result<WindowedSession> {
        let event_loop = EventLoop::new()?;
        tracing::info!(
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            subject = %self.session.subject,
            "starting windowed session"
        );

        event_loop.run_app(&mut self)?;

        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(self.session),
        }
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let primary_monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .context("no monitor available")?;

        self.refresh_rate = primary_monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let window_attributes = Window::default_attributes()
            .with_title("Contextual Cueing with Vibration")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(primary_monitor))))
            .with_resizable(false);

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let physical_size = window.inner_size();
        self.current_size = Some(physical_size);
        self.scale_factor = window.scale_factor();

        tracing::info!(
            width = physical_size.width,
            height = physical_size.height,
            scale = self.scale_factor,
            refresh_hz = self.refresh_rate,
            "display configured"
        );

        let surface_texture =
            SurfaceTexture::new(physical_size.width, physical_size.height, window.clone());
        self.pixels = Some(Pixels::new(
            physical_size.width,
            physical_size.height,
            surface_texture,
        )?);
        self.renderer = Some(SkiaRenderer::new(
            physical_size.width,
            physical_size.height,
            self.session.config.tile_size,
            self.font.take(),
        )?);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let (Some(pixels), Some(renderer)) = (self.pixels.as_mut(), self.renderer.as_mut()) else {
            return Ok(());
        };

        let message = self.session.message();
        let content = FrameContent {
            display: self.session.current_display(),
            trial_state: self.session.current_trial_state(),
            message: message.as_deref(),
        };
        let stats: FrameStats = renderer.render_frame(
            self.session.current_phase(),
            &content,
            pixels.frame_mut(),
            &self.session.timer,
        )?;
        pixels.render()?;

        // Present-to-present intervals feed the display calibration.
        let now = self.session.timer.now();
        if let Some(last) = self.last_present.replace(now) {
            self.session
                .timer
                .record_frame(Duration::from_nanos(now.saturating_sub(last)));
        }

        tracing::trace!(
            clear_ms = stats.clear.as_secs_f64() * 1e3,
            phase_ms = stats.phase.as_secs_f64() * 1e3,
            copy_ms = stats.copy.as_secs_f64() * 1e3,
            total_ms = stats.total.as_secs_f64() * 1e3,
            dirty = stats.dirty_count,
            "frame"
        );
        Ok(())
    }

    fn update(&mut self) -> Result<(), SessionError> {
        // A cue due before the next frame would otherwise fire up to a frame late.
        if let Some(wait) = self.session.cue_due_in().filter(|w| *w < self.frame_period()) {
            self.session.timer.sleep(wait);
        }
        for event in self.session.update() {
            self.session.handle_event(event)?;
        }
        Ok(())
    }

    fn frame_period(&self) -> Duration {
        let hz = self.refresh_rate.filter(|hz| *hz > 0.0).unwrap_or(60.0);
        Duration::from_secs_f64(1.0 / hz)
    }

    fn handle_input(&mut self, key: PhysicalKey, event_loop: &ActiveEventLoop) {
        let PhysicalKey::Code(code) = key else {
            return;
        };
        let key = match code {
            KeyCode::Space => InputKey::Space,
            KeyCode::ArrowLeft => InputKey::Left,
            KeyCode::ArrowRight => InputKey::Right,
            KeyCode::ArrowUp => InputKey::Up,
            KeyCode::Escape => InputKey::Escape,
            _ => return,
        };

        if *self.session.current_phase() == SessionPhase::Debrief
            && matches!(key, InputKey::Space | InputKey::Escape)
        {
            self.cleanup_and_exit(event_loop);
            return;
        }

        if let Err(e) = self.session.handle_key(key) {
            self.fail(e.into(), event_loop);
            return;
        }
        if key == InputKey::Escape {
            self.cleanup_and_exit(event_loop);
        }
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) -> Result<()> {
        self.current_size = Some(new_size);
        if let Some(pixels) = &mut self.pixels {
            pixels.resize_surface(new_size.width, new_size.height)?;
            pixels.resize_buffer(new_size.width, new_size.height)?;
        }
        if let Some(renderer) = &mut self.renderer {
            renderer.resize(new_size.width, new_size.height)?;
        }
        tracing::info!(
            width = new_size.width,
            height = new_size.height,
            "display resized"
        );
        Ok(())
    }

    fn fail(&mut self, error: anyhow::Error, event_loop: &ActiveEventLoop) {
        tracing::error!(error = %error, "session aborted");
        self.failure = Some(error);
        self.cleanup_and_exit(event_loop);
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        if !self.session.is_finished() {
            // Window closed mid-session: finalize what was collected.
            if let Err(e) = self.session.handle_key(InputKey::Escape) {
                tracing::error!(error = %e, "could not finalize interrupted session");
            }
        }
        if let Some(renderer) = &self.renderer {
            if let Some(stats) = renderer.component_stats("phase") {
                tracing::debug!(
                    avg_ms = stats.average_frame_time_ns / 1e6,
                    max_ms = stats.max_frame_time_ns / 1e6,
                    "draw timing"
                );
            }
        }

        self.should_exit = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                self.fail(e.context("failed to create window and surface"), event_loop);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.cleanup_and_exit(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    self.fail(e, event_loop);
                    return;
                }
                if let Err(e) = self.update() {
                    self.fail(e.into(), event_loop);
                    return;
                }
                if let Some(win) = &self.window {
                    win.request_redraw();
                }
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed() && !event.repeat =>
            {
                self.handle_input(event.physical_key, event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = self.handle_resize(size) {
                    self.fail(e, event_loop);
                }
            }
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                self.scale_factor = scale_factor;
                if let Some(size) = self.window.as_ref().map(|w| w.inner_size()) {
                    if let Err(e) = self.handle_resize(size) {
                        self.fail(e, event_loop);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            event_loop.exit();
        }
    }
}
