// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The Wayland side of the embedder: globals, the toplevel window, input
//! devices, and everything that has to be released again on the way out.

use std::io;
use std::mem;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use calloop::LoopHandle;
use calloop::RegistrationToken;
use calloop::timer::TimeoutAction;
use calloop::timer::Timer;
use smithay_client_toolkit::compositor::CompositorState;
use smithay_client_toolkit::output::OutputState;
use smithay_client_toolkit::reexports::client::ConnectError;
use smithay_client_toolkit::reexports::client::Connection;
use smithay_client_toolkit::reexports::client::EventQueue;
use smithay_client_toolkit::reexports::client::Proxy;
use smithay_client_toolkit::reexports::client::QueueHandle;
use smithay_client_toolkit::reexports::client::globals::GlobalList;
use smithay_client_toolkit::reexports::client::protocol::wl_keyboard::WlKeyboard;
use smithay_client_toolkit::reexports::client::protocol::wl_output::WlOutput;
use smithay_client_toolkit::reexports::client::protocol::wl_pointer::WlPointer;
use smithay_client_toolkit::reexports::client::protocol::wl_seat::WlSeat;
use smithay_client_toolkit::reexports::protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibit_manager_v1::ZwpKeyboardShortcutsInhibitManagerV1;
use smithay_client_toolkit::reexports::protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibitor_v1::ZwpKeyboardShortcutsInhibitorV1;
use smithay_client_toolkit::reexports::protocols::wp::presentation_time::client::wp_presentation::WpPresentation;
use smithay_client_toolkit::registry::RegistryState;
use smithay_client_toolkit::seat::SeatState;
use smithay_client_toolkit::shell::WaylandSurface;
use smithay_client_toolkit::shell::xdg::XdgShell;
use smithay_client_toolkit::shell::xdg::window::Window;
use smithay_client_toolkit::shell::xdg::window::WindowDecorations;

use crate::egl::EglError;
use crate::egl::EglSurfaceManager;
use crate::engine::Engine;
use crate::engine::EngineHost;
use crate::engine::RenderDelegate;
use crate::engine::WindowMetrics;
use crate::input::InputRouter;
use crate::input::RepeatCommand;
use crate::input::ir::IrSource;
use crate::pacer;
use crate::pacer::BatonSlot;
use crate::pacer::FramePacer;
use crate::prelude::*;

mod handlers;
pub mod output;
pub mod teardown;

use output::OutputGeometry;
use output::OutputMode;
use teardown::TeardownStack;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("compositor does not offer {0}")]
    MissingInterface(&'static str),
    #[error("could not connect to the compositor: {0}")]
    ConnectionRefused(String),
    #[error("could not allocate the native window")]
    SurfaceAllocationFailed,
}

fn connection_error(err: ConnectError) -> SessionError {
    match err {
        // The usual cause is running outside of a Wayland session.
        ConnectError::NoCompositor => SessionError::ConnectionRefused(format!(
            "{err}, make sure WAYLAND_DISPLAY points at a running compositor"
        )),
        err => SessionError::ConnectionRefused(err.to_string()),
    }
}

pub fn connect_to_compositor() -> Result<Connection> {
    Connection::connect_to_env()
        .map_err(connection_error)
        .location(loc!())
}

#[derive(Debug)]
pub struct SessionOptions {
    pub title: String,
    pub app_id: String,
    pub size: (u32, u32),
    /// Grab system shortcuts for the window.
    pub primary_ui: bool,
    pub key_event_channel: String,
    pub ir: Option<IrSource>,
}

fn require_global(globals: &GlobalList, interface: &'static str) -> Result<(), SessionError> {
    let present = globals
        .contents()
        .with_list(|list| list.iter().any(|g| g.interface == interface));
    if present {
        Ok(())
    } else {
        Err(SessionError::MissingInterface(interface))
    }
}

type Release = fn(&mut EmbedderState);

/// Teardown entries for the globals `connect` binds, in bind order.
/// wl_compositor has no destructor request.
fn global_releases(presentation: bool, inhibit_manager: bool) -> Vec<(&'static str, Release)> {
    let mut releases: Vec<(&'static str, Release)> = vec![
        ("xdg_wm_base", EmbedderState::release_xdg_wm_base),
        ("wl_seat", EmbedderState::release_seats),
        ("wl_output", EmbedderState::release_outputs),
    ];
    if presentation {
        releases.push(("wp_presentation", EmbedderState::release_presentation));
    }
    if inhibit_manager {
        releases.push((
            "zwp_keyboard_shortcuts_inhibit_manager_v1",
            EmbedderState::release_inhibit_manager,
        ));
    }
    releases
}

pub struct EmbedderState {
    pub(crate) conn: Connection,
    pub(crate) qh: QueueHandle<Self>,
    pub(crate) loop_handle: LoopHandle<'static, Self>,

    pub(crate) registry_state: RegistryState,
    pub(crate) seat_state: SeatState,
    pub(crate) output_state: OutputState,
    pub(crate) compositor_state: CompositorState,
    pub(crate) xdg_shell: XdgShell,
    pub(crate) presentation: Option<WpPresentation>,
    pub(crate) inhibit_manager: Option<ZwpKeyboardShortcutsInhibitManagerV1>,

    pub(crate) window: Option<Window>,
    pub(crate) output: Option<WlOutput>,
    pub(crate) keyboards: Vec<(WlSeat, WlKeyboard)>,
    pub(crate) pointers: Vec<(WlSeat, WlPointer)>,
    pub(crate) inhibitors: Vec<ZwpKeyboardShortcutsInhibitorV1>,
    pub(crate) egl: Option<Arc<EglSurfaceManager>>,

    pub(crate) geometry: OutputGeometry,
    pub(crate) pacer: FramePacer,
    pub(crate) input: InputRouter,
    pub(crate) engine: EngineHost,
    repeat_timer: Option<RegistrationToken>,
    teardown: TeardownStack<Self>,
    configured: bool,
    stopping: bool,
}

impl EmbedderState {
    /// Binds the globals and creates the window along with its EGL surfaces.
    #[instrument(skip_all, level = "debug")]
    pub fn connect(
        conn: Connection,
        globals: &GlobalList,
        qh: QueueHandle<Self>,
        loop_handle: LoopHandle<'static, Self>,
        slot: Arc<BatonSlot>,
        options: SessionOptions,
    ) -> Result<Self> {
        let compositor_state = CompositorState::bind(globals, &qh)
            .map_err(|_| SessionError::MissingInterface("wl_compositor"))
            .location(loc!())?;
        let xdg_shell = XdgShell::bind(globals, &qh)
            .map_err(|_| SessionError::MissingInterface("xdg_wm_base"))
            .location(loc!())?;
        require_global(globals, "wl_seat").location(loc!())?;
        require_global(globals, "wl_output").location(loc!())?;

        let presentation = globals
            .bind::<WpPresentation, _, _>(&qh, 1..=1, ())
            .context(loc!(), "wp_presentation is not available, pacing from frame callbacks")
            .warn(loc!())
            .ok();
        let inhibit_manager = if options.primary_ui {
            globals
                .bind::<ZwpKeyboardShortcutsInhibitManagerV1, _, _>(&qh, 1..=1, ())
                .context(loc!(), "keyboard shortcuts inhibitor is not available")
                .warn(loc!())
                .ok()
        } else {
            None
        };

        let (width, height) = options.size;
        let mut state = Self {
            conn,
            qh: qh.clone(),
            loop_handle,
            registry_state: RegistryState::new(globals),
            seat_state: SeatState::new(globals, &qh),
            output_state: OutputState::new(globals, &qh),
            compositor_state,
            xdg_shell,
            presentation,
            inhibit_manager,
            window: None,
            output: None,
            keyboards: Vec::new(),
            pointers: Vec::new(),
            inhibitors: Vec::new(),
            egl: None,
            geometry: OutputGeometry::new(width, height),
            pacer: FramePacer::new(slot),
            input: InputRouter::new(options.ir),
            engine: EngineHost::new(options.key_event_channel),
            repeat_timer: None,
            teardown: TeardownStack::new(),
            configured: false,
            stopping: false,
        };
        state
            .engine
            .set_window_metrics(WindowMetrics::from_size(width, height));

        for (name, release) in global_releases(
            state.presentation.is_some(),
            state.inhibit_manager.is_some(),
        ) {
            state.teardown.push(name, release);
        }

        let surface = state.compositor_state.create_surface(&qh);
        let window = state
            .xdg_shell
            .create_window(surface, WindowDecorations::None, &qh);
        window.set_title(options.title);
        window.set_app_id(options.app_id);
        window.commit();
        state.window = Some(window);
        state.teardown.push("window", |s: &mut Self| {
            s.window.take();
        });

        state
            .teardown
            .push("input devices", Self::release_input_devices);

        let egl = {
            let surface = state
                .window
                .as_ref()
                .map(|w| w.wl_surface().clone())
                .context(loc!(), "window vanished")?;
            EglSurfaceManager::new(&state.conn, &surface, width, height).map_err(
                |err| -> anyhow::Error {
                    match err {
                        EglError::NativeWindow(e) => {
                            anyhow::Error::new(e).context(SessionError::SurfaceAllocationFailed)
                        },
                        err => err.into(),
                    }
                },
            )?
        };
        state.egl = Some(Arc::new(egl));
        state.teardown.push("egl", |s: &mut Self| {
            s.egl.take();
        });

        info!("window {width}x{height} created");
        Ok(state)
    }

    /// Blocks until the compositor has configured the window.
    pub fn wait_for_configure(&mut self, queue: &mut EventQueue<Self>) -> Result<()> {
        while !self.configured {
            queue.blocking_dispatch(self).location(loc!())?;
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn render_delegate(&self) -> Result<Arc<dyn RenderDelegate>> {
        let egl = self.egl.clone().context(loc!(), "EGL is not set up")?;
        Ok(egl)
    }

    pub fn attach_engine(&mut self, engine: Box<dyn Engine>) -> Result<()> {
        self.engine.attach(engine).location(loc!())
    }

    pub fn stop(&mut self) {
        if !self.stopping {
            info!("stopping");
        }
        self.stopping = true;
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.geometry.screen_size()
    }

    /// Where shell configures and output modes converge: resize the native
    /// window and tell the engine, or hold the metrics until it starts.
    pub fn apply_screen_size(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("ignoring degenerate size {width}x{height}");
            return;
        }
        if !self.geometry.set_screen_size(width, height) {
            return;
        }
        if let Some(egl) = &self.egl {
            egl.resize(width, height);
        }
        self.engine
            .set_window_metrics(WindowMetrics::from_size(width, height));
        if self.engine.is_started() {
            self.engine.flush_metrics().log_and_ignore(loc!());
        } else {
            debug!("engine not started, buffering {width}x{height}");
        }
    }

    pub(crate) fn on_configure(&mut self, width: Option<u32>, height: Option<u32>) {
        self.configured = true;
        match (width, height) {
            (Some(width), Some(height)) => self.apply_screen_size(width, height),
            _ => debug!("configure left the size to us"),
        }
    }

    pub(crate) fn on_output_mode(&mut self, mode: OutputMode) {
        info!(
            "output mode {}x{} @ {}mHz",
            mode.width, mode.height, mode.refresh_mhz
        );
        self.pacer.set_refresh_mhz(mode.refresh_mhz);
        self.apply_screen_size(mode.width, mode.height);
    }

    pub(crate) fn refresh_output(&mut self, output: &WlOutput) {
        if self.output.as_ref() != Some(output) {
            return;
        }
        let Some(info) = self.output_state.info(output) else {
            return;
        };
        self.geometry
            .set_physical_mm(info.physical_size.0, info.physical_size.1);
        let Some(mode) = OutputMode::current(&info) else {
            return;
        };
        if let Some(mode) = self.geometry.apply_mode(mode) {
            self.on_output_mode(mode);
        }
    }

    /// The engine asked for a frame. Errors talking to the self-pipe are
    /// returned; everything else is logged.
    pub fn on_vsync_wakeup(&mut self, wakeups: &UnixStream) -> io::Result<()> {
        pacer::drain_wakeups(wakeups)?;
        self.request_frame_timing();
        let now = self.engine.now_ns();
        if let Some(reply) = self.pacer.on_wakeup(now) {
            self.engine.on_vsync(reply).log_and_ignore(loc!());
        }
        Ok(())
    }

    /// Asks to hear about the next presented frame, through presentation
    /// feedback when the compositor has it and a frame callback otherwise.
    fn request_frame_timing(&mut self) {
        let Some(window) = &self.window else {
            return;
        };
        let surface = window.wl_surface();
        match &self.presentation {
            Some(presentation) => {
                presentation.feedback(surface, &self.qh, ());
            },
            None => {
                surface.frame(&self.qh, surface.clone());
            },
        }
    }

    pub(crate) fn apply_repeat(&mut self, command: RepeatCommand) {
        match command {
            RepeatCommand::Keep => {},
            RepeatCommand::Cancel => self.cancel_repeat(),
            RepeatCommand::Arm { delay, interval } => {
                self.cancel_repeat();
                debug!("arming repeat: delay {delay:?}, interval {interval:?}");
                match self
                    .loop_handle
                    .insert_source(Timer::from_duration(delay), |_, _, state| {
                        state.on_repeat_tick()
                    }) {
                    Ok(token) => self.repeat_timer = Some(token),
                    Err(e) => error!("insert_source(repeat timer) failed: {e:?}"),
                }
            },
        }
    }

    pub fn on_repeat_tick(&mut self) -> TimeoutAction {
        match self.input.repeat_tick() {
            Some(interval) => TimeoutAction::ToDuration(interval),
            None => {
                self.repeat_timer = None;
                TimeoutAction::Drop
            },
        }
    }

    pub fn cancel_repeat(&mut self) {
        if let Some(token) = self.repeat_timer.take() {
            self.loop_handle.remove(token);
        }
    }

    pub fn drain_ir(&mut self) {
        let command = self.input.pump_ir();
        self.apply_repeat(command);
    }

    /// Runs once per loop iteration: window metrics first, then input in
    /// arrival order.
    pub fn flush_to_engine(&mut self) {
        self.engine.flush_metrics().log_and_ignore(loc!());
        for event in self.input.drain() {
            self.engine.send_input(event).log_and_ignore(loc!());
        }
    }

    fn release_xdg_wm_base(&mut self) {
        self.xdg_shell.xdg_wm_base().destroy();
    }

    fn release_seats(&mut self) {
        for seat in self.seat_state.seats() {
            if seat.version() >= 5 {
                seat.release();
            }
        }
    }

    fn release_outputs(&mut self) {
        self.output = None;
        for output in self.output_state.outputs() {
            if output.version() >= 3 {
                output.release();
            }
        }
    }

    fn release_presentation(&mut self) {
        if let Some(presentation) = self.presentation.take() {
            presentation.destroy();
        }
    }

    fn release_inhibit_manager(&mut self) {
        if let Some(manager) = self.inhibit_manager.take() {
            manager.destroy();
        }
    }

    fn release_input_devices(&mut self) {
        for inhibitor in self.inhibitors.drain(..) {
            inhibitor.destroy();
        }
        for (_, keyboard) in self.keyboards.drain(..) {
            if keyboard.version() >= 3 {
                keyboard.release();
            }
        }
        for (_, pointer) in self.pointers.drain(..) {
            if pointer.version() >= 3 {
                pointer.release();
            }
        }
    }

    /// Shuts the engine down, then releases everything in reverse order of
    /// acquisition.
    pub fn teardown(&mut self) {
        self.cancel_repeat();
        self.engine.shutdown();
        let stack = mem::take(&mut self.teardown);
        stack.unwind(self);
        self.conn.flush().log_and_ignore(loc!());
        info!("session torn down");
    }
}
