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

//! Handlers for events from smithay client toolkit and the protocols it
//! doesn't wrap.

use smithay_client_toolkit::compositor::CompositorHandler;
use smithay_client_toolkit::output::OutputHandler;
use smithay_client_toolkit::output::OutputState;
use smithay_client_toolkit::reexports::client::Connection;
use smithay_client_toolkit::reexports::client::Dispatch;
use smithay_client_toolkit::reexports::client::Proxy;
use smithay_client_toolkit::reexports::client::QueueHandle;
use smithay_client_toolkit::reexports::client::WEnum;
use smithay_client_toolkit::reexports::client::protocol::wl_keyboard;
use smithay_client_toolkit::reexports::client::protocol::wl_keyboard::WlKeyboard;
use smithay_client_toolkit::reexports::client::protocol::wl_output::Transform;
use smithay_client_toolkit::reexports::client::protocol::wl_output::WlOutput;
use smithay_client_toolkit::reexports::client::protocol::wl_pointer::WlPointer;
use smithay_client_toolkit::reexports::client::protocol::wl_seat::WlSeat;
use smithay_client_toolkit::reexports::client::protocol::wl_surface::WlSurface;
use smithay_client_toolkit::reexports::protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibit_manager_v1;
use smithay_client_toolkit::reexports::protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibit_manager_v1::ZwpKeyboardShortcutsInhibitManagerV1;
use smithay_client_toolkit::reexports::protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibitor_v1;
use smithay_client_toolkit::reexports::protocols::wp::keyboard_shortcuts_inhibit::zv1::client::zwp_keyboard_shortcuts_inhibitor_v1::ZwpKeyboardShortcutsInhibitorV1;
use smithay_client_toolkit::reexports::protocols::wp::presentation_time::client::wp_presentation;
use smithay_client_toolkit::reexports::protocols::wp::presentation_time::client::wp_presentation::WpPresentation;
use smithay_client_toolkit::reexports::protocols::wp::presentation_time::client::wp_presentation_feedback;
use smithay_client_toolkit::reexports::protocols::wp::presentation_time::client::wp_presentation_feedback::WpPresentationFeedback;
use smithay_client_toolkit::registry::ProvidesRegistryState;
use smithay_client_toolkit::registry::RegistryState;
use smithay_client_toolkit::registry_handlers;
use smithay_client_toolkit::seat::Capability;
use smithay_client_toolkit::seat::SeatHandler;
use smithay_client_toolkit::seat::SeatState;
use smithay_client_toolkit::seat::pointer::PointerEvent;
use smithay_client_toolkit::seat::pointer::PointerEventKind;
use smithay_client_toolkit::seat::pointer::PointerHandler;
use smithay_client_toolkit::shell::WaylandSurface;
use smithay_client_toolkit::shell::xdg::window::Window;
use smithay_client_toolkit::shell::xdg::window::WindowConfigure;
use smithay_client_toolkit::shell::xdg::window::WindowHandler;

use crate::config;
use crate::prelude::*;
use crate::session::EmbedderState;

impl CompositorHandler for EmbedderState {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &WlSurface,
        new_factor: i32,
    ) {
        // Pixel ratio stays 1.0; the engine lays out in physical pixels.
        debug!("ignoring scale factor {new_factor}");
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &WlSurface,
        _new_transform: Transform,
    ) {
    }

    /// Only requested when wp_presentation is missing.
    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &WlSurface,
        _time: u32,
    ) {
        let now = self.engine.now_ns();
        self.pacer.on_frame_done(now);
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &WlSurface,
        _output: &WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &WlSurface,
        _output: &WlOutput,
    ) {
    }
}

impl OutputHandler for EmbedderState {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, output: WlOutput) {
        if self.output.is_some() {
            debug!("ignoring additional output {:?}", output.id());
            return;
        }
        self.output = Some(output.clone());
        self.refresh_output(&output);
    }

    fn update_output(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, output: WlOutput) {
        self.refresh_output(&output);
    }

    fn output_destroyed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, output: WlOutput) {
        if self.output.as_ref() == Some(&output) {
            warn!("output went away");
            self.output = None;
        }
    }
}

impl WindowHandler for EmbedderState {
    fn request_close(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &Window) {
        info!("compositor closed the window");
        self.stop();
    }

    #[instrument(skip_all, level = "debug")]
    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _window: &Window,
        configure: WindowConfigure,
        _serial: u32,
    ) {
        let (width, height) = configure.new_size;
        self.on_configure(width.map(|w| w.get()), height.map(|h| h.get()));
    }
}

impl SeatHandler for EmbedderState {
    fn seat_state(&mut self) -> &mut SeatState {
        &mut self.seat_state
    }

    fn new_seat(&mut self, _: &Connection, _: &QueueHandle<Self>, _: WlSeat) {}

    fn new_capability(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        seat: WlSeat,
        capability: Capability,
    ) {
        match capability {
            Capability::Keyboard => {
                debug!("set keyboard capability");
                self.keyboards.push((seat.clone(), seat.get_keyboard(qh, ())));
                if let (Some(manager), Some(window)) = (&self.inhibit_manager, &self.window) {
                    self.inhibitors.push(manager.inhibit_shortcuts(
                        window.wl_surface(),
                        &seat,
                        qh,
                        (),
                    ));
                }
            },
            Capability::Pointer => {
                debug!("set pointer capability");
                let pointer = log_and_return!(
                    self.seat_state
                        .get_pointer(qh, &seat)
                        .context(loc!(), "failed to create pointer")
                );
                self.pointers.push((seat, pointer));
            },
            _ => {},
        }
    }

    fn remove_capability(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        seat: WlSeat,
        capability: Capability,
    ) {
        match capability {
            Capability::Keyboard => {
                let cmd = self.input.keyboard_leave();
                self.apply_repeat(cmd);
                self.keyboards.retain(|(owner, keyboard)| {
                    if *owner != seat {
                        return true;
                    }
                    if keyboard.version() >= 3 {
                        keyboard.release();
                    }
                    false
                });
            },
            Capability::Pointer => {
                self.input.pointer_leave();
                self.pointers.retain(|(owner, pointer)| {
                    if *owner != seat {
                        return true;
                    }
                    if pointer.version() >= 3 {
                        pointer.release();
                    }
                    false
                });
            },
            _ => {},
        }
    }

    fn remove_seat(&mut self, _: &Connection, _: &QueueHandle<Self>, _: WlSeat) {}
}

impl PointerHandler for EmbedderState {
    #[instrument(skip(self, _conn, _qh, _pointer), level = "debug")]
    fn pointer_frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _pointer: &WlPointer,
        events: &[PointerEvent],
    ) {
        let Some(window) = &self.window else {
            return;
        };
        let ours = window.wl_surface().clone();
        for event in events.iter().filter(|e| e.surface == ours) {
            let (x, y) = event.position;
            match event.kind {
                PointerEventKind::Enter { .. } | PointerEventKind::Motion { .. } => {
                    self.input.pointer_motion(x, y);
                },
                PointerEventKind::Press { time, button, .. } => {
                    self.input.pointer_motion(x, y);
                    self.input.pointer_button(time, button, true);
                },
                PointerEventKind::Release { time, button, .. } => {
                    self.input.pointer_motion(x, y);
                    self.input.pointer_button(time, button, false);
                },
                PointerEventKind::Leave { .. } => self.input.pointer_leave(),
                _ => {},
            }
        }
    }
}

impl Dispatch<WlKeyboard, ()> for EmbedderState {
    fn event(
        state: &mut Self,
        _keyboard: &WlKeyboard,
        event: wl_keyboard::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_keyboard::Event::Keymap { format, fd, size } => match format {
                WEnum::Value(wl_keyboard::KeymapFormat::XkbV1) => {
                    if state.input.load_keymap(fd, size).log(loc!()).is_err() {
                        state.input.clear_keymap();
                    }
                },
                format => {
                    warn!("keymap format {format:?} is not xkb, translating without a keymap");
                    state.input.clear_keymap();
                },
            },
            wl_keyboard::Event::Enter { .. } => {
                debug!("keyboard focus entered");
            },
            wl_keyboard::Event::Leave { .. } => {
                debug!("keyboard focus left");
                let cmd = state.input.keyboard_leave();
                state.apply_repeat(cmd);
            },
            wl_keyboard::Event::Key {
                key,
                state: key_state,
                ..
            } => {
                let pressed = match key_state {
                    WEnum::Value(wl_keyboard::KeyState::Pressed) => true,
                    WEnum::Value(wl_keyboard::KeyState::Released) => false,
                    other => {
                        debug!("ignoring key state {other:?}");
                        return;
                    },
                };
                if config::get_log_priv_data() {
                    debug!("wl_keyboard key {key} pressed={pressed}");
                }
                let cmd = state.input.keyboard_key(key, pressed);
                state.apply_repeat(cmd);
            },
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => {
                state
                    .input
                    .update_modifiers(mods_depressed, mods_latched, mods_locked, group);
            },
            wl_keyboard::Event::RepeatInfo { rate, delay } => {
                debug!("repeat info: rate {rate}, delay {delay}");
                state.input.set_repeat_info(rate, delay);
            },
            _ => {},
        }
    }
}

impl Dispatch<WpPresentation, ()> for EmbedderState {
    fn event(
        state: &mut Self,
        _presentation: &WpPresentation,
        event: wp_presentation::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wp_presentation::Event::ClockId { clk_id } = event {
            debug!("presentation clock {clk_id}");
            state.pacer.set_clock_id(clk_id);
        }
    }
}

impl Dispatch<WpPresentationFeedback, ()> for EmbedderState {
    fn event(
        state: &mut Self,
        _feedback: &WpPresentationFeedback,
        event: wp_presentation_feedback::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wp_presentation_feedback::Event::Presented {
                tv_sec_hi,
                tv_sec_lo,
                tv_nsec,
                refresh,
                ..
            } => state
                .pacer
                .on_presented(tv_sec_hi, tv_sec_lo, tv_nsec, refresh),
            wp_presentation_feedback::Event::Discarded => trace!("frame discarded"),
            _ => {},
        }
    }
}

impl Dispatch<ZwpKeyboardShortcutsInhibitManagerV1, ()> for EmbedderState {
    fn event(
        _state: &mut Self,
        _manager: &ZwpKeyboardShortcutsInhibitManagerV1,
        _event: zwp_keyboard_shortcuts_inhibit_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwpKeyboardShortcutsInhibitorV1, ()> for EmbedderState {
    fn event(
        _state: &mut Self,
        _inhibitor: &ZwpKeyboardShortcutsInhibitorV1,
        event: zwp_keyboard_shortcuts_inhibitor_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwp_keyboard_shortcuts_inhibitor_v1::Event::Active => {
                info!("system shortcuts inhibited")
            },
            zwp_keyboard_shortcuts_inhibitor_v1::Event::Inactive => {
                warn!("compositor lifted the shortcuts inhibitor")
            },
            _ => {},
        }
    }
}

smithay_client_toolkit::delegate_compositor!(EmbedderState);
smithay_client_toolkit::delegate_output!(EmbedderState);
smithay_client_toolkit::delegate_pointer!(EmbedderState);
smithay_client_toolkit::delegate_registry!(EmbedderState);
smithay_client_toolkit::delegate_seat!(EmbedderState);
smithay_client_toolkit::delegate_xdg_shell!(EmbedderState);
smithay_client_toolkit::delegate_xdg_window!(EmbedderState);

impl ProvidesRegistryState for EmbedderState {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }
    registry_handlers![OutputState, SeatState,];
}
