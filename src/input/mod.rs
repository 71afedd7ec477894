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

//! Input routing: raw compositor and IR input in, engine-ready key and
//! pointer events out, in arrival order.

use std::cell::Cell;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::time::Duration;

use enum_as_inner::EnumAsInner;

use crate::config;
use crate::prelude::*;

pub mod ir;
pub mod keyboard;
pub mod keys;
pub mod pointer;
pub mod repeat;

use ir::IrSource;
use keyboard::KeyboardState;
use pointer::PointerState;
use repeat::RepeatAction;
use repeat::RepeatController;
use repeat::RepeatInfo;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub logo: bool,
    pub caps_lock: bool,
    pub num_lock: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyPhase {
    Down,
    Up,
}

/// Where a key event came from. Repeat is tracked per source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputSourceTag {
    Keyboard,
    Ir,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyEvent {
    pub phase: KeyPhase,
    pub evdev: u32,
    /// evdev + 8, or 0 when no keymap is loaded.
    pub xkb_keycode: u32,
    /// 0 when the key produces no character.
    pub utf32: u32,
    pub modifiers: Modifiers,
    pub source: InputSourceTag,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PointerPhase {
    Down,
    Up,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub timestamp_us: u64,
    pub x: f64,
    pub y: f64,
    pub device: i32,
    /// Engine button bits held after this event.
    pub buttons: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, EnumAsInner)]
pub enum InputEvent {
    Key(KeyEvent),
    Pointer(PointerEvent),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sequenced<T> {
    pub seq: u64,
    pub event: T,
}

/// Stamps events from every source so they can be merged back into arrival
/// order. Shared by the sources of one router.
#[derive(Clone, Debug, Default)]
pub struct EventSequence(Rc<Cell<u64>>);

impl EventSequence {
    pub fn next(&self) -> u64 {
        let seq = self.0.get();
        self.0.set(seq + 1);
        seq
    }

    pub fn stamp<T>(&self, event: T) -> Sequenced<T> {
        Sequenced {
            seq: self.next(),
            event,
        }
    }
}

/// A producer of input. Drained by the reactor after its wakeup fires.
pub trait InputSource {
    type Event;

    fn drain(&mut self) -> Vec<Sequenced<Self::Event>>;
}

/// What the caller must do with the repeat timer after an input event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RepeatCommand {
    Keep,
    Arm { delay: Duration, interval: Duration },
    Cancel,
}

impl RepeatCommand {
    /// Folds two commands issued in sequence into their net effect.
    pub fn then(self, next: RepeatCommand) -> RepeatCommand {
        match next {
            RepeatCommand::Keep => self,
            next => next,
        }
    }
}

#[derive(Debug)]
pub struct InputRouter {
    keyboard: KeyboardState,
    pointer: PointerState,
    repeat: RepeatController,
    ir: Option<IrSource>,
}

impl InputRouter {
    pub fn new(ir: Option<IrSource>) -> Self {
        let seq = EventSequence::default();
        Self {
            keyboard: KeyboardState::new(seq.clone()),
            pointer: PointerState::new(seq.clone()),
            ir: ir.map(|ir| ir.with_sequence(seq)),
            repeat: RepeatController::new(),
        }
    }

    pub fn keyboard(&self) -> &KeyboardState {
        &self.keyboard
    }

    pub fn modifiers(&self) -> Modifiers {
        self.keyboard.modifiers()
    }

    pub fn repeat_action(&self) -> Option<RepeatAction> {
        self.repeat.active()
    }

    pub fn load_keymap(&mut self, fd: OwnedFd, size: u32) -> Result<()> {
        self.keyboard.load_keymap(fd, size).location(loc!())
    }

    pub fn clear_keymap(&mut self) {
        self.keyboard.clear_keymap();
    }

    pub fn set_repeat_info(&mut self, rate: i32, delay: i32) {
        self.repeat.set_info(RepeatInfo::from_wayland(rate, delay));
    }

    pub fn update_modifiers(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) {
        self.keyboard
            .update_modifiers(depressed, latched, locked, group);
    }

    pub fn keyboard_key(&mut self, evdev: u32, pressed: bool) -> RepeatCommand {
        let phase = if pressed { KeyPhase::Down } else { KeyPhase::Up };
        self.key(evdev, phase, InputSourceTag::Keyboard)
    }

    pub fn keyboard_leave(&mut self) -> RepeatCommand {
        self.repeat.cancel()
    }

    /// Shared emission path for keyboard and IR keys.
    fn key(&mut self, evdev: u32, phase: KeyPhase, source: InputSourceTag) -> RepeatCommand {
        let event = self.keyboard.translate(evdev, phase, source);
        if config::get_log_priv_data() {
            debug!(
                "{source:?} key {evdev} {phase:?} xkb {} utf32 {:#x}",
                event.xkb_keycode, event.utf32
            );
        }
        self.keyboard.push(event);

        match phase {
            KeyPhase::Down => {
                let repeats = match source {
                    InputSourceTag::Keyboard => self.keyboard.key_repeats(evdev).unwrap_or(false),
                    // Remotes have no keymap of their own.
                    InputSourceTag::Ir => self.keyboard.key_repeats(evdev).unwrap_or(true),
                };
                self.repeat.press(RepeatAction::from_event(&event), repeats)
            },
            KeyPhase::Up => self.repeat.release(evdev, source),
        }
    }

    /// The repeat timer expired. Emits Up then Down for the held key and
    /// returns the interval to re-arm with, or None if nothing is held.
    pub fn repeat_tick(&mut self) -> Option<Duration> {
        let action = self.repeat.active()?;
        let modifiers = self.keyboard.modifiers();
        for phase in [KeyPhase::Up, KeyPhase::Down] {
            self.keyboard.push(action.to_event(phase, modifiers));
        }
        self.repeat.interval()
    }

    pub fn pointer_motion(&mut self, x: f64, y: f64) {
        self.pointer.motion(x, y);
    }

    pub fn pointer_button(&mut self, time_ms: u32, button: u32, pressed: bool) {
        self.pointer.button(time_ms, button, pressed);
    }

    pub fn pointer_leave(&mut self) {
        self.pointer.leave();
        self.keyboard.reset_modifiers();
    }

    /// Pulls queued IR keys through the key path. Returns the net repeat
    /// command.
    pub fn pump_ir(&mut self) -> RepeatCommand {
        let Some(ir) = self.ir.as_mut() else {
            return RepeatCommand::Keep;
        };
        let mut command = RepeatCommand::Keep;
        for Sequenced { event, .. } in ir.drain() {
            let phase = if event.pressed { KeyPhase::Down } else { KeyPhase::Up };
            command = command.then(self.key(event.evdev, phase, InputSourceTag::Ir));
        }
        command
    }

    /// All pending events from every source, in arrival order.
    pub fn drain(&mut self) -> Vec<InputEvent> {
        let mut events = self.keyboard.drain();
        events.extend(self.pointer.drain());
        events.sort_by_key(|e| e.seq);
        events.into_iter().map(|e| e.event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_events(router: &mut InputRouter) -> Vec<(KeyPhase, u32)> {
        router
            .drain()
            .into_iter()
            .filter_map(|e| e.into_key().ok())
            .map(|k| (k.phase, k.evdev))
            .collect()
    }

    #[test]
    fn held_key_with_keymap_arms_default_repeat() {
        let mut router = InputRouter::new(None);
        router.keyboard.set_keymap(keyboard::test_keymap());

        assert_eq!(
            router.keyboard_key(30, true),
            RepeatCommand::Arm {
                delay: Duration::from_millis(400),
                interval: Duration::from_millis(25),
            }
        );
        let held = router.repeat_action().unwrap();
        assert_eq!((held.evdev, held.xkb_keycode, held.utf32), (30, 38, 0x61));

        assert_eq!(router.repeat_tick(), Some(Duration::from_millis(25)));
        assert_eq!(router.keyboard_key(30, false), RepeatCommand::Cancel);
        assert_eq!(
            key_events(&mut router),
            vec![
                (KeyPhase::Down, 30),
                (KeyPhase::Up, 30),
                (KeyPhase::Down, 30),
                (KeyPhase::Up, 30),
            ]
        );
    }

    #[test]
    fn events_keep_arrival_order_across_sources() {
        let mut router = InputRouter::new(None);
        router.pointer_motion(10.0, 20.0);
        router.keyboard_key(30, true);
        router.pointer_button(5, pointer::BTN_LEFT, true);
        router.keyboard_key(30, false);
        router.pointer_button(6, pointer::BTN_LEFT, false);

        let events = router.drain();
        assert_eq!(events.len(), 4);
        assert!(events[0].is_key());
        assert_eq!(events[1].as_pointer().unwrap().phase, PointerPhase::Down);
        assert_eq!(events[2].as_key().unwrap().phase, KeyPhase::Up);
        assert_eq!(events[3].as_pointer().unwrap().timestamp_us, 6_000);
        assert!(router.drain().is_empty());
    }

    #[test]
    fn no_keymap_keys_are_bare() {
        let mut router = InputRouter::new(None);
        router.update_modifiers(1, 0, 0, 0);
        assert_eq!(router.keyboard_key(30, true), RepeatCommand::Keep);
        let event = *router.drain()[0].as_key().unwrap();
        assert_eq!(
            event,
            KeyEvent {
                phase: KeyPhase::Down,
                evdev: 30,
                xkb_keycode: 0,
                utf32: 0,
                modifiers: Modifiers::default(),
                source: InputSourceTag::Keyboard,
            }
        );
    }

    #[test]
    fn repeat_commands_fold() {
        let arm = RepeatCommand::Arm {
            delay: Duration::from_millis(400),
            interval: Duration::from_millis(25),
        };
        assert_eq!(RepeatCommand::Keep.then(arm), arm);
        assert_eq!(arm.then(RepeatCommand::Keep), arm);
        assert_eq!(arm.then(RepeatCommand::Cancel), RepeatCommand::Cancel);
        assert_eq!(RepeatCommand::Cancel.then(arm), arm);
    }

    #[test]
    fn ir_keys_repeat_without_keymap() {
        let (sender, source, _ping) = ir::ir_channel().unwrap();
        let mut router = InputRouter::new(Some(source));
        sender.send(ir::IrKey::ArrowUp as u32, true);
        let command = router.pump_ir();
        assert_eq!(
            command,
            RepeatCommand::Arm {
                delay: Duration::from_millis(400),
                interval: Duration::from_millis(25),
            }
        );
        assert_eq!(router.repeat_tick(), Some(Duration::from_millis(25)));
        assert_eq!(
            key_events(&mut router),
            vec![
                (KeyPhase::Down, keys::evdev::KEY_UP),
                (KeyPhase::Up, keys::evdev::KEY_UP),
                (KeyPhase::Down, keys::evdev::KEY_UP),
            ]
        );

        sender.send(ir::IrKey::ArrowUp as u32, false);
        assert_eq!(router.pump_ir(), RepeatCommand::Cancel);
        assert_eq!(router.repeat_tick(), None);
    }

    #[test]
    fn unknown_ir_codes_are_dropped() {
        let (sender, source, _ping) = ir::ir_channel().unwrap();
        let mut router = InputRouter::new(Some(source));
        sender.send(0xdead, true);
        assert_eq!(router.pump_ir(), RepeatCommand::Keep);
        assert!(router.drain().is_empty());
        assert!(router.ir.as_ref().unwrap().has_warned_unknown());
    }

    #[test]
    fn keyboard_release_does_not_cancel_ir_repeat() {
        let (sender, source, _ping) = ir::ir_channel().unwrap();
        let mut router = InputRouter::new(Some(source));
        sender.send(ir::IrKey::ArrowDown as u32, true);
        router.pump_ir();
        assert_eq!(router.keyboard_key(keys::evdev::KEY_DOWN, false), RepeatCommand::Keep);
        assert!(router.repeat_action().is_some());
        assert_eq!(router.keyboard_leave(), RepeatCommand::Cancel);
        assert!(router.repeat_action().is_none());
    }

    #[test]
    fn pointer_leave_clears_modifiers() {
        let mut router = InputRouter::new(None);
        router.pointer_leave();
        assert_eq!(router.modifiers(), Modifiers::default());
    }
}
