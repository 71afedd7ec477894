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

//! Client-side key repeat. Wayland leaves repeat to the client; the
//! compositor only tells us the rate and delay.

use std::time::Duration;

use crate::input::InputSourceTag;
use crate::input::KeyEvent;
use crate::input::KeyPhase;
use crate::input::Modifiers;
use crate::input::RepeatCommand;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RepeatInfo {
    /// Repeats per second. 0 disables repeat.
    pub rate: u32,
    pub delay: Duration,
}

impl Default for RepeatInfo {
    fn default() -> Self {
        Self {
            rate: 40,
            delay: Duration::from_millis(400),
        }
    }
}

impl RepeatInfo {
    /// wl_keyboard.repeat_info carries signed values; negative ones are
    /// treated as 0.
    pub fn from_wayland(rate: i32, delay_ms: i32) -> Self {
        Self {
            rate: rate.max(0) as u32,
            delay: Duration::from_millis(delay_ms.max(0) as u64),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.rate != 0).then(|| Duration::from_secs(1) / self.rate)
    }
}

/// The key being repeated, captured when it went down.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RepeatAction {
    pub evdev: u32,
    pub xkb_keycode: u32,
    pub utf32: u32,
    pub source: InputSourceTag,
}

impl RepeatAction {
    pub fn from_event(event: &KeyEvent) -> Self {
        Self {
            evdev: event.evdev,
            xkb_keycode: event.xkb_keycode,
            utf32: event.utf32,
            source: event.source,
        }
    }

    pub fn to_event(&self, phase: KeyPhase, modifiers: Modifiers) -> KeyEvent {
        KeyEvent {
            phase,
            evdev: self.evdev,
            xkb_keycode: self.xkb_keycode,
            utf32: self.utf32,
            modifiers,
            source: self.source,
        }
    }
}

/// Decides when the repeat timer runs. Owns no timer itself; callers apply
/// the returned [`RepeatCommand`] to the event loop.
#[derive(Debug, Default)]
pub struct RepeatController {
    info: RepeatInfo,
    active: Option<RepeatAction>,
}

impl RepeatController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_info(&mut self, info: RepeatInfo) {
        self.info = info;
    }

    pub fn info(&self) -> RepeatInfo {
        self.info
    }

    pub fn active(&self) -> Option<RepeatAction> {
        self.active
    }

    pub fn interval(&self) -> Option<Duration> {
        self.active.and(self.info.interval())
    }

    pub fn press(&mut self, action: RepeatAction, repeats: bool) -> RepeatCommand {
        match self.info.interval() {
            Some(interval) if repeats => {
                self.active = Some(action);
                RepeatCommand::Arm {
                    delay: self.info.delay,
                    interval,
                }
            },
            // A later key from the same source ends the repeat even if it
            // doesn't repeat itself.
            _ if self.active.is_some_and(|a| a.source == action.source) => self.cancel(),
            _ => RepeatCommand::Keep,
        }
    }

    pub fn release(&mut self, evdev: u32, source: InputSourceTag) -> RepeatCommand {
        match self.active {
            Some(a) if a.evdev == evdev && a.source == source => self.cancel(),
            _ => RepeatCommand::Keep,
        }
    }

    pub fn cancel(&mut self) -> RepeatCommand {
        match self.active.take() {
            Some(_) => RepeatCommand::Cancel,
            None => RepeatCommand::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(evdev: u32, source: InputSourceTag) -> RepeatAction {
        RepeatAction {
            evdev,
            xkb_keycode: evdev + 8,
            utf32: 'a' as u32,
            source,
        }
    }

    const ARM_DEFAULT: RepeatCommand = RepeatCommand::Arm {
        delay: Duration::from_millis(400),
        interval: Duration::from_millis(25),
    };

    #[test]
    fn fast_rates_keep_a_nonzero_interval() {
        let info = RepeatInfo::from_wayland(2000, 100);
        assert_eq!(info.interval(), Some(Duration::from_micros(500)));
        assert_eq!(
            RepeatInfo::from_wayland(i32::MAX, 100).interval(),
            Some(Duration::from_nanos(1))
        );
        assert_eq!(RepeatInfo::from_wayland(0, 100).interval(), None);
        assert_eq!(RepeatInfo::from_wayland(-5, -1).interval(), None);
    }

    #[test]
    fn hold_then_release() {
        let mut repeat = RepeatController::new();
        assert_eq!(
            repeat.press(action(30, InputSourceTag::Keyboard), true),
            ARM_DEFAULT
        );
        assert_eq!(repeat.interval(), Some(Duration::from_millis(25)));
        assert_eq!(repeat.release(30, InputSourceTag::Keyboard), RepeatCommand::Cancel);
        assert_eq!(repeat.active(), None);
        assert_eq!(repeat.interval(), None);
    }

    #[test]
    fn release_of_other_key_keeps_repeat() {
        let mut repeat = RepeatController::new();
        repeat.press(action(30, InputSourceTag::Keyboard), true);
        assert_eq!(repeat.release(31, InputSourceTag::Keyboard), RepeatCommand::Keep);
        assert_eq!(repeat.release(30, InputSourceTag::Ir), RepeatCommand::Keep);
        assert!(repeat.active().is_some());
    }

    #[test]
    fn rearming_replaces_the_action() {
        let mut repeat = RepeatController::new();
        repeat.press(action(30, InputSourceTag::Keyboard), true);
        assert_eq!(
            repeat.press(action(31, InputSourceTag::Keyboard), true),
            ARM_DEFAULT
        );
        assert_eq!(repeat.active().unwrap().evdev, 31);
    }

    #[test]
    fn non_repeating_key_from_same_source_cancels() {
        let mut repeat = RepeatController::new();
        repeat.press(action(30, InputSourceTag::Keyboard), true);
        assert_eq!(
            repeat.press(action(42, InputSourceTag::Ir), false),
            RepeatCommand::Keep
        );
        assert_eq!(
            repeat.press(action(42, InputSourceTag::Keyboard), false),
            RepeatCommand::Cancel
        );
    }

    #[test]
    fn zero_rate_disables_repeat() {
        let mut repeat = RepeatController::new();
        repeat.set_info(RepeatInfo::from_wayland(0, 600));
        assert_eq!(
            repeat.press(action(30, InputSourceTag::Keyboard), true),
            RepeatCommand::Keep
        );
        assert_eq!(repeat.active(), None);
    }

    #[test]
    fn compositor_rate_and_delay() {
        let mut repeat = RepeatController::new();
        repeat.set_info(RepeatInfo::from_wayland(30, 250));
        assert_eq!(
            repeat.press(action(30, InputSourceTag::Keyboard), true),
            RepeatCommand::Arm {
                delay: Duration::from_millis(250),
                interval: Duration::from_millis(33),
            }
        );
        assert_eq!(RepeatInfo::from_wayland(-1, -1).interval(), None);
    }

    #[test]
    fn replayed_events_carry_current_modifiers() {
        let a = action(30, InputSourceTag::Keyboard);
        let shift = Modifiers {
            shift: true,
            ..Default::default()
        };
        let up = a.to_event(KeyPhase::Up, shift);
        assert_eq!(up.phase, KeyPhase::Up);
        assert_eq!(up.xkb_keycode, 38);
        assert!(up.modifiers.shift);
        assert_eq!(RepeatAction::from_event(&up), a);
    }
}
