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

use crate::input::EventSequence;
use crate::input::InputEvent;
use crate::input::InputSource;
use crate::input::PointerEvent;
use crate::input::PointerPhase;
use crate::input::Sequenced;

pub const BTN_LEFT: u32 = 0x110;
pub const BTN_RIGHT: u32 = 0x111;
pub const BTN_MIDDLE: u32 = 0x112;

pub const BUTTON_PRIMARY: i64 = 1 << 0;
pub const BUTTON_SECONDARY: i64 = 1 << 1;
pub const BUTTON_MIDDLE: i64 = 1 << 2;

fn button_bit(button: u32) -> i64 {
    match button {
        BTN_LEFT => BUTTON_PRIMARY,
        BTN_RIGHT => BUTTON_SECONDARY,
        BTN_MIDDLE => BUTTON_MIDDLE,
        _ => 0,
    }
}

#[derive(Debug)]
pub struct PointerState {
    x: f64,
    y: f64,
    buttons: i64,
    seq: EventSequence,
    queue: Vec<Sequenced<InputEvent>>,
}

impl PointerState {
    pub fn new(seq: EventSequence) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            buttons: 0,
            seq,
            queue: Vec::new(),
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn buttons(&self) -> i64 {
        self.buttons
    }

    /// Motion only moves the cursor; the engine hears about it with the next
    /// button.
    pub fn motion(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    pub fn button(&mut self, time_ms: u32, button: u32, pressed: bool) {
        let bit = button_bit(button);
        let phase = if pressed {
            self.buttons |= bit;
            PointerPhase::Down
        } else {
            self.buttons &= !bit;
            PointerPhase::Up
        };
        let event = PointerEvent {
            phase,
            timestamp_us: time_ms as u64 * 1000,
            x: self.x,
            y: self.y,
            device: 0,
            buttons: self.buttons,
        };
        let stamped = self.seq.stamp(InputEvent::Pointer(event));
        self.queue.push(stamped);
    }

    /// Buttons held when the pointer left will never see their release.
    pub fn leave(&mut self) {
        self.buttons = 0;
    }
}

impl InputSource for PointerState {
    type Event = InputEvent;

    fn drain(&mut self) -> Vec<Sequenced<InputEvent>> {
        std::mem::take(&mut self.queue)
    }
}
