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

use std::fmt;
use std::os::fd::OwnedFd;

use xkbcommon::xkb;

use crate::input::EventSequence;
use crate::input::InputEvent;
use crate::input::InputSource;
use crate::input::InputSourceTag;
use crate::input::KeyEvent;
use crate::input::KeyPhase;
use crate::input::Modifiers;
use crate::input::Sequenced;
use crate::prelude::*;

/// evdev codes are offset by 8 in xkb.
pub const XKB_KEYCODE_OFFSET: u32 = 8;

enum Keymap {
    None,
    Ready { keymap: xkb::Keymap, state: xkb::State },
}

impl fmt::Debug for Keymap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Ready { .. } => write!(f, "Ready"),
        }
    }
}

/// Keyboard half of the input router: keymap, modifier snapshot, and the
/// queue of translated key events.
pub struct KeyboardState {
    context: xkb::Context,
    keymap: Keymap,
    modifiers: Modifiers,
    seq: EventSequence,
    queue: Vec<Sequenced<InputEvent>>,
}

impl fmt::Debug for KeyboardState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyboardState")
            .field("keymap", &self.keymap)
            .field("modifiers", &self.modifiers)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl KeyboardState {
    pub fn new(seq: EventSequence) -> Self {
        Self {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            keymap: Keymap::None,
            modifiers: Modifiers::default(),
            seq,
            queue: Vec::new(),
        }
    }

    pub fn has_keymap(&self) -> bool {
        matches!(self.keymap, Keymap::Ready { .. })
    }

    /// Compiles an xkb v1 keymap shared by the compositor. The fd is closed
    /// when this returns.
    #[instrument(skip(self, fd), level = "debug")]
    pub fn load_keymap(&mut self, fd: OwnedFd, size: u32) -> Result<()> {
        // SAFETY: the compositor guarantees fd refers to a keymap of at least
        // `size` bytes that stays valid while mapped.
        let keymap = unsafe {
            xkb::Keymap::new_from_fd(
                &self.context,
                fd,
                size as usize,
                xkb::KEYMAP_FORMAT_TEXT_V1,
                xkb::KEYMAP_COMPILE_NO_FLAGS,
            )
        }
        .context(loc!(), "unable to map keymap")?
        .ok_or_else(|| anyhow!("compositor sent a keymap xkbcommon could not compile"))?;
        self.set_keymap(keymap);
        Ok(())
    }

    pub fn set_keymap(&mut self, keymap: xkb::Keymap) {
        let state = xkb::State::new(&keymap);
        self.modifiers = snapshot(&state);
        self.keymap = Keymap::Ready { keymap, state };
    }

    /// wl_keyboard.keymap with format no_keymap.
    pub fn clear_keymap(&mut self) {
        self.keymap = Keymap::None;
        self.modifiers = Modifiers::default();
    }

    pub fn update_modifiers(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) {
        if let Keymap::Ready { state, .. } = &mut self.keymap {
            state.update_mask(depressed, latched, locked, 0, 0, group);
            self.modifiers = snapshot(state);
        }
    }

    pub fn reset_modifiers(&mut self) {
        self.modifiers = Modifiers::default();
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// None when there is no keymap to ask.
    pub fn key_repeats(&self, evdev: u32) -> Option<bool> {
        match &self.keymap {
            Keymap::None => None,
            Keymap::Ready { keymap, .. } => {
                Some(keymap.key_repeats(xkb::Keycode::new(evdev + XKB_KEYCODE_OFFSET)))
            },
        }
    }

    pub fn translate(&self, evdev: u32, phase: KeyPhase, source: InputSourceTag) -> KeyEvent {
        let (xkb_keycode, utf32) = match &self.keymap {
            Keymap::None => (0, 0),
            Keymap::Ready { state, .. } => {
                let keycode = xkb::Keycode::new(evdev + XKB_KEYCODE_OFFSET);
                (keycode.raw(), state.key_get_utf32(keycode))
            },
        };
        KeyEvent {
            phase,
            evdev,
            xkb_keycode,
            utf32,
            modifiers: self.modifiers,
            source,
        }
    }

    pub fn push(&mut self, event: KeyEvent) {
        let stamped = self.seq.stamp(InputEvent::Key(event));
        self.queue.push(stamped);
    }
}

impl InputSource for KeyboardState {
    type Event = InputEvent;

    fn drain(&mut self) -> Vec<Sequenced<InputEvent>> {
        std::mem::take(&mut self.queue)
    }
}

fn snapshot(state: &xkb::State) -> Modifiers {
    let active = |name: &str| state.mod_name_is_active(name, xkb::STATE_MODS_EFFECTIVE);
    Modifiers {
        shift: active(xkb::MOD_NAME_SHIFT),
        ctrl: active(xkb::MOD_NAME_CTRL),
        alt: active(xkb::MOD_NAME_ALT),
        logo: active(xkb::MOD_NAME_LOGO),
        caps_lock: active(xkb::MOD_NAME_CAPS),
        num_lock: active(xkb::MOD_NAME_NUM),
    }
}

/// A self-contained keymap covering Shift, Caps Lock and `a`.
#[cfg(test)]
pub(crate) fn test_keymap() -> xkb::Keymap {
    const KEYMAP: &str = r#"
xkb_keymap {
    xkb_keycodes "test" {
        minimum = 8;
        maximum = 255;
        <AC01> = 38;
        <LFSH> = 50;
        <CAPS> = 66;
    };
    xkb_types "test" {
        type "ONE_LEVEL" {
            modifiers = none;
            level_name[Level1] = "Any";
        };
        type "ALPHABETIC" {
            modifiers = Shift+Lock;
            map[Shift] = Level2;
            map[Lock] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Caps";
        };
    };
    xkb_compat "test" {
        interpret Shift_L {
            action = SetMods(modifiers=Shift);
        };
        interpret Caps_Lock {
            action = LockMods(modifiers=Lock);
        };
    };
    xkb_symbols "test" {
        key <AC01> { type = "ALPHABETIC", [ a, A ] };
        key <LFSH> { [ Shift_L ] };
        key <CAPS> { [ Caps_Lock ] };
        modifier_map Shift { <LFSH> };
        modifier_map Lock { <CAPS> };
    };
};
"#;
    let context = xkb::Context::new(xkb::CONTEXT_NO_DEFAULT_INCLUDES);
    xkb::Keymap::new_from_string(
        &context,
        KEYMAP.to_string(),
        xkb::KEYMAP_FORMAT_TEXT_V1,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    )
    .expect("test keymap compiles")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_keymap_nothing_is_translated() {
        let mut keyboard = KeyboardState::new(EventSequence::default());
        assert!(!keyboard.has_keymap());
        assert_eq!(keyboard.key_repeats(30), None);

        // Modifier updates without a keymap have nothing to apply to.
        keyboard.update_modifiers(0xff, 0, 0, 0);
        let event = keyboard.translate(30, KeyPhase::Down, InputSourceTag::Keyboard);
        assert_eq!(event.xkb_keycode, 0);
        assert_eq!(event.utf32, 0);
        assert_eq!(event.modifiers, Modifiers::default());
    }

    #[test]
    fn queue_is_drained_in_order() {
        let seq = EventSequence::default();
        let mut keyboard = KeyboardState::new(seq.clone());
        for evdev in [30, 31, 32] {
            let event = keyboard.translate(evdev, KeyPhase::Down, InputSourceTag::Keyboard);
            keyboard.push(event);
        }
        let drained = keyboard.drain();
        let seqs: Vec<u64> = drained.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(drained[2].event.as_key().unwrap().evdev, 32);
        assert!(keyboard.drain().is_empty());
        assert_eq!(seq.next(), 3);
    }

    const KEY_A: u32 = 30;

    fn mod_mask(keymap: &xkb::Keymap, name: &str) -> u32 {
        1 << keymap.mod_get_index(name)
    }

    #[test]
    fn keymap_translates_with_xkb_offset() {
        let mut keyboard = KeyboardState::new(EventSequence::default());
        keyboard.set_keymap(test_keymap());
        assert!(keyboard.has_keymap());

        let event = keyboard.translate(KEY_A, KeyPhase::Down, InputSourceTag::Keyboard);
        assert_eq!(event.evdev, KEY_A);
        assert_eq!(event.xkb_keycode, 38);
        assert_eq!(event.utf32, 0x61);
        assert_eq!(event.modifiers, Modifiers::default());
        assert_eq!(keyboard.key_repeats(KEY_A), Some(true));
    }

    #[test]
    fn shift_changes_symbol_and_snapshot() {
        let keymap = test_keymap();
        let shift = mod_mask(&keymap, xkb::MOD_NAME_SHIFT);
        let mut keyboard = KeyboardState::new(EventSequence::default());
        keyboard.set_keymap(keymap);

        keyboard.update_modifiers(shift, 0, 0, 0);
        let first = keyboard.modifiers();
        assert!(first.shift);
        assert!(!first.ctrl && !first.caps_lock);
        // Reading the snapshot leaves it unchanged.
        assert_eq!(keyboard.modifiers(), first);

        let event = keyboard.translate(KEY_A, KeyPhase::Down, InputSourceTag::Keyboard);
        assert_eq!(event.utf32, 'A' as u32);
        assert!(event.modifiers.shift);

        keyboard.update_modifiers(0, 0, 0, 0);
        assert_eq!(keyboard.modifiers(), Modifiers::default());
        let event = keyboard.translate(KEY_A, KeyPhase::Up, InputSourceTag::Keyboard);
        assert_eq!(event.utf32, 0x61);
    }

    #[test]
    fn locked_caps_is_reported() {
        let keymap = test_keymap();
        let caps = mod_mask(&keymap, xkb::MOD_NAME_CAPS);
        let mut keyboard = KeyboardState::new(EventSequence::default());
        keyboard.set_keymap(keymap);

        keyboard.update_modifiers(0, 0, caps, 0);
        assert!(keyboard.modifiers().caps_lock);
        assert!(!keyboard.modifiers().shift);
    }

    #[test]
    fn clearing_keymap_resets_modifiers() {
        let mut keyboard = KeyboardState::new(EventSequence::default());
        keyboard.modifiers.shift = true;
        keyboard.clear_keymap();
        assert_eq!(keyboard.modifiers(), Modifiers::default());
    }
}
