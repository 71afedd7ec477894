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

use serde_derive::Serialize;

use crate::input::KeyEvent;
use crate::input::KeyPhase;
use crate::input::keys;
use crate::prelude::*;

/// The JSON the engine's keyevent channel expects from a Linux GLFW host.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub keymap: &'static str,
    pub toolkit: &'static str,
    pub scan_code: u32,
    pub key_code: i32,
    pub modifiers: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unicode_scalar_values: Option<u32>,
}

impl From<&KeyEvent> for KeyMessage {
    fn from(event: &KeyEvent) -> Self {
        Self {
            kind: match event.phase {
                KeyPhase::Down => "keydown",
                KeyPhase::Up => "keyup",
            },
            keymap: "linux",
            toolkit: "glfw",
            scan_code: event.xkb_keycode,
            key_code: keys::glfw_key_code(event.evdev),
            modifiers: keys::glfw_modifiers(event.modifiers),
            unicode_scalar_values: (event.utf32 != 0).then_some(event.utf32),
        }
    }
}

pub fn encode(event: &KeyEvent) -> Result<Vec<u8>> {
    serde_json::to_vec(&KeyMessage::from(event)).location(loc!())
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use serde_json::json;

    use super::*;
    use crate::input::InputSourceTag;
    use crate::input::Modifiers;
    use crate::input::keys::evdev;

    fn key(phase: KeyPhase, evdev: u32, utf32: u32, modifiers: Modifiers) -> KeyEvent {
        KeyEvent {
            phase,
            evdev,
            xkb_keycode: evdev + 8,
            utf32,
            modifiers,
            source: InputSourceTag::Keyboard,
        }
    }

    #[test]
    fn shifted_letter() {
        let shift = Modifiers {
            shift: true,
            ..Default::default()
        };
        let bytes = encode(&key(KeyPhase::Down, evdev::KEY_A, 'A' as u32, shift)).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "keydown",
                "keymap": "linux",
                "toolkit": "glfw",
                "scanCode": 38,
                "keyCode": 65,
                "modifiers": 1,
                "unicodeScalarValues": 65,
            })
        );
    }

    #[test]
    fn non_printing_key_omits_code_point() {
        let bytes = encode(&key(KeyPhase::Up, evdev::KEY_LEFT, 0, Modifiers::default())).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "keyup");
        assert_eq!(value["keyCode"], 263);
        assert!(value.get("unicodeScalarValues").is_none());
    }

    #[test]
    fn keymapless_scan_code_is_zero() {
        let mut event = key(KeyPhase::Down, evdev::KEY_OK, 0, Modifiers::default());
        event.xkb_keycode = 0;
        let message = KeyMessage::from(&event);
        assert_eq!(message.scan_code, 0);
        assert_eq!(message.key_code, keys::GLFW_KEY_UNKNOWN);
    }
}
