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

//! evdev key codes and their GLFW equivalents, which is the key schema the
//! engine's keyevent channel is told to expect.

use crate::input::Modifiers;

/// Codes from linux/input-event-codes.h.
pub mod evdev {
    pub const KEY_ESC: u32 = 1;
    pub const KEY_1: u32 = 2;
    pub const KEY_2: u32 = 3;
    pub const KEY_3: u32 = 4;
    pub const KEY_4: u32 = 5;
    pub const KEY_5: u32 = 6;
    pub const KEY_6: u32 = 7;
    pub const KEY_7: u32 = 8;
    pub const KEY_8: u32 = 9;
    pub const KEY_9: u32 = 10;
    pub const KEY_0: u32 = 11;
    pub const KEY_MINUS: u32 = 12;
    pub const KEY_EQUAL: u32 = 13;
    pub const KEY_BACKSPACE: u32 = 14;
    pub const KEY_TAB: u32 = 15;
    pub const KEY_Q: u32 = 16;
    pub const KEY_W: u32 = 17;
    pub const KEY_E: u32 = 18;
    pub const KEY_R: u32 = 19;
    pub const KEY_T: u32 = 20;
    pub const KEY_Y: u32 = 21;
    pub const KEY_U: u32 = 22;
    pub const KEY_I: u32 = 23;
    pub const KEY_O: u32 = 24;
    pub const KEY_P: u32 = 25;
    pub const KEY_LEFTBRACE: u32 = 26;
    pub const KEY_RIGHTBRACE: u32 = 27;
    pub const KEY_ENTER: u32 = 28;
    pub const KEY_LEFTCTRL: u32 = 29;
    pub const KEY_A: u32 = 30;
    pub const KEY_S: u32 = 31;
    pub const KEY_D: u32 = 32;
    pub const KEY_F: u32 = 33;
    pub const KEY_G: u32 = 34;
    pub const KEY_H: u32 = 35;
    pub const KEY_J: u32 = 36;
    pub const KEY_K: u32 = 37;
    pub const KEY_L: u32 = 38;
    pub const KEY_SEMICOLON: u32 = 39;
    pub const KEY_APOSTROPHE: u32 = 40;
    pub const KEY_GRAVE: u32 = 41;
    pub const KEY_LEFTSHIFT: u32 = 42;
    pub const KEY_BACKSLASH: u32 = 43;
    pub const KEY_Z: u32 = 44;
    pub const KEY_X: u32 = 45;
    pub const KEY_C: u32 = 46;
    pub const KEY_V: u32 = 47;
    pub const KEY_B: u32 = 48;
    pub const KEY_N: u32 = 49;
    pub const KEY_M: u32 = 50;
    pub const KEY_COMMA: u32 = 51;
    pub const KEY_DOT: u32 = 52;
    pub const KEY_SLASH: u32 = 53;
    pub const KEY_RIGHTSHIFT: u32 = 54;
    pub const KEY_KPASTERISK: u32 = 55;
    pub const KEY_LEFTALT: u32 = 56;
    pub const KEY_SPACE: u32 = 57;
    pub const KEY_CAPSLOCK: u32 = 58;
    pub const KEY_F1: u32 = 59;
    pub const KEY_F6: u32 = 64;
    pub const KEY_F7: u32 = 65;
    pub const KEY_F10: u32 = 68;
    pub const KEY_NUMLOCK: u32 = 69;
    pub const KEY_SCROLLLOCK: u32 = 70;
    pub const KEY_KP7: u32 = 71;
    pub const KEY_KP8: u32 = 72;
    pub const KEY_KP9: u32 = 73;
    pub const KEY_KPMINUS: u32 = 74;
    pub const KEY_KP4: u32 = 75;
    pub const KEY_KP5: u32 = 76;
    pub const KEY_KP6: u32 = 77;
    pub const KEY_KPPLUS: u32 = 78;
    pub const KEY_KP1: u32 = 79;
    pub const KEY_KP2: u32 = 80;
    pub const KEY_KP3: u32 = 81;
    pub const KEY_KP0: u32 = 82;
    pub const KEY_KPDOT: u32 = 83;
    pub const KEY_F11: u32 = 87;
    pub const KEY_F12: u32 = 88;
    pub const KEY_KPENTER: u32 = 96;
    pub const KEY_RIGHTCTRL: u32 = 97;
    pub const KEY_KPSLASH: u32 = 98;
    pub const KEY_RIGHTALT: u32 = 100;
    pub const KEY_HOME: u32 = 102;
    pub const KEY_UP: u32 = 103;
    pub const KEY_PAGEUP: u32 = 104;
    pub const KEY_LEFT: u32 = 105;
    pub const KEY_RIGHT: u32 = 106;
    pub const KEY_END: u32 = 107;
    pub const KEY_DOWN: u32 = 108;
    pub const KEY_PAGEDOWN: u32 = 109;
    pub const KEY_INSERT: u32 = 110;
    pub const KEY_DELETE: u32 = 111;
    pub const KEY_MUTE: u32 = 113;
    pub const KEY_VOLUMEDOWN: u32 = 114;
    pub const KEY_VOLUMEUP: u32 = 115;
    pub const KEY_POWER: u32 = 116;
    pub const KEY_KPEQUAL: u32 = 117;
    pub const KEY_PAUSE: u32 = 119;
    pub const KEY_KPCOMMA: u32 = 121;
    pub const KEY_LEFTMETA: u32 = 125;
    pub const KEY_RIGHTMETA: u32 = 126;
    pub const KEY_HELP: u32 = 138;
    pub const KEY_MENU: u32 = 139;
    pub const KEY_SETUP: u32 = 141;
    pub const KEY_COFFEE: u32 = 152;
    pub const KEY_NEXTSONG: u32 = 163;
    pub const KEY_PLAYPAUSE: u32 = 164;
    pub const KEY_PREVIOUSSONG: u32 = 165;
    pub const KEY_STOPCD: u32 = 166;
    pub const KEY_RECORD: u32 = 167;
    pub const KEY_REWIND: u32 = 168;
    pub const KEY_EXIT: u32 = 174;
    pub const KEY_F13: u32 = 183;
    pub const KEY_F24: u32 = 194;
    pub const KEY_PLAY: u32 = 207;
    pub const KEY_FASTFORWARD: u32 = 208;
    pub const KEY_PRINT: u32 = 210;
    pub const KEY_BATTERY: u32 = 236;
    pub const KEY_UNKNOWN: u32 = 240;
    pub const KEY_OK: u32 = 352;
    pub const KEY_CLEAR: u32 = 355;
    pub const KEY_INFO: u32 = 358;
    pub const KEY_FAVORITES: u32 = 364;
    pub const KEY_EPG: u32 = 365;
    pub const KEY_PVR: u32 = 366;
    pub const KEY_SUBTITLE: u32 = 370;
    pub const KEY_TV: u32 = 377;
    pub const KEY_RED: u32 = 398;
    pub const KEY_GREEN: u32 = 399;
    pub const KEY_YELLOW: u32 = 400;
    pub const KEY_BLUE: u32 = 401;
    pub const KEY_NEXT: u32 = 407;
    pub const KEY_SLOW: u32 = 409;
    pub const KEY_PREVIOUS: u32 = 412;
    pub const KEY_CONTEXT_MENU: u32 = 438;
    pub const KEY_FN: u32 = 0x1d0;
    pub const KEY_FN_1: u32 = 0x1de;
    pub const KEY_FN_2: u32 = 0x1df;
    pub const KEY_FN_E: u32 = 0x1e1;
    pub const KEY_FN_F: u32 = 0x1e2;
    pub const KEY_FN_S: u32 = 0x1e3;
    pub const KEY_FN_B: u32 = 0x1e4;
    pub const KEY_VOICECOMMAND: u32 = 0x246;
    pub const KEY_AUDIO_DESC: u32 = 0x26e;
    pub const KEY_DATA: u32 = 0x277;
}

pub const GLFW_KEY_UNKNOWN: i32 = -1;

pub const GLFW_MOD_SHIFT: i32 = 0x0001;
pub const GLFW_MOD_CONTROL: i32 = 0x0002;
pub const GLFW_MOD_ALT: i32 = 0x0004;
pub const GLFW_MOD_SUPER: i32 = 0x0008;
pub const GLFW_MOD_CAPS_LOCK: i32 = 0x0010;
pub const GLFW_MOD_NUM_LOCK: i32 = 0x0020;

/// Keys without a GLFW name map to [`GLFW_KEY_UNKNOWN`].
pub fn glfw_key_code(key: u32) -> i32 {
    use evdev::*;

    // Letters, digits and punctuation share their ASCII value in GLFW.
    let ascii = |c: u8| c as i32;
    match key {
        KEY_SPACE => ascii(b' '),
        KEY_APOSTROPHE => ascii(b'\''),
        KEY_COMMA => ascii(b','),
        KEY_MINUS => ascii(b'-'),
        KEY_DOT => ascii(b'.'),
        KEY_SLASH => ascii(b'/'),
        KEY_0 => ascii(b'0'),
        KEY_1..=KEY_9 => ascii(b'1') + (key - KEY_1) as i32,
        KEY_SEMICOLON => ascii(b';'),
        KEY_EQUAL => ascii(b'='),
        KEY_A => ascii(b'A'),
        KEY_B => ascii(b'B'),
        KEY_C => ascii(b'C'),
        KEY_D => ascii(b'D'),
        KEY_E => ascii(b'E'),
        KEY_F => ascii(b'F'),
        KEY_G => ascii(b'G'),
        KEY_H => ascii(b'H'),
        KEY_I => ascii(b'I'),
        KEY_J => ascii(b'J'),
        KEY_K => ascii(b'K'),
        KEY_L => ascii(b'L'),
        KEY_M => ascii(b'M'),
        KEY_N => ascii(b'N'),
        KEY_O => ascii(b'O'),
        KEY_P => ascii(b'P'),
        KEY_Q => ascii(b'Q'),
        KEY_R => ascii(b'R'),
        KEY_S => ascii(b'S'),
        KEY_T => ascii(b'T'),
        KEY_U => ascii(b'U'),
        KEY_V => ascii(b'V'),
        KEY_W => ascii(b'W'),
        KEY_X => ascii(b'X'),
        KEY_Y => ascii(b'Y'),
        KEY_Z => ascii(b'Z'),
        KEY_LEFTBRACE => ascii(b'['),
        KEY_BACKSLASH => ascii(b'\\'),
        KEY_RIGHTBRACE => ascii(b']'),
        KEY_GRAVE => ascii(b'`'),

        KEY_ESC => 256,
        KEY_ENTER => 257,
        KEY_TAB => 258,
        KEY_BACKSPACE => 259,
        KEY_INSERT => 260,
        KEY_DELETE => 261,
        KEY_RIGHT => 262,
        KEY_LEFT => 263,
        KEY_DOWN => 264,
        KEY_UP => 265,
        KEY_PAGEUP => 266,
        KEY_PAGEDOWN => 267,
        KEY_HOME => 268,
        KEY_END => 269,
        KEY_CAPSLOCK => 280,
        KEY_SCROLLLOCK => 281,
        KEY_NUMLOCK => 282,
        KEY_PRINT => 283,
        KEY_PAUSE => 284,

        KEY_F1..=KEY_F10 => 290 + (key - KEY_F1) as i32,
        KEY_F11 => 300,
        KEY_F12 => 301,
        KEY_F13..=KEY_F24 => 302 + (key - KEY_F13) as i32,

        KEY_KP0 => 320,
        KEY_KP1 => 321,
        KEY_KP2 => 322,
        KEY_KP3 => 323,
        KEY_KP4 => 324,
        KEY_KP5 => 325,
        KEY_KP6 => 326,
        KEY_KP7 => 327,
        KEY_KP8 => 328,
        KEY_KP9 => 329,
        KEY_KPDOT | KEY_KPCOMMA => 330,
        KEY_KPSLASH => 331,
        KEY_KPASTERISK => 332,
        KEY_KPMINUS => 333,
        KEY_KPPLUS => 334,
        KEY_KPENTER => 335,
        KEY_KPEQUAL => 336,

        KEY_LEFTSHIFT => 340,
        KEY_LEFTCTRL => 341,
        KEY_LEFTALT => 342,
        KEY_LEFTMETA => 343,
        KEY_RIGHTSHIFT => 344,
        KEY_RIGHTCTRL => 345,
        KEY_RIGHTALT => 346,
        KEY_RIGHTMETA => 347,
        KEY_MENU => 348,

        _ => GLFW_KEY_UNKNOWN,
    }
}

pub fn glfw_modifiers(mods: Modifiers) -> i32 {
    [
        (mods.shift, GLFW_MOD_SHIFT),
        (mods.ctrl, GLFW_MOD_CONTROL),
        (mods.alt, GLFW_MOD_ALT),
        (mods.logo, GLFW_MOD_SUPER),
        (mods.caps_lock, GLFW_MOD_CAPS_LOCK),
        (mods.num_lock, GLFW_MOD_NUM_LOCK),
    ]
    .into_iter()
    .filter(|(active, _)| *active)
    .fold(0, |bits, (_, bit)| bits | bit)
}

#[cfg(test)]
mod tests {
    use super::evdev::*;
    use super::*;

    #[test]
    fn printable_keys_use_ascii() {
        assert_eq!(glfw_key_code(KEY_A), 'A' as i32);
        assert_eq!(glfw_key_code(KEY_Z), 'Z' as i32);
        assert_eq!(glfw_key_code(KEY_1), '1' as i32);
        assert_eq!(glfw_key_code(KEY_9), '9' as i32);
        assert_eq!(glfw_key_code(KEY_0), '0' as i32);
        assert_eq!(glfw_key_code(KEY_GRAVE), '`' as i32);
        assert_eq!(glfw_key_code(KEY_SPACE), 32);
    }

    #[test]
    fn function_and_navigation_keys() {
        assert_eq!(glfw_key_code(KEY_ESC), 256);
        assert_eq!(glfw_key_code(KEY_UP), 265);
        assert_eq!(glfw_key_code(KEY_F1), 290);
        assert_eq!(glfw_key_code(KEY_F10), 299);
        assert_eq!(glfw_key_code(KEY_F12), 301);
        assert_eq!(glfw_key_code(KEY_F13), 302);
        assert_eq!(glfw_key_code(KEY_F24), 313);
        assert_eq!(glfw_key_code(KEY_KPASTERISK), 332);
        assert_eq!(glfw_key_code(KEY_RIGHTMETA), 347);
    }

    #[test]
    fn remote_only_keys_are_unknown() {
        for key in [KEY_OK, KEY_RED, KEY_PLAYPAUSE, KEY_VOLUMEUP, 0, 0xffff] {
            assert_eq!(glfw_key_code(key), GLFW_KEY_UNKNOWN, "key {key}");
        }
    }

    #[test]
    fn modifier_bits() {
        assert_eq!(glfw_modifiers(Modifiers::default()), 0);
        let mods = Modifiers {
            shift: true,
            logo: true,
            num_lock: true,
            ..Default::default()
        };
        assert_eq!(glfw_modifiers(mods), 0x29);
        let all = Modifiers {
            shift: true,
            ctrl: true,
            alt: true,
            logo: true,
            caps_lock: true,
            num_lock: true,
        };
        assert_eq!(glfw_modifiers(all), 0x3f);
    }
}
