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

//! Infrared remote input. A receiver thread pushes raw remote codes through
//! an [`IrSender`]; the platform thread is pinged and drains them into the
//! keyboard path.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use calloop::ping::Ping;
use calloop::ping::PingSource;
use calloop::ping::make_ping;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

use crate::input::EventSequence;
use crate::input::InputSource;
use crate::input::Sequenced;
use crate::input::keys::evdev;
use crate::prelude::*;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("unknown IR remote code {0:#x}")]
    UnknownIrCode(u32),
}

/// Remote buttons and the wire codes the receiver reports for them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum IrKey {
    Power = 0x01,
    Menu = 0x02,
    Guide = 0x03,
    Info = 0x04,
    Ok = 0x05,
    Select = 0x06,
    Enter = 0x07,
    Exit = 0x08,
    Back = 0x09,
    Last = 0x0a,

    ArrowUp = 0x10,
    ArrowDown = 0x11,
    ArrowLeft = 0x12,
    ArrowRight = 0x13,
    PageUp = 0x14,
    PageDown = 0x15,

    VolumeUp = 0x20,
    VolumeDown = 0x21,
    Mute = 0x22,
    ChannelUp = 0x23,
    ChannelDown = 0x24,

    Digit0 = 0x30,
    Digit1 = 0x31,
    Digit2 = 0x32,
    Digit3 = 0x33,
    Digit4 = 0x34,
    Digit5 = 0x35,
    Digit6 = 0x36,
    Digit7 = 0x37,
    Digit8 = 0x38,
    Digit9 = 0x39,

    Play = 0x40,
    Pause = 0x41,
    Stop = 0x42,
    Record = 0x43,
    FastForward = 0x44,
    Rewind = 0x45,

    Red = 0x50,
    Green = 0x51,
    Yellow = 0x52,
    Blue = 0x53,

    Favorite = 0x60,
    Help = 0x61,
    Setup = 0x62,
    Dvr = 0x63,
    Context = 0x64,
    Live = 0x65,
    ClosedCaptioning = 0x66,
    DescriptiveAudio = 0x67,
    Teletext = 0x68,
    Profile = 0x69,
    OnDemand = 0x6a,
    Interactive = 0x6b,
    TvRadio = 0x6c,
    PushToTalk = 0x6d,

    Next = 0x70,
    Previous = 0x71,
    Slow = 0x72,
    Advance = 0x73,
    InstantReplay = 0x74,
    Clear = 0x75,
    ThumbUp = 0x76,
    ThumbDown = 0x77,

    RfPairGhost = 0x80,
    NewBatteriesInserted = 0x81,
    GracefulShutdown = 0x82,
    LowBattery = 0xc3,
    Undefined = 0xff,
}

impl IrKey {
    pub fn evdev(self) -> u32 {
        use evdev::*;
        match self {
            Self::Power => KEY_POWER,
            Self::Menu => KEY_HOME,
            Self::Guide => KEY_EPG,
            Self::Info => KEY_INFO,
            Self::Ok => KEY_OK,
            Self::Select | Self::Enter => KEY_ENTER,
            Self::Exit => KEY_EXIT,
            Self::Back => KEY_BACKSPACE,
            Self::Last => KEY_ESC,
            Self::ArrowUp => KEY_UP,
            Self::ArrowDown => KEY_DOWN,
            Self::ArrowLeft => KEY_LEFT,
            Self::ArrowRight => KEY_RIGHT,
            Self::PageUp => KEY_PAGEUP,
            Self::PageDown => KEY_PAGEDOWN,
            Self::VolumeUp => KEY_VOLUMEUP,
            Self::VolumeDown => KEY_VOLUMEDOWN,
            Self::Mute => KEY_MUTE,
            Self::ChannelUp => KEY_NEXTSONG,
            Self::ChannelDown => KEY_PREVIOUSSONG,
            Self::Digit0 => KEY_0,
            Self::Digit1 => KEY_1,
            Self::Digit2 => KEY_2,
            Self::Digit3 => KEY_3,
            Self::Digit4 => KEY_4,
            Self::Digit5 => KEY_5,
            Self::Digit6 => KEY_6,
            Self::Digit7 => KEY_7,
            Self::Digit8 => KEY_8,
            Self::Digit9 => KEY_9,
            Self::Play => KEY_PLAY,
            Self::Pause => KEY_PLAYPAUSE,
            Self::Stop => KEY_STOPCD,
            Self::Record => KEY_RECORD,
            Self::FastForward => KEY_FASTFORWARD,
            Self::Rewind => KEY_REWIND,
            Self::Red => KEY_RED,
            Self::Green => KEY_GREEN,
            Self::Yellow => KEY_YELLOW,
            Self::Blue => KEY_BLUE,
            Self::Favorite => KEY_FAVORITES,
            Self::Help => KEY_HELP,
            Self::Setup => KEY_SETUP,
            Self::Dvr => KEY_PVR,
            Self::Context => KEY_CONTEXT_MENU,
            Self::Live => KEY_TV,
            Self::ClosedCaptioning => KEY_SUBTITLE,
            Self::DescriptiveAudio => KEY_AUDIO_DESC,
            Self::Teletext => KEY_DATA,
            Self::Profile => KEY_FN,
            Self::OnDemand => KEY_COFFEE,
            Self::Interactive => KEY_FN_S,
            Self::TvRadio => KEY_TV,
            Self::PushToTalk => KEY_VOICECOMMAND,
            Self::Next => KEY_NEXT,
            Self::Previous => KEY_PREVIOUS,
            Self::Slow => KEY_SLOW,
            Self::Advance => KEY_FN_E,
            Self::InstantReplay => KEY_FN_F,
            Self::Clear => KEY_CLEAR,
            Self::ThumbUp => KEY_FN_1,
            Self::ThumbDown => KEY_FN_2,
            Self::RfPairGhost => KEY_FN_B,
            Self::NewBatteriesInserted => KEY_F6,
            Self::GracefulShutdown => KEY_F7,
            Self::LowBattery => KEY_BATTERY,
            Self::Undefined => KEY_UNKNOWN,
        }
    }
}

impl TryFrom<RawIrKey> for IrKeyEvent {
    type Error = InputError;

    fn try_from(raw: RawIrKey) -> Result<Self, InputError> {
        let key = IrKey::try_from(raw.code).map_err(|_| InputError::UnknownIrCode(raw.code))?;
        Ok(Self {
            evdev: key.evdev(),
            pressed: raw.pressed,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct RawIrKey {
    code: u32,
    pressed: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IrKeyEvent {
    pub evdev: u32,
    pub pressed: bool,
}

type IrQueue = Arc<RwLock<VecDeque<RawIrKey>>>;

/// Handed to the IR receiver thread.
#[derive(Clone)]
pub struct IrSender {
    queue: IrQueue,
    ping: Ping,
}

impl fmt::Debug for IrSender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IrSender").finish_non_exhaustive()
    }
}

impl IrSender {
    pub fn send(&self, code: u32, pressed: bool) {
        self.queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(RawIrKey { code, pressed });
        self.ping.ping();
    }
}

#[derive(Debug)]
pub struct IrSource {
    queue: IrQueue,
    seq: EventSequence,
    warned: WarnOnce,
}

impl IrSource {
    /// Stamps drained events from `seq` instead of a private counter.
    pub fn with_sequence(self, seq: EventSequence) -> Self {
        Self { seq, ..self }
    }

    pub fn has_warned_unknown(&self) -> bool {
        self.warned.has_warned("unknown-ir-code")
    }
}

impl InputSource for IrSource {
    type Event = IrKeyEvent;

    fn drain(&mut self) -> Vec<Sequenced<IrKeyEvent>> {
        let raw: Vec<RawIrKey> = self
            .queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let mut events = Vec::with_capacity(raw.len());
        for raw in raw {
            match IrKeyEvent::try_from(raw) {
                Ok(event) => events.push(self.seq.stamp(event)),
                Err(e) => {
                    self.warned.report("unknown-ir-code", format!("dropping IR key: {e}"));
                },
            }
        }
        events
    }
}

/// The ping source must be registered with the event loop for the platform
/// thread to notice queued keys.
pub fn ir_channel() -> Result<(IrSender, IrSource, PingSource)> {
    let (ping, ping_source) = make_ping().context(loc!(), "unable to create IR ping")?;
    let queue = IrQueue::default();
    Ok((
        IrSender {
            queue: queue.clone(),
            ping,
        },
        IrSource {
            queue,
            seq: EventSequence::default(),
            warned: WarnOnce::new(),
        },
        ping_source,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_table() {
        assert_eq!(IrKey::try_from(0x10).ok(), Some(IrKey::ArrowUp));
        assert_eq!(u32::from(IrKey::Blue), 0x53);
        assert_eq!(IrKey::Menu.evdev(), evdev::KEY_HOME);
        assert_eq!(IrKey::Back.evdev(), evdev::KEY_BACKSPACE);
        assert_eq!(IrKey::Digit0.evdev(), evdev::KEY_0);
        assert_eq!(IrKey::try_from(0xc3).ok(), Some(IrKey::LowBattery));
        assert_eq!(IrKey::OnDemand.evdev(), evdev::KEY_COFFEE);
        assert_eq!(IrKey::Teletext.evdev(), 0x277);
        assert_eq!(IrKey::Profile.evdev(), evdev::KEY_FN);
        assert_eq!(IrKey::TvRadio.evdev(), IrKey::Live.evdev());
    }

    #[test]
    fn unknown_code_is_an_input_error() {
        let raw = RawIrKey {
            code: 0xffff,
            pressed: true,
        };
        assert_eq!(
            IrKeyEvent::try_from(raw),
            Err(InputError::UnknownIrCode(0xffff))
        );
    }

    #[test]
    fn drains_across_threads_in_order() {
        let (sender, mut source, _ping) = ir_channel().unwrap();
        let thread_sender = sender.clone();
        std::thread::spawn(move || {
            thread_sender.send(IrKey::Ok as u32, true);
            thread_sender.send(IrKey::Ok as u32, false);
        })
        .join()
        .unwrap();
        sender.send(0xbad, true);
        sender.send(IrKey::Red as u32, true);

        let events = source.drain();
        let keys: Vec<(u32, bool)> = events.iter().map(|e| (e.event.evdev, e.event.pressed)).collect();
        assert_eq!(
            keys,
            vec![
                (evdev::KEY_OK, true),
                (evdev::KEY_OK, false),
                (evdev::KEY_RED, true),
            ]
        );
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(source.has_warned_unknown());
        assert!(source.drain().is_empty());
    }

    #[test]
    fn shared_sequence_is_used() {
        let (sender, source, _ping) = ir_channel().unwrap();
        let seq = EventSequence::default();
        seq.next();
        seq.next();
        let mut source = source.with_sequence(seq.clone());
        sender.send(IrKey::Mute as u32, true);
        assert_eq!(source.drain()[0].seq, 2);
        assert_eq!(seq.next(), 3);
    }
}
