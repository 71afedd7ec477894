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

use crate::config;
use crate::engine::Engine;
use crate::engine::WindowMetrics;
use crate::engine::keyevent;
use crate::input::InputEvent;
use crate::input::KeyEvent;
use crate::input::PointerEvent;
use crate::pacer::VsyncReply;
use crate::prelude::*;
use crate::utils;

/// Owns the engine once it is running. Window metrics are held back until
/// they can be delivered, so the first thing a new engine hears about is the
/// window size.
pub struct EngineHost {
    engine: Option<Box<dyn Engine>>,
    pending_metrics: Option<WindowMetrics>,
    key_channel: String,
}

impl fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EngineHost")
            .field("started", &self.is_started())
            .field("pending_metrics", &self.pending_metrics)
            .field("key_channel", &self.key_channel)
            .finish()
    }
}

impl EngineHost {
    pub fn new(key_channel: impl Into<String>) -> Self {
        Self {
            engine: None,
            pending_metrics: None,
            key_channel: key_channel.into(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_some()
    }

    pub fn attach(&mut self, engine: Box<dyn Engine>) -> Result<()> {
        self.engine = Some(engine);
        self.flush_metrics().location(loc!())
    }

    /// Later sizes replace earlier undelivered ones.
    pub fn set_window_metrics(&mut self, metrics: WindowMetrics) {
        self.pending_metrics = Some(metrics);
    }

    pub fn pending_metrics(&self) -> Option<WindowMetrics> {
        self.pending_metrics
    }

    pub fn flush_metrics(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        if let Some(metrics) = self.pending_metrics.take() {
            debug!(
                "window metrics {}x{} ratio {}",
                metrics.width, metrics.height, metrics.pixel_ratio
            );
            engine.send_window_metrics(metrics).location(loc!())?;
        }
        Ok(())
    }

    pub fn send_input(&mut self, event: InputEvent) -> Result<()> {
        match event {
            InputEvent::Key(key) => self.send_key(&key),
            InputEvent::Pointer(pointer) => self.send_pointer(&pointer),
        }
    }

    pub fn send_key(&mut self, event: &KeyEvent) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            debug!("engine not running, dropping key");
            return Ok(());
        };
        let message = keyevent::encode(event).location(loc!())?;
        engine
            .send_platform_message(&self.key_channel, &message)
            .with_context(loc!(), || {
                if config::get_log_priv_data() {
                    format!(
                        "error sending key message {}",
                        String::from_utf8_lossy(&message)
                    )
                } else {
                    "error sending key message".to_string()
                }
            })
    }

    pub fn send_pointer(&mut self, event: &PointerEvent) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            debug!("engine not running, dropping pointer event");
            return Ok(());
        };
        engine.send_pointer_event(event).location(loc!())
    }

    pub fn on_vsync(&mut self, reply: VsyncReply) -> Result<()> {
        let engine = self
            .engine
            .as_mut()
            .context(loc!(), "vsync reply with no engine attached")?;
        engine.on_vsync(reply).location(loc!())
    }

    /// The engine clock when running, otherwise CLOCK_MONOTONIC, which is
    /// what the engine uses as well.
    pub fn now_ns(&self) -> u64 {
        match &self.engine {
            Some(engine) => engine.current_time_ns(),
            None => utils::monotonic_ns(),
        }
    }

    /// No-op when no engine was ever attached. A failed shutdown is logged
    /// and otherwise ignored.
    pub fn shutdown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            info!("shutting down engine");
            engine.shutdown().log_and_ignore(loc!());
        }
    }
}

impl Drop for EngineHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::input::InputSourceTag;
    use crate::input::KeyPhase;
    use crate::input::Modifiers;
    use crate::input::PointerPhase;

    #[derive(Clone, Debug, PartialEq)]
    pub(crate) enum Call {
        Metrics(WindowMetrics),
        Pointer(PointerEvent),
        Message(String, String),
        Vsync(VsyncReply),
        Shutdown,
    }

    /// Records every call made into it.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct RecordingEngine {
        pub calls: Rc<RefCell<Vec<Call>>>,
        pub fail_shutdown: bool,
        pub now: u64,
    }

    impl Engine for RecordingEngine {
        fn send_window_metrics(&mut self, metrics: WindowMetrics) -> Result<()> {
            self.calls.borrow_mut().push(Call::Metrics(metrics));
            Ok(())
        }

        fn send_pointer_event(&mut self, event: &PointerEvent) -> Result<()> {
            self.calls.borrow_mut().push(Call::Pointer(*event));
            Ok(())
        }

        fn send_platform_message(&mut self, channel: &str, message: &[u8]) -> Result<()> {
            self.calls.borrow_mut().push(Call::Message(
                channel.to_string(),
                String::from_utf8(message.to_vec())?,
            ));
            Ok(())
        }

        fn on_vsync(&mut self, reply: VsyncReply) -> Result<()> {
            self.calls.borrow_mut().push(Call::Vsync(reply));
            Ok(())
        }

        fn current_time_ns(&self) -> u64 {
            self.now
        }

        fn shutdown(&mut self) -> Result<()> {
            self.calls.borrow_mut().push(Call::Shutdown);
            if self.fail_shutdown {
                bail!("engine refused to shut down");
            }
            Ok(())
        }
    }

    fn key_down() -> KeyEvent {
        KeyEvent {
            phase: KeyPhase::Down,
            evdev: 30,
            xkb_keycode: 38,
            utf32: 'a' as u32,
            modifiers: Modifiers::default(),
            source: InputSourceTag::Keyboard,
        }
    }

    #[test]
    fn metrics_are_buffered_until_attach() {
        let engine = RecordingEngine::default();
        let calls = engine.calls.clone();
        let mut host = EngineHost::new("flutter/keyevent");
        host.set_window_metrics(WindowMetrics::from_size(800, 600));
        host.set_window_metrics(WindowMetrics::from_size(1920, 1080));
        host.flush_metrics().unwrap();
        assert_eq!(host.pending_metrics(), Some(WindowMetrics::from_size(1920, 1080)));

        host.attach(Box::new(engine)).unwrap();
        host.send_key(&key_down()).unwrap();
        let calls = calls.borrow();
        assert_eq!(calls[0], Call::Metrics(WindowMetrics::from_size(1920, 1080)));
        assert!(matches!(&calls[1], Call::Message(channel, _) if channel == "flutter/keyevent"));
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn input_before_start_is_dropped() {
        let mut host = EngineHost::new("keys");
        host.send_key(&key_down()).unwrap();
        assert!(!host.is_started());
        assert!(host.on_vsync(VsyncReply {
            baton: 1,
            frame_start_ns: 0,
            frame_target_ns: 0,
        })
        .is_err());
    }

    #[test]
    fn key_messages_use_configured_channel() {
        let engine = RecordingEngine::default();
        let calls = engine.calls.clone();
        let mut host = EngineHost::new("custom/keys");
        host.attach(Box::new(engine)).unwrap();
        host.send_input(InputEvent::Key(key_down())).unwrap();
        let calls = calls.borrow();
        let Call::Message(channel, json) = &calls[0] else {
            panic!("expected a platform message, got {calls:?}");
        };
        assert_eq!(channel, "custom/keys");
        assert!(json.contains(r#""type":"keydown""#), "{json}");
    }

    #[test]
    fn pointer_and_vsync_are_forwarded() {
        let engine = RecordingEngine {
            now: 77,
            ..Default::default()
        };
        let calls = engine.calls.clone();
        let mut host = EngineHost::new("keys");
        host.attach(Box::new(engine)).unwrap();
        assert_eq!(host.now_ns(), 77);

        let pointer = PointerEvent {
            phase: PointerPhase::Down,
            timestamp_us: 1000,
            x: 1.0,
            y: 2.0,
            device: 0,
            buttons: 1,
        };
        let reply = VsyncReply {
            baton: 5,
            frame_start_ns: 10,
            frame_target_ns: 20,
        };
        host.send_input(InputEvent::Pointer(pointer)).unwrap();
        host.on_vsync(reply).unwrap();
        assert_eq!(*calls.borrow(), vec![Call::Pointer(pointer), Call::Vsync(reply)]);
    }

    #[test]
    fn shutdown_happens_once_and_only_when_attached() {
        let mut idle = EngineHost::new("keys");
        idle.shutdown();

        let engine = RecordingEngine {
            fail_shutdown: true,
            ..Default::default()
        };
        let calls = engine.calls.clone();
        let mut host = EngineHost::new("keys");
        host.attach(Box::new(engine)).unwrap();
        host.shutdown();
        host.shutdown();
        drop(host);
        assert_eq!(*calls.borrow(), vec![Call::Shutdown]);
    }
}
