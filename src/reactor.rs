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

//! The platform thread's event loop.

use std::io;
use std::os::unix::net::UnixStream;

use calloop::EventLoop;
use calloop::Interest;
use calloop::LoopHandle;
use calloop::Mode;
use calloop::PostAction;
use calloop::RegistrationToken;
use calloop::generic::Generic;
use calloop::ping::PingSource;
use calloop::signals::Signal;
use calloop::signals::Signals;
use smithay_client_toolkit::reexports::calloop_wayland_source::WaylandSource;
use smithay_client_toolkit::reexports::client::Connection;
use smithay_client_toolkit::reexports::client::EventQueue;

use crate::prelude::*;
use crate::session::EmbedderState;

/// What the reactor drives.
pub trait ReactorState: 'static {
    /// The self-pipe became readable. An error stops the loop.
    fn on_vsync_wakeup(&mut self, wakeups: &UnixStream) -> io::Result<()>;

    fn drain_ir(&mut self);

    /// Called after every loop iteration.
    fn flush_to_engine(&mut self);

    fn stop(&mut self);

    fn is_stopping(&self) -> bool;

    fn cancel_repeat(&mut self);

    fn teardown(&mut self);
}

impl ReactorState for EmbedderState {
    fn on_vsync_wakeup(&mut self, wakeups: &UnixStream) -> io::Result<()> {
        EmbedderState::on_vsync_wakeup(self, wakeups)
    }

    fn drain_ir(&mut self) {
        EmbedderState::drain_ir(self)
    }

    fn flush_to_engine(&mut self) {
        EmbedderState::flush_to_engine(self)
    }

    fn stop(&mut self) {
        EmbedderState::stop(self)
    }

    fn is_stopping(&self) -> bool {
        EmbedderState::is_stopping(self)
    }

    fn cancel_repeat(&mut self) {
        EmbedderState::cancel_repeat(self)
    }

    fn teardown(&mut self) {
        EmbedderState::teardown(self)
    }
}

pub struct Reactor<S: 'static> {
    event_loop: EventLoop<'static, S>,
    sources: Vec<(&'static str, RegistrationToken)>,
}

impl<S> std::fmt::Debug for Reactor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl<S: ReactorState> Reactor<S> {
    /// Creates the loop and blocks SIGINT/SIGTERM on the calling thread.
    /// Threads spawned afterwards inherit the mask, so this has to happen
    /// before the engine starts.
    pub fn new() -> Result<Self> {
        let event_loop = EventLoop::try_new().location(loc!())?;
        let mut reactor = Self {
            event_loop,
            sources: Vec::new(),
        };
        let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
            .context(loc!(), "unable to block SIGINT and SIGTERM")?;
        let token = reactor
            .event_loop
            .handle()
            .insert_source(signals, |event, _, state: &mut S| {
                let sig = event.signal();
                info!("received signal {sig:?}, exiting");
                state.stop();
            })
            .map_err(|e| anyhow!("insert_source(signals) failed: {e:?}"))?;
        reactor.sources.push(("signals", token));
        Ok(reactor)
    }

    pub fn handle(&self) -> LoopHandle<'static, S> {
        self.event_loop.handle()
    }

    pub fn insert_wayland(&mut self, conn: Connection, queue: EventQueue<S>) -> Result<()> {
        let token = WaylandSource::new(conn, queue)
            .insert(self.event_loop.handle())
            .map_err(|e| anyhow!("insert_source(wayland) failed: {e}"))?;
        self.sources.push(("wayland", token));
        Ok(())
    }

    pub fn insert_vsync_wakeups(&mut self, wakeups: UnixStream) -> Result<()> {
        let token = self
            .event_loop
            .handle()
            .insert_source(
                Generic::new(wakeups, Interest::READ, Mode::Level),
                |_, wakeups, state: &mut S| match state.on_vsync_wakeup(wakeups.as_ref()) {
                    Ok(()) => Ok(PostAction::Continue),
                    Err(e) => {
                        error!("vsync self-pipe failed: {e}");
                        state.stop();
                        Ok(PostAction::Remove)
                    },
                },
            )
            .map_err(|e| anyhow!("insert_source(vsync wakeups) failed: {e:?}"))?;
        self.sources.push(("vsync wakeups", token));
        Ok(())
    }

    pub fn insert_ir(&mut self, ping: PingSource) -> Result<()> {
        let token = self
            .event_loop
            .handle()
            .insert_source(ping, |(), _, state: &mut S| state.drain_ir())
            .map_err(|e| anyhow!("insert_source(ir) failed: {e:?}"))?;
        self.sources.push(("ir", token));
        Ok(())
    }

    /// Runs until something asks `state` to stop.
    pub fn run(&mut self, state: &mut S) -> Result<()> {
        if state.is_stopping() {
            return Ok(());
        }
        let signal = self.event_loop.get_signal();
        self.event_loop
            .run(None, state, |state| {
                state.flush_to_engine();
                if state.is_stopping() {
                    signal.stop();
                }
            })
            .location(loc!())
    }

    /// Removes every source, newest first, drops the loop, then tears the
    /// session down.
    pub fn finish(mut self, state: &mut S) {
        state.cancel_repeat();
        let handle = self.event_loop.handle();
        while let Some((name, token)) = self.sources.pop() {
            debug!("removing {name} source");
            handle.remove(token);
        }
        drop(handle);
        drop(self.event_loop);
        state.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::input::ir;

    #[derive(Debug, Default)]
    struct FakeState {
        wakeups: usize,
        ir_drains: usize,
        flushes: usize,
        stopping: bool,
        stop_after_wakeups: Option<usize>,
        torn_down: bool,
        repeat_cancelled: bool,
    }

    impl ReactorState for FakeState {
        fn on_vsync_wakeup(&mut self, wakeups: &UnixStream) -> io::Result<()> {
            crate::pacer::drain_wakeups(wakeups)?;
            self.wakeups += 1;
            if self.stop_after_wakeups == Some(self.wakeups) {
                self.stopping = true;
            }
            Ok(())
        }

        fn drain_ir(&mut self) {
            self.ir_drains += 1;
            self.stopping = true;
        }

        fn flush_to_engine(&mut self) {
            self.flushes += 1;
        }

        fn stop(&mut self) {
            self.stopping = true;
        }

        fn is_stopping(&self) -> bool {
            self.stopping
        }

        fn cancel_repeat(&mut self) {
            self.repeat_cancelled = true;
        }

        fn teardown(&mut self) {
            self.torn_down = true;
        }
    }

    #[test]
    fn vsync_wakeup_reaches_state() {
        let mut reactor = Reactor::<FakeState>::new().unwrap();
        let (mut wake, readable) = UnixStream::pair().unwrap();
        readable.set_nonblocking(true).unwrap();
        reactor.insert_vsync_wakeups(readable).unwrap();

        wake.write_all(&[1, 1]).unwrap();
        let mut state = FakeState {
            stop_after_wakeups: Some(1),
            ..Default::default()
        };
        reactor.run(&mut state).unwrap();
        assert_eq!(state.wakeups, 1);
        assert!(state.flushes >= 1);

        reactor.finish(&mut state);
        assert!(state.repeat_cancelled);
        assert!(state.torn_down);
    }

    #[test]
    fn closed_self_pipe_stops_the_loop() {
        let mut reactor = Reactor::<FakeState>::new().unwrap();
        let (wake, readable) = UnixStream::pair().unwrap();
        readable.set_nonblocking(true).unwrap();
        reactor.insert_vsync_wakeups(readable).unwrap();
        drop(wake);

        let mut state = FakeState::default();
        reactor.run(&mut state).unwrap();
        assert!(state.stopping);
        assert_eq!(state.wakeups, 0);
    }

    #[test]
    fn ir_ping_drains_ir() {
        let mut reactor = Reactor::<FakeState>::new().unwrap();
        let (sender, _source, ping) = ir::ir_channel().unwrap();
        reactor.insert_ir(ping).unwrap();
        sender.send(ir::IrKey::Ok.into(), true);

        let mut state = FakeState::default();
        reactor.run(&mut state).unwrap();
        assert_eq!(state.ir_drains, 1);
    }

    #[test]
    fn already_stopping_state_does_not_run() {
        let mut reactor = Reactor::<FakeState>::new().unwrap();
        let mut state = FakeState {
            stopping: true,
            ..Default::default()
        };
        reactor.run(&mut state).unwrap();
        assert_eq!(state.flushes, 0);
    }
}
