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

//! Frame pacing.
//!
//! The engine asks for a frame from one of its own threads by handing over an
//! opaque baton. The baton is parked in an atomic slot and a byte is written to
//! a socket pair to wake the platform thread, which computes the next vblank
//! target from the last presentation timestamp and hands the baton back to the
//! engine together with the target and deadline. At most one baton is ever
//! outstanding.

use std::io;
use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::AtomicIsize;
use std::sync::atomic::Ordering;

use nix::time::ClockId;

use crate::prelude::*;

pub const NS_PER_SEC: u64 = 1_000_000_000;
/// 60 Hz, used until the output reports a mode and whenever it reports a
/// refresh of 0.
pub const DEFAULT_VBLANK_NS: u64 = 16_666_666;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("vsync requested with a zero baton")]
    ZeroBaton,
    #[error("vsync requested with baton {offered:#x} while baton {pending:#x} is still pending")]
    DoubleBaton { pending: isize, offered: isize },
    #[error("engine call {call} failed with result {code}")]
    EngineCall { call: &'static str, code: i32 },
}

/// Holds the engine's outstanding frame request. 0 means none.
#[derive(Debug, Default)]
pub struct BatonSlot(AtomicIsize);

impl BatonSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, baton: isize) -> Result<(), ProtocolError> {
        if baton == 0 {
            return Err(ProtocolError::ZeroBaton);
        }
        self.0
            .compare_exchange(0, baton, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|pending| ProtocolError::DoubleBaton {
                pending,
                offered: baton,
            })
    }

    /// Claims the outstanding baton, leaving the slot empty.
    pub fn take(&self) -> Option<isize> {
        match self.0.swap(0, Ordering::AcqRel) {
            0 => None,
            baton => Some(baton),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

/// The engine-thread half of the pacer. Cheap to clone, safe to call from any
/// thread.
#[derive(Clone, Debug)]
pub struct FrameRequester {
    slot: Arc<BatonSlot>,
    wake: Arc<UnixStream>,
}

impl FrameRequester {
    pub fn request_frame(&self, baton: isize) -> Result<(), ProtocolError> {
        self.slot.offer(baton)?;
        self.wake().log_and_ignore(loc!());
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        loop {
            match (&*self.wake).write(&[1]) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // The pipe is full, so a wakeup is already pending.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Creates the self-pipe. The returned stream is the platform-thread end and
/// is meant to be registered with the event loop.
pub fn vsync_channel(slot: Arc<BatonSlot>) -> Result<(FrameRequester, UnixStream)> {
    let (wake, readable) = UnixStream::pair().context(loc!(), "unable to create vsync socket pair")?;
    wake.set_nonblocking(true).location(loc!())?;
    readable.set_nonblocking(true).location(loc!())?;
    Ok((
        FrameRequester {
            slot,
            wake: Arc::new(wake),
        },
        readable,
    ))
}

/// Empties the platform-thread end of the self-pipe. Returns the number of
/// wakeup bytes consumed.
pub fn drain_wakeups(mut stream: &UnixStream) -> io::Result<usize> {
    let mut buf = [0u8; 64];
    let mut total = 0;
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) => return Err(e),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VsyncReply {
    pub baton: isize,
    pub frame_start_ns: u64,
    pub frame_target_ns: u64,
}

#[derive(Debug)]
pub struct FramePacer {
    slot: Arc<BatonSlot>,
    vblank_ns: u64,
    last_frame_ns: u64,
    clock_id: Option<u32>,
    warned: WarnOnce,
}

impl FramePacer {
    pub fn new(slot: Arc<BatonSlot>) -> Self {
        Self {
            slot,
            vblank_ns: DEFAULT_VBLANK_NS,
            last_frame_ns: 0,
            clock_id: None,
            warned: WarnOnce::new(),
        }
    }

    pub fn vblank_ns(&self) -> u64 {
        self.vblank_ns
    }

    pub fn last_frame_ns(&self) -> u64 {
        self.last_frame_ns
    }

    pub fn clock_id(&self) -> Option<u32> {
        self.clock_id
    }

    pub fn set_vblank_ns(&mut self, vblank_ns: u64) {
        self.vblank_ns = vblank_ns.max(1);
    }

    /// Takes an output refresh rate in mHz, as wl_output reports it.
    pub fn set_refresh_mhz(&mut self, refresh_mhz: i32) {
        let vblank_ns = vblank_ns_from_refresh(refresh_mhz, &mut self.warned);
        self.set_vblank_ns(vblank_ns);
    }

    pub fn set_clock_id(&mut self, clock_id: u32) {
        self.clock_id = Some(clock_id);
        if clock_id as i64 != ClockId::CLOCK_MONOTONIC.as_raw() as i64 {
            self.warned.report(
                "presentation-clock",
                format!(
                    "presentation clock {clock_id} is not CLOCK_MONOTONIC, frame targets may drift"
                ),
            );
        }
    }

    /// Next vblank strictly after `now`, and the deadline one vblank later.
    pub fn frame_times(&self, now: u64) -> (u64, u64) {
        let phase = if self.last_frame_ns == 0 || self.last_frame_ns > now {
            0
        } else {
            (now - self.last_frame_ns) % self.vblank_ns
        };
        let target = now + (self.vblank_ns - phase);
        (target, target + self.vblank_ns)
    }

    /// Claims the pending baton, if any, and computes its reply.
    pub fn on_wakeup(&mut self, now: u64) -> Option<VsyncReply> {
        let (frame_start_ns, frame_target_ns) = self.frame_times(now);
        let baton = self.slot.take()?;
        Some(VsyncReply {
            baton,
            frame_start_ns,
            frame_target_ns,
        })
    }

    /// wp_presentation_feedback.presented. `refresh_ns` is 0 when the
    /// compositor doesn't know.
    pub fn on_presented(&mut self, tv_sec_hi: u32, tv_sec_lo: u32, tv_nsec: u32, refresh_ns: u32) {
        let secs = ((tv_sec_hi as u64) << 32) | tv_sec_lo as u64;
        self.last_frame_ns = secs
            .saturating_mul(NS_PER_SEC)
            .saturating_add(tv_nsec as u64);
        if refresh_ns != 0 && (refresh_ns as u64).abs_diff(self.vblank_ns) > 1_000 {
            self.warned.report(
                "refresh-mismatch",
                format!(
                    "presentation refresh {refresh_ns}ns disagrees with output vblank {}ns",
                    self.vblank_ns
                ),
            );
        }
    }

    /// Frame-callback fallback when wp_presentation isn't available.
    pub fn on_frame_done(&mut self, now: u64) {
        self.last_frame_ns = now;
    }
}

fn vblank_ns_from_refresh(refresh_mhz: i32, warned: &mut WarnOnce) -> u64 {
    if refresh_mhz <= 0 {
        warned.report(
            "zero-refresh",
            format!("output reported refresh {refresh_mhz}mHz, assuming 60Hz"),
        );
        return DEFAULT_VBLANK_NS;
    }
    1_000_000_000_000 / refresh_mhz as u64
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn pacer() -> (Arc<BatonSlot>, FramePacer) {
        let slot = Arc::new(BatonSlot::new());
        (slot.clone(), FramePacer::new(slot))
    }

    #[test]
    fn basic_frame() {
        let (slot, mut pacer) = pacer();
        pacer.set_vblank_ns(16_666_667);
        pacer.on_frame_done(1_000_000_000);
        slot.offer(0x1234).unwrap();
        let reply = pacer.on_wakeup(1_010_000_000).unwrap();
        assert_eq!(
            reply,
            VsyncReply {
                baton: 0x1234,
                frame_start_ns: 1_016_666_667,
                frame_target_ns: 1_033_333_334,
            }
        );
        assert!(!slot.is_pending());
    }

    #[test]
    fn double_baton_is_rejected() {
        let slot = BatonSlot::new();
        slot.offer(7).unwrap();
        assert_eq!(
            slot.offer(9),
            Err(ProtocolError::DoubleBaton {
                pending: 7,
                offered: 9
            })
        );
        assert_eq!(slot.take(), Some(7));
        slot.offer(9).unwrap();
    }

    #[test]
    fn zero_baton_is_rejected() {
        let slot = BatonSlot::new();
        assert_eq!(slot.offer(0), Err(ProtocolError::ZeroBaton));
        assert!(!slot.is_pending());
    }

    #[test]
    fn spurious_wakeup_has_no_reply() {
        let (_slot, mut pacer) = pacer();
        assert_eq!(pacer.on_wakeup(5), None);
    }

    #[test]
    fn first_vsync_has_zero_phase() {
        let (_slot, pacer) = pacer();
        let now = 123_456_789;
        assert_eq!(
            pacer.frame_times(now),
            (now + DEFAULT_VBLANK_NS, now + 2 * DEFAULT_VBLANK_NS)
        );
    }

    #[test]
    fn presented_timestamp_spans_high_word() {
        let (_slot, mut pacer) = pacer();
        pacer.on_presented(1, 2, 500, 0);
        assert_eq!(pacer.last_frame_ns(), ((1u64 << 32) + 2) * NS_PER_SEC + 500);
    }

    #[test]
    fn refresh_mismatch_warns_once() {
        let (_slot, mut pacer) = pacer();
        pacer.on_presented(0, 1, 0, 16_666_666);
        assert!(!pacer.warned.has_warned("refresh-mismatch"));
        pacer.on_presented(0, 2, 0, 8_333_333);
        assert!(pacer.warned.has_warned("refresh-mismatch"));
    }

    #[test]
    fn refresh_rates() {
        let (_slot, mut pacer) = pacer();
        pacer.set_refresh_mhz(60_000);
        assert_eq!(pacer.vblank_ns(), 16_666_666);
        pacer.set_refresh_mhz(120_000);
        assert_eq!(pacer.vblank_ns(), 8_333_333);
        pacer.set_refresh_mhz(0);
        assert_eq!(pacer.vblank_ns(), DEFAULT_VBLANK_NS);
        assert!(pacer.warned.has_warned("zero-refresh"));
    }

    #[test]
    fn requester_wakes_reader() {
        let slot = Arc::new(BatonSlot::new());
        let (requester, readable) = vsync_channel(slot.clone()).unwrap();
        assert_eq!(drain_wakeups(&readable).unwrap(), 0);

        let thread_requester = requester.clone();
        std::thread::spawn(move || thread_requester.request_frame(42).unwrap())
            .join()
            .unwrap();

        assert_eq!(drain_wakeups(&readable).unwrap(), 1);
        assert_eq!(slot.take(), Some(42));
        assert!(requester.request_frame(0).is_err());
    }

    #[test]
    fn closed_pipe_is_reported() {
        let slot = Arc::new(BatonSlot::new());
        let (requester, readable) = vsync_channel(slot).unwrap();
        drop(requester);
        assert!(drain_wakeups(&readable).is_err());
    }

    proptest! {
        #[test]
        fn target_is_within_one_vblank(
            vblank in 1_000_000u64..50_000_000,
            last in 1u64..1_000_000_000_000,
            delta in 0u64..10_000_000_000,
        ) {
            let (_slot, mut pacer) = pacer();
            pacer.set_vblank_ns(vblank);
            pacer.on_frame_done(last);
            let now = last + delta;
            let (target, finish) = pacer.frame_times(now);
            prop_assert!(target > now);
            prop_assert!(target - now <= vblank);
            prop_assert_eq!(finish - target, vblank);
            // Targets land on the vblank grid anchored at the last frame.
            prop_assert_eq!((target - last) % vblank, 0);
        }
    }
}
