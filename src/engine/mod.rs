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

//! The boundary between the embedder and the engine it hosts.

use std::ffi::CStr;
use std::ffi::c_void;

use crate::input::PointerEvent;
use crate::pacer::VsyncReply;
use crate::prelude::*;

pub mod embedder;
pub mod host;
pub mod keyevent;
pub mod launch;

pub use host::EngineHost;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowMetrics {
    pub width: usize,
    pub height: usize,
    pub pixel_ratio: f64,
}

impl WindowMetrics {
    /// Pixel ratio is fixed at 1.0; the engine lays out in physical pixels.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            height: height as usize,
            pixel_ratio: 1.0,
        }
    }
}

/// Calls from the embedder into a running engine.
pub trait Engine {
    fn send_window_metrics(&mut self, metrics: WindowMetrics) -> Result<()>;

    fn send_pointer_event(&mut self, event: &PointerEvent) -> Result<()>;

    fn send_platform_message(&mut self, channel: &str, message: &[u8]) -> Result<()>;

    fn on_vsync(&mut self, reply: VsyncReply) -> Result<()>;

    /// The engine's clock, which vsync targets are expressed in.
    fn current_time_ns(&self) -> u64;

    fn shutdown(&mut self) -> Result<()>;
}

/// Calls from the engine into the embedder's GL state. The engine may invoke
/// these from any of its threads.
pub trait RenderDelegate: Send + Sync {
    fn make_current(&self) -> bool;

    fn clear_current(&self) -> bool;

    fn make_resource_current(&self) -> bool;

    fn present(&self) -> bool;

    /// Rendering always targets the window surface's default framebuffer.
    fn target_framebuffer(&self) -> u32 {
        0
    }

    /// Null when the symbol can't be found.
    fn resolve_proc_address(&self, name: &CStr) -> *mut c_void;
}
