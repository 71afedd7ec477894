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

use smithay_client_toolkit::output::OutputInfo;

/// The current mode of an output, as wl_output reports it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutputMode {
    pub width: u32,
    pub height: u32,
    pub refresh_mhz: i32,
}

impl OutputMode {
    pub fn current(info: &OutputInfo) -> Option<Self> {
        let mode = info.modes.iter().find(|m| m.current)?;
        Self::new(mode.dimensions.0, mode.dimensions.1, mode.refresh_rate)
    }

    /// None for degenerate sizes.
    pub fn new(width: i32, height: i32, refresh_mhz: i32) -> Option<Self> {
        Some(Self {
            width: u32::try_from(width).ok().filter(|w| *w > 0)?,
            height: u32::try_from(height).ok().filter(|h| *h > 0)?,
            refresh_mhz,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputGeometry {
    screen: (u32, u32),
    physical_mm: (i32, i32),
    mode: Option<OutputMode>,
}

impl OutputGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: (width, height),
            physical_mm: (0, 0),
            mode: None,
        }
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    pub fn physical_mm(&self) -> (i32, i32) {
        self.physical_mm
    }

    pub fn mode(&self) -> Option<OutputMode> {
        self.mode
    }

    /// Returns whether the size changed.
    pub fn set_screen_size(&mut self, width: u32, height: u32) -> bool {
        let changed = self.screen != (width, height);
        self.screen = (width, height);
        changed
    }

    pub fn set_physical_mm(&mut self, width: i32, height: i32) {
        self.physical_mm = (width, height);
    }

    /// Records `mode`, returning it if it differs from the last one seen.
    /// Outputs re-announce their mode on every `done`.
    pub fn apply_mode(&mut self, mode: OutputMode) -> Option<OutputMode> {
        if self.mode == Some(mode) {
            return None;
        }
        self.mode = Some(mode);
        Some(mode)
    }
}
