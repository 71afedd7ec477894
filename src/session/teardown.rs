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

use crate::prelude::*;

type Release<S> = Box<dyn FnOnce(&mut S)>;

/// Destructors for acquired resources, run in reverse acquisition order.
pub struct TeardownStack<S> {
    entries: Vec<(&'static str, Release<S>)>,
}

impl<S> Default for TeardownStack<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S> fmt::Debug for TeardownStack<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

impl<S> TeardownStack<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, release: impl FnOnce(&mut S) + 'static) {
        debug!("acquired {name}");
        self.entries.push((name, Box::new(release)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unwind(mut self, state: &mut S) {
        while let Some((name, release)) = self.entries.pop() {
            debug!("releasing {name}");
            release(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwinds_in_reverse() {
        let mut stack = TeardownStack::<Vec<&'static str>>::new();
        for name in ["window", "presentation", "input devices", "egl"] {
            stack.push(name, move |released| released.push(name));
        }
        assert_eq!(stack.len(), 4);

        let mut released = Vec::new();
        stack.unwind(&mut released);
        assert_eq!(released, ["egl", "input devices", "presentation", "window"]);
    }

    #[test]
    fn empty_stack_is_a_no_op() {
        let stack = TeardownStack::<u32>::default();
        assert!(stack.is_empty());
        let mut state = 7;
        stack.unwind(&mut state);
        assert_eq!(state, 7);
    }
}
