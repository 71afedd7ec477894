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

use std::collections::HashSet;
use std::fmt;
use std::fmt::Display;

use anyhow::Context;

use crate::prelude::*;

// https://stackoverflow.com/questions/38088067/equivalent-of-func-or-function-in-rust
#[macro_export]
macro_rules! fname {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        // loc!() is used on every error path, so it must not panic; keep the
        // full type name if the suffix is ever missing.
        name.strip_suffix("::f").unwrap_or(name)
    }};
}
pub use fname;

/// Source location attached to errors and log lines, rendered as
/// `function at file:line`.
#[derive(Clone, Copy, Debug)]
pub struct Location {
    pub fname: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}:{}", self.fname, self.file, self.line)
    }
}

#[macro_export]
macro_rules! loc {
    () => {
        Location {
            fname: fname!(),
            file: file!(),
            line: line!(),
        }
    };
}
pub use loc;

pub trait LocationContextExt<R, T, E>: Context<T, E> {
    fn with_context<C, F>(self, loc: Location, context: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;

    fn context<C>(self, loc: Location, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    fn location(self, loc: Location) -> Result<T>;
}

impl<R, T, E> LocationContextExt<R, T, E> for R
where
    R: Context<T, E>,
{
    fn with_context<C, F>(self, loc: Location, context: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        Context::with_context(self, || format!("{}: {}", loc, context()))
    }

    fn context<C>(self, loc: Location, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        LocationContextExt::with_context(self, loc, || context)
    }

    fn location(self, loc: Location) -> Result<T> {
        Context::with_context(self, || loc)
    }
}

/// Log a Result and then return it. Useful in cases such as
/// `egl.make_current().warn(loc!()).is_ok()`.
pub trait LogExt<T, E>: Context<T, E> {
    fn debug(self, loc: Location) -> Result<T>;
    fn warn(self, loc: Location) -> Result<T>;
    fn error(self, loc: Location) -> Result<T>;
    fn log(self, loc: Location) -> Result<T>;
}

impl<R, T, E> LogExt<T, E> for R
where
    R: Context<T, E>,
{
    fn debug(self, loc: Location) -> Result<T> {
        let res = self.location(loc);
        if let Err(e) = &res {
            debug!("{e:?}");
        }
        res
    }

    fn warn(self, loc: Location) -> Result<T> {
        let res = self.location(loc);
        if let Err(e) = &res {
            warn!("{e:?}");
        }
        res
    }

    fn error(self, loc: Location) -> Result<T> {
        let res = self.location(loc);
        if let Err(e) = &res {
            error!("{e:?}");
        }
        res
    }

    fn log(self, loc: Location) -> Result<T> {
        self.error(loc)
    }
}

/// For callbacks that can't return a Result: Wayland dispatch, calloop
/// sources, and the extern "C" callbacks handed to the engine.
pub trait LogAndIgnoreExt<T, E>: LogExt<T, E> {
    fn debug_and_ignore(self, loc: Location);
    fn warn_and_ignore(self, loc: Location);
    fn log_and_ignore(self, loc: Location);
}

impl<R, T, E> LogAndIgnoreExt<T, E> for R
where
    R: Context<T, E>,
{
    fn debug_and_ignore(self, loc: Location) {
        _ = self.debug(loc);
    }

    fn warn_and_ignore(self, loc: Location) {
        _ = self.warn(loc);
    }

    fn log_and_ignore(self, loc: Location) {
        _ = self.log(loc);
    }
}

/// Like ?, but for functions which return ().
#[macro_export]
macro_rules! log_and_return {
    ($expression:expr) => {
        match $expression {
            Ok(val) => val,
            Err(e) => {
                error!("{e:?}");
                return;
            },
        }
    };
}
pub use log_and_return;

#[macro_export]
macro_rules! warn_and_return {
    ($expression:expr) => {
        match $expression {
            Ok(val) => val,
            Err(e) => {
                warn!("{e:?}");
                return;
            },
        }
    };
}
pub use warn_and_return;

/// Recoverable conditions that repeat at input or frame rate are logged at
/// warn the first time each class is seen and at debug afterwards.
#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: HashSet<&'static str>,
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `class` is reported.
    pub fn report(&mut self, class: &'static str, msg: impl Display) -> bool {
        if self.seen.insert(class) {
            warn!("{msg}");
            true
        } else {
            debug!("{msg}");
            false
        }
    }

    pub fn has_warned(&self, class: &'static str) -> bool {
        self.seen.contains(class)
    }
}
