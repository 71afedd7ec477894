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

use std::backtrace::Backtrace;
use std::env;
use std::fs::File;
use std::io;
use std::panic;
use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use nix::sys::signal;
use nix::sys::signal::SigHandler;
use nix::sys::signal::Signal;
use nix::time::ClockId;
use nix::time::clock_gettime;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::prelude::*;

pub fn configure_tracing<P: AsRef<Path>>(
    stderr_log_level: Level,
    path: Option<P>,
    file_log_level: Level,
) -> Result<()> {
    let mut layers = Vec::new();

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr.with_max_level(stderr_log_level))
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    if let Some(path) = path {
        let path = path.as_ref();
        let log_file = File::create(path)
            .with_context(loc!(), || format!("unable to create log file {path:?}"))?;
        let log_file_writer = Mutex::new(log_file).with_max_level(file_log_level);
        let layer = layer.map_writer(|w| w.and(log_file_writer));
        layers.push(layer.boxed());
    } else {
        layers.push(layer.boxed());
    };

    #[cfg(feature = "tracy")]
    {
        layers
            .push(tracing_tracy::TracyLayer::new(tracing_tracy::DefaultConfig::default()).boxed());
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

/// The engine runs its own threads; a panic in any of our callbacks on those
/// threads must take the whole process down rather than leave the platform
/// thread waiting on a frame that will never come.
pub fn exit_on_thread_panic() {
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = Backtrace::capture();
        error!("panic!:\n{panic_info}\n{backtrace}");
        orig_hook(panic_info);
        process::exit(1);
    }));
}

/// Writes to a compositor that went away must surface as EPIPE, not kill us.
pub fn ignore_sigpipe() -> Result<()> {
    // SAFETY: SigIgn installs no handler code, so there is nothing that could
    // run in signal context.
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .context(loc!(), "unable to ignore SIGPIPE")?;
    Ok(())
}

/// Directory containing the running executable.
pub fn executable_dir() -> Result<PathBuf> {
    let exe = env::current_exe().context(loc!(), "unable to locate the executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("executable path {exe:?} has no parent"))
}

/// CLOCK_MONOTONIC in nanoseconds. This is the clock the engine's frame
/// timestamps are expressed in.
pub fn monotonic_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => (ts.tv_sec() as u64) * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(e) => {
            error!("clock_gettime(CLOCK_MONOTONIC) failed: {e}");
            0
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn executable_dir_exists() {
        assert!(executable_dir().unwrap().is_dir());
    }
}
