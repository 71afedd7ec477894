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

use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use ron::Options;
use ron::extensions::Extensions;
use serde::Deserialize;
use serde::Serialize;
use tracing::Level;
use tracing::metadata::ParseLevelError;

use crate::prelude::*;

fn fallback_config_parent_dir() -> Result<PathBuf> {
    Ok(Path::join(
        &home::home_dir().ok_or(anyhow!("unable to determine home dir"))?,
        ".config",
    ))
}

pub fn default_config_file_dir() -> PathBuf {
    Path::join(
        &env::var("XDG_CONFIG_HOME")
            .ok()
            .map(Into::into)
            .or(fallback_config_parent_dir().debug(loc!()).ok())
            .unwrap_or_else(|| "/etc".into()),
        "wlembed",
    )
}

pub fn default_config_file(name: &str) -> PathBuf {
    Path::join(&default_config_file_dir(), format!("{name}.ron"))
}

pub fn maybe_read_ron_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        eprintln!("config file does not exist at {path:?}");
        return Ok(None);
    }

    let config_str = std::fs::read_to_string(path)
        .with_context(loc!(), || format!("unable to read config file {path:?}"))?;
    parse_ron(&config_str)
        .with_context(loc!(), || format!("error parsing config file {path:?}"))
        .map(Some)
}

fn parse_ron<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T> {
    Ok(Options::default()
        .with_default_extension(Extensions::IMPLICIT_SOME)
        .from_str(s)?)
}

pub fn print_default_config_and_exit<T: Serialize + Default>() -> ! {
    match ron::ser::to_string_pretty::<T>(&Default::default(), ron::ser::PrettyConfig::default())
    {
        Ok(s) => {
            println!("{s}");
            std::process::exit(0);
        },
        Err(e) => {
            eprintln!("unable to serialize the default config: {e}");
            std::process::exit(1);
        },
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerializableLevel(pub Level);

impl FromStr for SerializableLevel {
    type Err = ParseLevelError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Level::from_str(s)?))
    }
}

impl Serialize for SerializableLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for SerializableLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self(Level::from_str(&s).map_err(serde::de::Error::custom)?))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no bundle path given (usage: wlembed [OPTIONS] <BUNDLE_PATH> [ENGINE_FLAG]...)")]
    MissingBundle,
    #[error("bundle {0:?} is not a directory containing kernel_blob.bin or an AOT library")]
    InvalidBundle(PathBuf),
    #[error("ICU data not found at {0:?} or {1:?}")]
    MissingIcuData(PathBuf, PathBuf),
    #[error("invalid output mode {mode:?} in {path:?}")]
    BadOutputMode { mode: String, path: PathBuf },
}

/// weston.ini's output section uses this when it has no mode key.
const WESTON_DEFAULT_SIZE: (u32, u32) = (1280, 720);

/// Reads `mode=WxH` from the `[output]` section of a weston.ini.
pub fn display_size_from_weston_ini(path: &Path) -> Result<(u32, u32)> {
    let contents = std::fs::read_to_string(path)
        .with_context(loc!(), || format!("unable to read {path:?}"))?;
    parse_weston_output_mode(&contents, path)
}

fn parse_weston_output_mode(contents: &str, path: &Path) -> Result<(u32, u32)> {
    let mut in_output = false;
    for line in contents.lines().map(str::trim) {
        if line.starts_with('[') {
            in_output = line == "[output]";
            continue;
        }
        if !in_output {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != "mode" {
            continue;
        }
        let value = value.trim();
        let bad_mode = || ConfigError::BadOutputMode {
            mode: value.to_string(),
            path: path.to_path_buf(),
        };
        let (w, h) = value.split_once('x').ok_or_else(bad_mode)?;
        let w = w.trim().parse::<u32>().map_err(|_| bad_mode())?;
        // Modes may carry a refresh suffix, e.g. 1920x1080@60.
        let h = h.split('@').next().unwrap_or(h);
        let h = h.trim().parse::<u32>().map_err(|_| bad_mode())?;
        return Ok((w, h));
    }
    Ok(WESTON_DEFAULT_SIZE)
}

/// Key contents (scan codes, code points) are only logged when this is set.
pub static LOG_PRIV_DATA: AtomicBool = AtomicBool::new(false);

pub fn set_log_priv_data(val: bool) {
    LOG_PRIV_DATA.store(val, Ordering::Relaxed);
}

pub fn get_log_priv_data() -> bool {
    LOG_PRIV_DATA.load(Ordering::Relaxed)
}
