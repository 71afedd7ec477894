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
use std::path::PathBuf;

use clap::Parser;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use tracing::Level;

use crate::config;
use crate::config::ConfigError;
use crate::config::SerializableLevel;
use crate::prelude::*;

/// Environment variable marking this process as the device's primary UI.
pub const PRIMARY_UI_ENV: &str = "UI_PRIMARY";

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct EmbedderConfig {
    pub log_file: Option<PathBuf>,
    pub stderr_log_level: SerializableLevel,
    pub file_log_level: SerializableLevel,
    pub log_priv_data: bool,
    /// Initial window size, overridden by the output's current mode.
    pub width: u32,
    pub height: u32,
    /// Read the initial window size from this weston.ini instead.
    pub weston_ini: Option<PathBuf>,
    pub title: String,
    pub app_id: String,
    pub engine_library: PathBuf,
    pub icu_data_fallback: PathBuf,
    pub key_event_channel: String,
    pub primary_ui: bool,
    pub ir_input: bool,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            stderr_log_level: SerializableLevel(Level::INFO),
            file_log_level: SerializableLevel(Level::TRACE),
            log_priv_data: false,
            width: 800,
            height: 600,
            weston_ini: None,
            title: "wlembed".to_string(),
            app_id: "wlembed".to_string(),
            engine_library: "libflutter_engine.so".into(),
            icu_data_fallback: "/usr/share/flutter/icudtl.dat".into(),
            key_event_channel: "flutter/keyevent".to_string(),
            primary_ui: false,
            ir_input: false,
        }
    }
}

impl EmbedderConfig {
    pub fn initial_size(&self) -> Result<(u32, u32)> {
        match &self.weston_ini {
            Some(path) => config::display_size_from_weston_ini(path).location(loc!()),
            None => Ok((self.width, self.height)),
        }
    }
}

/// What the engine gets launched with. Not part of the config file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchArgs {
    pub bundle_path: PathBuf,
    pub engine_flags: Vec<String>,
}

impl LaunchArgs {
    /// The engine's argv: the bundle path in the program-name slot, then the
    /// pass-through flags verbatim.
    pub fn engine_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.engine_flags.len() + 1);
        argv.push(self.bundle_path.to_string_lossy().into_owned());
        argv.extend(self.engine_flags.iter().cloned());
        argv
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "wlembed",
    version,
    about = "Runs an engine bundle in a Wayland window.",
    after_help = "BUNDLE_PATH is the engine's asset bundle directory. Everything after it is \
                  forwarded to the engine verbatim."
)]
pub struct EmbedderArgs {
    #[arg(long, value_name = "BOOL", default_value_t = false, action = clap::ArgAction::Set)]
    pub print_default_config_and_exit: bool,

    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[arg(long, value_name = "LEVEL")]
    pub stderr_log_level: Option<SerializableLevel>,

    #[arg(long, value_name = "LEVEL")]
    pub file_log_level: Option<SerializableLevel>,

    #[arg(long, value_name = "BOOL")]
    pub log_priv_data: Option<bool>,

    #[arg(long, value_name = "PIXELS")]
    pub width: Option<u32>,

    #[arg(long, value_name = "PIXELS")]
    pub height: Option<u32>,

    #[arg(long, value_name = "PATH")]
    pub weston_ini: Option<PathBuf>,

    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,

    #[arg(long, value_name = "ID")]
    pub app_id: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub engine_library: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub icu_data_fallback: Option<PathBuf>,

    #[arg(long, value_name = "CHANNEL")]
    pub key_event_channel: Option<String>,

    #[arg(long, value_name = "BOOL")]
    pub primary_ui: Option<bool>,

    #[arg(long, value_name = "BOOL")]
    pub ir_input: Option<bool>,

    #[arg(value_name = "BUNDLE_PATH")]
    pub bundle_path: Option<PathBuf>,

    #[arg(value_name = "ENGINE_FLAG", trailing_var_arg = true, allow_hyphen_values = true)]
    pub engine_flags: Vec<String>,
}

impl EmbedderArgs {
    pub fn load_config(self) -> Result<(EmbedderConfig, LaunchArgs)> {
        if self.print_default_config_and_exit {
            config::print_default_config_and_exit::<EmbedderConfig>();
        }

        let config_file = self
            .config_file
            .clone()
            .unwrap_or_else(|| config::default_config_file("wlembed"));
        let cfg = config::maybe_read_ron_file::<EmbedderConfig>(&config_file)
            .location(loc!())?
            .unwrap_or_default();
        let primary_from_env = env::var(PRIMARY_UI_ENV).is_ok_and(|v| v == "1");
        self.merge(cfg, primary_from_env)
    }

    fn merge(
        self,
        mut cfg: EmbedderConfig,
        primary_from_env: bool,
    ) -> Result<(EmbedderConfig, LaunchArgs)> {
        if let Some(v) = self.log_file {
            cfg.log_file = Some(v);
        }
        if let Some(v) = self.stderr_log_level {
            cfg.stderr_log_level = v;
        }
        if let Some(v) = self.file_log_level {
            cfg.file_log_level = v;
        }
        if let Some(v) = self.log_priv_data {
            cfg.log_priv_data = v;
        }
        if let Some(v) = self.width {
            cfg.width = v;
        }
        if let Some(v) = self.height {
            cfg.height = v;
        }
        if let Some(v) = self.weston_ini {
            cfg.weston_ini = Some(v);
        }
        if let Some(v) = self.title {
            cfg.title = v;
        }
        if let Some(v) = self.app_id {
            cfg.app_id = v;
        }
        if let Some(v) = self.engine_library {
            cfg.engine_library = v;
        }
        if let Some(v) = self.icu_data_fallback {
            cfg.icu_data_fallback = v;
        }
        if let Some(v) = self.key_event_channel {
            cfg.key_event_channel = v;
        }
        if let Some(v) = self.primary_ui {
            cfg.primary_ui = v;
        }
        if primary_from_env {
            cfg.primary_ui = true;
        }
        if let Some(v) = self.ir_input {
            cfg.ir_input = v;
        }

        let bundle_path = self.bundle_path.ok_or(ConfigError::MissingBundle)?;
        Ok((
            cfg,
            LaunchArgs {
                bundle_path,
                engine_flags: self.engine_flags,
            },
        ))
    }
}
