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

use std::sync::Arc;

use clap::Parser;
use smithay_client_toolkit::reexports::client::globals::registry_queue_init;
use wlembed::args::EmbedderArgs;
use wlembed::config;
use wlembed::engine::embedder::EmbedderEngine;
use wlembed::engine::embedder::EngineApi;
use wlembed::engine::launch::LaunchPlan;
use wlembed::input::ir;
use wlembed::pacer;
use wlembed::pacer::BatonSlot;
use wlembed::prelude::*;
use wlembed::reactor::Reactor;
use wlembed::session;
use wlembed::session::EmbedderState;
use wlembed::session::SessionOptions;
use wlembed::utils;

fn main() -> Result<()> {
    let (config, launch) = EmbedderArgs::parse().load_config().location(loc!())?;
    config::set_log_priv_data(config.log_priv_data);
    utils::configure_tracing(
        config.stderr_log_level.0,
        config.log_file.as_ref(),
        config.file_log_level.0,
    )
    .location(loc!())?;
    utils::exit_on_thread_panic();
    utils::ignore_sigpipe().location(loc!())?;

    // Before anything can spawn a thread.
    let mut reactor = Reactor::<EmbedderState>::new().location(loc!())?;

    let size = config.initial_size().location(loc!())?;
    let api = EngineApi::load(&config.engine_library).location(loc!())?;
    let exe_dir = utils::executable_dir().location(loc!())?;
    let plan = LaunchPlan::prepare(
        &launch.bundle_path,
        launch.engine_argv(),
        &exe_dir,
        &config.icu_data_fallback,
        api.runs_aot_compiled_dart_code(),
    )
    .location(loc!())?;

    let conn = session::connect_to_compositor().location(loc!())?;
    let (globals, mut event_queue) = registry_queue_init(&conn).location(loc!())?;

    // No remote receiver ships with the embedder; the sender is the handle a
    // receiver would be given.
    let (_ir_sender, ir_source, ir_ping) = if config.ir_input {
        let (sender, source, ping) = ir::ir_channel().location(loc!())?;
        (Some(sender), Some(source), Some(ping))
    } else {
        (None, None, None)
    };

    let slot = Arc::new(BatonSlot::new());
    let (requester, wakeups) = pacer::vsync_channel(slot.clone()).location(loc!())?;

    let mut state = EmbedderState::connect(
        conn.clone(),
        &globals,
        event_queue.handle(),
        reactor.handle(),
        slot,
        SessionOptions {
            title: config.title.clone(),
            app_id: config.app_id.clone(),
            size,
            primary_ui: config.primary_ui,
            key_event_channel: config.key_event_channel.clone(),
            ir: ir_source,
        },
    )
    .location(loc!())?;
    state
        .wait_for_configure(&mut event_queue)
        .location(loc!())?;

    reactor
        .insert_wayland(conn, event_queue)
        .location(loc!())?;
    reactor.insert_vsync_wakeups(wakeups).location(loc!())?;
    if let Some(ping) = ir_ping {
        reactor.insert_ir(ping).location(loc!())?;
    }

    let started = state.render_delegate().and_then(|delegate| {
        EmbedderEngine::run(api, plan, delegate, requester).location(loc!())
    });
    let result = started
        .and_then(|engine| state.attach_engine(Box::new(engine)))
        .and_then(|()| reactor.run(&mut state));

    reactor.finish(&mut state);
    result.context(loc!(), "embedder exited with an error")
}
