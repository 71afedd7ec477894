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

//! [`Engine`] over the engine's C embedding ABI. The engine library is
//! opened at runtime, so nothing links against it.

use std::ffi::CStr;
use std::ffi::CString;
use std::ffi::c_char;
use std::ffi::c_int;
use std::ffi::c_void;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use libloading::Library;

use crate::engine::Engine;
use crate::engine::RenderDelegate;
use crate::engine::WindowMetrics;
use crate::engine::launch::LaunchPlan;
use crate::input::PointerEvent;
use crate::input::PointerPhase;
use crate::pacer::FrameRequester;
use crate::pacer::ProtocolError;
use crate::pacer::VsyncReply;
use crate::prelude::*;

const ENGINE_VERSION: usize = 1;
const RESULT_SUCCESS: c_int = 0;
const RENDERER_OPENGL: c_int = 0;

const POINTER_PHASE_UP: c_int = 1;
const POINTER_PHASE_DOWN: c_int = 2;
const POINTER_SIGNAL_NONE: c_int = 0;
const POINTER_DEVICE_MOUSE: c_int = 1;

type EngineHandle = *mut c_void;
type BoolCallback = Option<extern "C" fn(*mut c_void) -> bool>;

#[repr(C)]
struct OpenGlRendererConfig {
    struct_size: usize,
    make_current: BoolCallback,
    clear_current: BoolCallback,
    present: BoolCallback,
    fbo_callback: Option<extern "C" fn(*mut c_void) -> u32>,
    make_resource_current: BoolCallback,
    fbo_reset_after_present: bool,
    surface_transformation: Option<extern "C" fn(*mut c_void) -> [f64; 9]>,
    gl_proc_resolver: Option<extern "C" fn(*mut c_void, *const c_char) -> *mut c_void>,
    gl_external_texture_frame_callback: Option<extern "C" fn()>,
    fbo_with_frame_info_callback: Option<extern "C" fn()>,
    present_with_info: Option<extern "C" fn()>,
    populate_existing_damage: Option<extern "C" fn()>,
}

/// A tagged union in C; padded to the size of its largest member.
#[repr(C)]
struct RendererConfig {
    kind: c_int,
    open_gl: OpenGlRendererConfig,
    _union_padding: [usize; 2],
}

#[repr(C)]
struct Locale {
    struct_size: usize,
    language_code: *const c_char,
    country_code: *const c_char,
    script_code: *const c_char,
    variant_code: *const c_char,
}

#[repr(C)]
struct ProjectArgs {
    struct_size: usize,
    assets_path: *const c_char,
    main_path_unused: *const c_char,
    packages_path_unused: *const c_char,
    icu_data_path: *const c_char,
    command_line_argc: c_int,
    command_line_argv: *const *const c_char,
    platform_message_callback: Option<extern "C" fn()>,
    vm_snapshot_data: *const u8,
    vm_snapshot_data_size: usize,
    vm_snapshot_instructions: *const u8,
    vm_snapshot_instructions_size: usize,
    isolate_snapshot_data: *const u8,
    isolate_snapshot_data_size: usize,
    isolate_snapshot_instructions: *const u8,
    isolate_snapshot_instructions_size: usize,
    root_isolate_create_callback: Option<extern "C" fn(*mut c_void)>,
    update_semantics_node_callback: Option<extern "C" fn()>,
    update_semantics_custom_action_callback: Option<extern "C" fn()>,
    persistent_cache_path: *const c_char,
    is_persistent_cache_read_only: bool,
    vsync_callback: Option<extern "C" fn(*mut c_void, isize)>,
    custom_dart_entrypoint: *const c_char,
    custom_task_runners: *const c_void,
    shutdown_dart_vm_when_done: bool,
    compositor: *const c_void,
    dart_old_gen_heap_size: i64,
    aot_data: *const c_void,
    compute_platform_resolved_locale_callback:
        Option<extern "C" fn(*const *const Locale, usize) -> *const Locale>,
}

#[repr(C)]
struct WindowMetricsEvent {
    struct_size: usize,
    width: usize,
    height: usize,
    pixel_ratio: f64,
}

#[repr(C)]
struct PointerEventFfi {
    struct_size: usize,
    phase: c_int,
    timestamp: usize,
    x: f64,
    y: f64,
    device: i32,
    signal_kind: c_int,
    scroll_delta_x: f64,
    scroll_delta_y: f64,
    device_kind: c_int,
    buttons: i64,
}

#[repr(C)]
struct PlatformMessage {
    struct_size: usize,
    channel: *const c_char,
    message: *const u8,
    message_size: usize,
    response_handle: *const c_void,
}

type RunFn = unsafe extern "C" fn(
    usize,
    *const RendererConfig,
    *const ProjectArgs,
    *mut c_void,
    *mut EngineHandle,
) -> c_int;
type ShutdownFn = unsafe extern "C" fn(EngineHandle) -> c_int;
type SendWindowMetricsFn = unsafe extern "C" fn(EngineHandle, *const WindowMetricsEvent) -> c_int;
type SendPointerFn = unsafe extern "C" fn(EngineHandle, *const PointerEventFfi, usize) -> c_int;
type SendPlatformMessageFn = unsafe extern "C" fn(EngineHandle, *const PlatformMessage) -> c_int;
type OnVsyncFn = unsafe extern "C" fn(EngineHandle, isize, u64, u64) -> c_int;
type GetCurrentTimeFn = unsafe extern "C" fn() -> u64;
type RunsAotFn = unsafe extern "C" fn() -> bool;

/// Entry points resolved from the engine library.
pub struct EngineApi {
    run: RunFn,
    shutdown: ShutdownFn,
    send_window_metrics: SendWindowMetricsFn,
    send_pointer_event: SendPointerFn,
    send_platform_message: SendPlatformMessageFn,
    on_vsync: OnVsyncFn,
    get_current_time: GetCurrentTimeFn,
    runs_aot: RunsAotFn,
    _library: Library,
}

impl fmt::Debug for EngineApi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EngineApi").finish_non_exhaustive()
    }
}

impl EngineApi {
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self> {
        // SAFETY: the engine library's initializers have no preconditions.
        let library = unsafe { Library::new(path) }
            .with_context(loc!(), || format!("could not open engine library {path:?}"))?;

        macro_rules! entry_point {
            ($ty:ty, $name:literal) => {{
                // SAFETY: the type matches the declaration in the engine's
                // embedder.h for ENGINE_VERSION.
                let symbol = unsafe { library.get::<$ty>(concat!($name, "\0").as_bytes()) }
                    .with_context(loc!(), || format!("engine library lacks {}", $name))?;
                *symbol
            }};
        }

        let run = entry_point!(RunFn, "FlutterEngineRun");
        let shutdown = entry_point!(ShutdownFn, "FlutterEngineShutdown");
        let send_window_metrics =
            entry_point!(SendWindowMetricsFn, "FlutterEngineSendWindowMetricsEvent");
        let send_pointer_event = entry_point!(SendPointerFn, "FlutterEngineSendPointerEvent");
        let send_platform_message =
            entry_point!(SendPlatformMessageFn, "FlutterEngineSendPlatformMessage");
        let on_vsync = entry_point!(OnVsyncFn, "FlutterEngineOnVsync");
        let get_current_time = entry_point!(GetCurrentTimeFn, "FlutterEngineGetCurrentTime");
        let runs_aot = entry_point!(RunsAotFn, "FlutterEngineRunsAOTCompiledDartCode");

        Ok(Self {
            run,
            shutdown,
            send_window_metrics,
            send_pointer_event,
            send_platform_message,
            on_vsync,
            get_current_time,
            runs_aot,
            _library: library,
        })
    }

    pub fn runs_aot_compiled_dart_code(&self) -> bool {
        // SAFETY: no arguments, no preconditions.
        unsafe { (self.runs_aot)() }
    }
}

fn check(call: &'static str, code: c_int) -> Result<(), ProtocolError> {
    if code == RESULT_SUCCESS {
        Ok(())
    } else {
        Err(ProtocolError::EngineCall { call, code })
    }
}

/// A failed FlutterEngineRun, along with why the AOT snapshots were missing
/// if they were.
fn run_failure(err: ProtocolError, aot_error: Option<&anyhow::Error>) -> anyhow::Error {
    let err = anyhow::Error::new(err);
    match aot_error {
        Some(aot) => err.context(format!("AOT snapshots were unavailable: {aot:#}")),
        None => err,
    }
}

/// What the engine's callbacks see as `user_data`.
struct Bridge {
    delegate: Arc<dyn RenderDelegate>,
    requester: FrameRequester,
}

impl Bridge {
    /// # Safety
    ///
    /// `user_data` must be the pointer handed to FlutterEngineRun, which
    /// stays valid until the engine is shut down.
    unsafe fn from_user_data<'a>(user_data: *mut c_void) -> &'a Bridge {
        // SAFETY: upheld by the caller.
        unsafe { &*(user_data as *const Bridge) }
    }
}

extern "C" fn make_current(user_data: *mut c_void) -> bool {
    // SAFETY: only registered with FlutterEngineRun alongside the bridge.
    unsafe { Bridge::from_user_data(user_data) }
        .delegate
        .make_current()
}

extern "C" fn clear_current(user_data: *mut c_void) -> bool {
    // SAFETY: only registered with FlutterEngineRun alongside the bridge.
    unsafe { Bridge::from_user_data(user_data) }
        .delegate
        .clear_current()
}

extern "C" fn present(user_data: *mut c_void) -> bool {
    // SAFETY: only registered with FlutterEngineRun alongside the bridge.
    unsafe { Bridge::from_user_data(user_data) }.delegate.present()
}

extern "C" fn fbo_callback(user_data: *mut c_void) -> u32 {
    // SAFETY: only registered with FlutterEngineRun alongside the bridge.
    unsafe { Bridge::from_user_data(user_data) }
        .delegate
        .target_framebuffer()
}

extern "C" fn make_resource_current(user_data: *mut c_void) -> bool {
    // SAFETY: only registered with FlutterEngineRun alongside the bridge.
    unsafe { Bridge::from_user_data(user_data) }
        .delegate
        .make_resource_current()
}

extern "C" fn gl_proc_resolver(user_data: *mut c_void, name: *const c_char) -> *mut c_void {
    if name.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: only registered with FlutterEngineRun alongside the bridge; the
    // engine passes NUL-terminated symbol names.
    let (bridge, name) = unsafe { (Bridge::from_user_data(user_data), CStr::from_ptr(name)) };
    bridge.delegate.resolve_proc_address(name)
}

extern "C" fn vsync_callback(user_data: *mut c_void, baton: isize) {
    // SAFETY: only registered with FlutterEngineRun alongside the bridge.
    let bridge = unsafe { Bridge::from_user_data(user_data) };
    if let Err(e) = bridge.requester.request_frame(baton) {
        // Either the engine or the pacer is broken; neither can recover.
        error!("{e}");
        std::process::abort();
    }
}

extern "C" fn resolve_locale(supported: *const *const Locale, count: usize) -> *const Locale {
    debug!("engine offered {count} locales");
    if supported.is_null() || count == 0 {
        return ptr::null();
    }
    // SAFETY: the engine passes an array of `count` locale pointers.
    unsafe { *supported }
}

fn c_string(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).context(loc!(), "argument contains a NUL byte")
}

/// A running engine.
pub struct EmbedderEngine {
    api: EngineApi,
    handle: EngineHandle,
    // Everything below is referenced by the engine until shutdown.
    _bridge: Box<Bridge>,
    _plan: LaunchPlan,
    _strings: Vec<CString>,
}

impl fmt::Debug for EmbedderEngine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EmbedderEngine")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl EmbedderEngine {
    #[instrument(skip(api, delegate, requester), level = "debug")]
    pub fn run(
        api: EngineApi,
        plan: LaunchPlan,
        delegate: Arc<dyn RenderDelegate>,
        requester: FrameRequester,
    ) -> Result<Self> {
        let assets_path = c_string(plan.assets_path.as_os_str().as_bytes())?;
        let icu_data_path = c_string(plan.icu_data_path.as_os_str().as_bytes())?;
        let argv = plan
            .argv
            .iter()
            .map(|arg| c_string(arg.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        let argv_ptrs: Vec<*const c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();

        let renderer = RendererConfig {
            kind: RENDERER_OPENGL,
            open_gl: OpenGlRendererConfig {
                struct_size: size_of::<OpenGlRendererConfig>(),
                make_current: Some(make_current),
                clear_current: Some(clear_current),
                present: Some(present),
                fbo_callback: Some(fbo_callback),
                make_resource_current: Some(make_resource_current),
                fbo_reset_after_present: false,
                surface_transformation: None,
                gl_proc_resolver: Some(gl_proc_resolver),
                gl_external_texture_frame_callback: None,
                fbo_with_frame_info_callback: None,
                present_with_info: None,
                populate_existing_damage: None,
            },
            _union_padding: [0; 2],
        };

        let (vm_data, vm_instr, isolate_data, isolate_instr) = match &plan.aot {
            Some(aot) => (
                aot.vm_snapshot_data,
                aot.vm_snapshot_instructions,
                aot.isolate_snapshot_data,
                aot.isolate_snapshot_instructions,
            ),
            None => (ptr::null(), ptr::null(), ptr::null(), ptr::null()),
        };

        let args = ProjectArgs {
            struct_size: size_of::<ProjectArgs>(),
            assets_path: assets_path.as_ptr(),
            main_path_unused: ptr::null(),
            packages_path_unused: ptr::null(),
            icu_data_path: icu_data_path.as_ptr(),
            command_line_argc: argv_ptrs.len() as c_int,
            command_line_argv: argv_ptrs.as_ptr(),
            platform_message_callback: None,
            vm_snapshot_data: vm_data,
            vm_snapshot_data_size: 0,
            vm_snapshot_instructions: vm_instr,
            vm_snapshot_instructions_size: 0,
            isolate_snapshot_data: isolate_data,
            isolate_snapshot_data_size: 0,
            isolate_snapshot_instructions: isolate_instr,
            isolate_snapshot_instructions_size: 0,
            root_isolate_create_callback: None,
            update_semantics_node_callback: None,
            update_semantics_custom_action_callback: None,
            persistent_cache_path: ptr::null(),
            is_persistent_cache_read_only: false,
            vsync_callback: Some(vsync_callback),
            custom_dart_entrypoint: ptr::null(),
            custom_task_runners: ptr::null(),
            shutdown_dart_vm_when_done: true,
            compositor: ptr::null(),
            dart_old_gen_heap_size: -1,
            aot_data: ptr::null(),
            compute_platform_resolved_locale_callback: Some(resolve_locale),
        };

        let bridge = Box::new(Bridge {
            delegate,
            requester,
        });
        let mut handle: EngineHandle = ptr::null_mut();
        // SAFETY: every pointer in `renderer` and `args` outlives this call,
        // and the bridge outlives the engine (it is dropped after shutdown).
        let code = unsafe {
            (api.run)(
                ENGINE_VERSION,
                &renderer,
                &args,
                &*bridge as *const Bridge as *mut c_void,
                &mut handle,
            )
        };
        check("FlutterEngineRun", code)
            .map_err(|err| run_failure(err, plan.aot_error.as_ref()))
            .context(loc!(), "could not run the engine")?;
        if handle.is_null() {
            bail!("engine reported success but returned no handle");
        }
        info!("engine running");

        let mut strings = argv;
        strings.push(assets_path);
        strings.push(icu_data_path);
        Ok(Self {
            api,
            handle,
            _bridge: bridge,
            _plan: plan,
            _strings: strings,
        })
    }
}

impl Engine for EmbedderEngine {
    fn send_window_metrics(&mut self, metrics: WindowMetrics) -> Result<()> {
        let event = WindowMetricsEvent {
            struct_size: size_of::<WindowMetricsEvent>(),
            width: metrics.width,
            height: metrics.height,
            pixel_ratio: metrics.pixel_ratio,
        };
        // SAFETY: handle is a live engine; the event outlives the call.
        let code = unsafe { (self.api.send_window_metrics)(self.handle, &event) };
        check("FlutterEngineSendWindowMetricsEvent", code).location(loc!())
    }

    fn send_pointer_event(&mut self, event: &PointerEvent) -> Result<()> {
        let ffi = PointerEventFfi {
            struct_size: size_of::<PointerEventFfi>(),
            phase: match event.phase {
                PointerPhase::Down => POINTER_PHASE_DOWN,
                PointerPhase::Up => POINTER_PHASE_UP,
            },
            timestamp: event.timestamp_us as usize,
            x: event.x,
            y: event.y,
            device: event.device,
            signal_kind: POINTER_SIGNAL_NONE,
            scroll_delta_x: 0.0,
            scroll_delta_y: 0.0,
            device_kind: POINTER_DEVICE_MOUSE,
            buttons: event.buttons,
        };
        // SAFETY: handle is a live engine; one event is passed.
        let code = unsafe { (self.api.send_pointer_event)(self.handle, &ffi, 1) };
        check("FlutterEngineSendPointerEvent", code).location(loc!())
    }

    fn send_platform_message(&mut self, channel: &str, message: &[u8]) -> Result<()> {
        let channel = c_string(channel.as_bytes())?;
        let message = PlatformMessage {
            struct_size: size_of::<PlatformMessage>(),
            channel: channel.as_ptr(),
            message: message.as_ptr(),
            message_size: message.len(),
            response_handle: ptr::null(),
        };
        // SAFETY: handle is a live engine; the engine copies the message.
        let code = unsafe { (self.api.send_platform_message)(self.handle, &message) };
        check("FlutterEngineSendPlatformMessage", code).location(loc!())
    }

    fn on_vsync(&mut self, reply: VsyncReply) -> Result<()> {
        // SAFETY: handle is a live engine and the baton came from it.
        let code = unsafe {
            (self.api.on_vsync)(
                self.handle,
                reply.baton,
                reply.frame_start_ns,
                reply.frame_target_ns,
            )
        };
        check("FlutterEngineOnVsync", code).location(loc!())
    }

    fn current_time_ns(&self) -> u64 {
        // SAFETY: no arguments, no preconditions.
        unsafe { (self.api.get_current_time)() }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.handle.is_null() {
            return Ok(());
        }
        // SAFETY: handle is a live engine and is never used again.
        let code = unsafe { (self.api.shutdown)(self.handle) };
        self.handle = ptr::null_mut();
        check("FlutterEngineShutdown", code).context(loc!(), "could not shut down the engine")
    }
}

impl Drop for EmbedderEngine {
    fn drop(&mut self) {
        self.shutdown().log_and_ignore(loc!());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_results() {
        assert!(check("FlutterEngineRun", RESULT_SUCCESS).is_ok());
        assert_eq!(
            check("FlutterEngineOnVsync", 2),
            Err(ProtocolError::EngineCall {
                call: "FlutterEngineOnVsync",
                code: 2
            })
        );
    }

    #[test]
    fn run_failure_carries_the_aot_load_error() {
        let code = ProtocolError::EngineCall {
            call: "FlutterEngineRun",
            code: 2,
        };
        let aot = anyhow!("could not load AOT library \"libapp.so\"");
        let err = run_failure(code, Some(&aot));
        let msg = format!("{err:#}");
        assert!(msg.contains("libapp.so"), "{msg}");
        assert_eq!(err.downcast_ref::<ProtocolError>(), Some(&code));

        let err = run_failure(code, None);
        assert!(!format!("{err:#}").contains("AOT"));
    }

    #[test]
    fn locale_resolution_takes_first() {
        let lang = c"en";
        let first = Locale {
            struct_size: size_of::<Locale>(),
            language_code: lang.as_ptr(),
            country_code: ptr::null(),
            script_code: ptr::null(),
            variant_code: ptr::null(),
        };
        let second = Locale {
            language_code: c"de".as_ptr(),
            ..first
        };
        let locales = [&first as *const Locale, &second as *const Locale];
        assert_eq!(resolve_locale(locales.as_ptr(), 2), &first as *const Locale);
        assert!(resolve_locale(locales.as_ptr(), 0).is_null());
        assert!(resolve_locale(ptr::null(), 3).is_null());
    }

    #[test]
    fn missing_engine_library_is_reported() {
        let err = EngineApi::load(Path::new("/nonexistent/libengine.so")).unwrap_err();
        assert!(format!("{err:?}").contains("could not open engine library"));
    }
}
