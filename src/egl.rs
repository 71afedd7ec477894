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

//! The GL side of the window: an onscreen context rendering into the
//! toplevel's surface and a resource context (sharing its group) for the
//! engine's upload thread.

use std::ffi::CStr;
use std::ffi::c_void;
use std::fmt;
use std::ptr;

use khronos_egl as egl;
use libloading::os::unix::Library;
use smithay_client_toolkit::reexports::client::Connection;
use smithay_client_toolkit::reexports::client::Proxy;
use smithay_client_toolkit::reexports::client::protocol::wl_surface::WlSurface;
use wayland_egl::WlEglSurface;

use crate::engine::RenderDelegate;
use crate::prelude::*;

const RESOURCE_SURFACE_SIZE: egl::Int = 64;

#[rustfmt::skip]
const CONFIG_ATTRIBUTES: [egl::Int; 17] = [
    egl::RENDERABLE_TYPE, egl::OPENGL_ES2_BIT,
    egl::SURFACE_TYPE, egl::WINDOW_BIT,
    egl::RED_SIZE, 8,
    egl::GREEN_SIZE, 8,
    egl::BLUE_SIZE, 8,
    egl::ALPHA_SIZE, 8,
    egl::DEPTH_SIZE, 0,
    egl::STENCIL_SIZE, 0,
    egl::NONE,
];

const CONTEXT_ATTRIBUTES: [egl::Int; 3] = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];

#[rustfmt::skip]
const RESOURCE_SURFACE_ATTRIBUTES: [egl::Int; 5] = [
    egl::WIDTH, RESOURCE_SURFACE_SIZE,
    egl::HEIGHT, RESOURCE_SURFACE_SIZE,
    egl::NONE,
];

#[derive(Debug, thiserror::Error)]
pub enum EglError {
    #[error("no EGL display for the wayland connection")]
    NoDisplay,
    #[error("no EGL config with RGBA8888, no depth/stencil, and ES2 window support")]
    NoConfig,
    #[error("{op} failed: {source:?}")]
    Call {
        op: &'static str,
        #[source]
        source: egl::Error,
    },
    #[error("could not create the native window")]
    NativeWindow(#[from] wayland_egl::Error),
}

trait EglResultExt<T> {
    fn op(self, op: &'static str) -> Result<T, EglError>;
}

impl<T> EglResultExt<T> for Result<T, egl::Error> {
    fn op(self, op: &'static str) -> Result<T, EglError> {
        self.map_err(|source| EglError::Call { op, source })
    }
}

pub struct EglSurfaceManager {
    egl: egl::Instance<egl::Static>,
    display: egl::Display,
    context: egl::Context,
    surface: egl::Surface,
    resource_context: egl::Context,
    resource_surface: egl::Surface,
    native_window: WlEglSurface,
    process: Library,
}

// SAFETY: the EGL handles are opaque identifiers that EGL allows to be used
// from any thread; current-ness is tracked per thread by EGL itself. The
// native window is only resized from the platform thread.
unsafe impl Send for EglSurfaceManager {}
unsafe impl Sync for EglSurfaceManager {}

impl fmt::Debug for EglSurfaceManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EglSurfaceManager")
            .field("display", &self.display.as_ptr())
            .field("context", &self.context.as_ptr())
            .field("resource_context", &self.resource_context.as_ptr())
            .finish_non_exhaustive()
    }
}

impl EglSurfaceManager {
    /// Creates both contexts and their surfaces for `surface`, which must
    /// belong to `conn`.
    #[instrument(skip(conn, surface), level = "debug")]
    pub fn new(
        conn: &Connection,
        surface: &WlSurface,
        width: u32,
        height: u32,
    ) -> Result<Self, EglError> {
        let egl = egl::Instance::new(egl::Static);

        // SAFETY: the wl_display pointer stays valid for the lifetime of the
        // connection, which outlives this manager.
        let display = unsafe { egl.get_display(conn.display().id().as_ptr().cast()) }
            .ok_or(EglError::NoDisplay)?;
        let (major, minor) = egl.initialize(display).op("eglInitialize")?;
        debug!("EGL {major}.{minor}");
        egl.bind_api(egl::OPENGL_ES_API).op("eglBindAPI")?;

        let config = egl
            .choose_first_config(display, &CONFIG_ATTRIBUTES)
            .op("eglChooseConfig")?
            .ok_or(EglError::NoConfig)?;

        let context = egl
            .create_context(display, config, None, &CONTEXT_ATTRIBUTES)
            .op("eglCreateContext")?;

        let native_window = WlEglSurface::new(surface.id(), width as i32, height as i32)?;

        let resource_context = egl
            .create_context(display, config, Some(context), &CONTEXT_ATTRIBUTES)
            .op("eglCreateContext(resource)")?;
        let resource_surface = egl
            .create_pbuffer_surface(display, config, &RESOURCE_SURFACE_ATTRIBUTES)
            .op("eglCreatePbufferSurface")?;

        // SAFETY: native_window is a live wl_egl_window and is destroyed only
        // after this surface (see Drop).
        let window_surface = unsafe {
            egl.create_window_surface(
                display,
                config,
                native_window.ptr() as egl::NativeWindowType,
                None,
            )
        }
        .op("eglCreateWindowSurface")?;

        info!("EGL window surface {width}x{height} ready");
        Ok(Self {
            egl,
            display,
            context,
            surface: window_surface,
            resource_context,
            resource_surface,
            native_window,
            process: Library::this(),
        })
    }

    pub fn resize(&self, width: u32, height: u32) {
        debug!("resizing native window to {width}x{height}");
        self.native_window
            .resize(width as i32, height as i32, 0, 0);
    }

    pub fn try_make_current(&self) -> Result<(), EglError> {
        self.egl
            .make_current(
                self.display,
                Some(self.surface),
                Some(self.surface),
                Some(self.context),
            )
            .op("eglMakeCurrent")
    }

    pub fn try_make_resource_current(&self) -> Result<(), EglError> {
        self.egl
            .make_current(
                self.display,
                Some(self.resource_surface),
                Some(self.resource_surface),
                Some(self.resource_context),
            )
            .op("eglMakeCurrent(resource)")
    }

    pub fn try_clear_current(&self) -> Result<(), EglError> {
        self.egl
            .make_current(self.display, None, None, None)
            .op("eglMakeCurrent(none)")
    }

    pub fn try_present(&self) -> Result<(), EglError> {
        self.egl
            .swap_buffers(self.display, self.surface)
            .op("eglSwapBuffers")
    }

    fn lookup_symbol(&self, name: &CStr) -> *mut c_void {
        if let Ok(utf8) = name.to_str() {
            if let Some(f) = self.egl.get_proc_address(utf8) {
                return f as *mut c_void;
            }
        }
        // SAFETY: the symbol is only used as an address.
        match unsafe { self.process.get::<*mut c_void>(name.to_bytes_with_nul()) } {
            Ok(symbol) => *symbol,
            Err(_) => {
                warn!("could not resolve GL symbol {name:?}");
                ptr::null_mut()
            },
        }
    }
}

impl RenderDelegate for EglSurfaceManager {
    fn make_current(&self) -> bool {
        self.try_make_current().log(loc!()).is_ok()
    }

    fn clear_current(&self) -> bool {
        self.try_clear_current().log(loc!()).is_ok()
    }

    fn make_resource_current(&self) -> bool {
        self.try_make_resource_current().log(loc!()).is_ok()
    }

    fn present(&self) -> bool {
        self.try_present().log(loc!()).is_ok()
    }

    fn resolve_proc_address(&self, name: &CStr) -> *mut c_void {
        self.lookup_symbol(name)
    }
}

impl Drop for EglSurfaceManager {
    fn drop(&mut self) {
        self.try_clear_current().log_and_ignore(loc!());
        self.egl
            .destroy_surface(self.display, self.surface)
            .op("eglDestroySurface")
            .log_and_ignore(loc!());
        self.egl
            .destroy_surface(self.display, self.resource_surface)
            .op("eglDestroySurface(resource)")
            .log_and_ignore(loc!());
        self.egl
            .destroy_context(self.display, self.resource_context)
            .op("eglDestroyContext(resource)")
            .log_and_ignore(loc!());
        self.egl
            .destroy_context(self.display, self.context)
            .op("eglDestroyContext")
            .log_and_ignore(loc!());
        self.egl
            .terminate(self.display)
            .op("eglTerminate")
            .log_and_ignore(loc!());
        debug!("EGL torn down");
        // native_window drops after this, once nothing refers to it.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute(list: &[egl::Int], key: egl::Int) -> Option<egl::Int> {
        list.chunks(2)
            .find(|pair| pair[0] == key)
            .and_then(|pair| pair.get(1).copied())
    }

    #[test]
    fn config_is_rgba8888_es2_without_depth() {
        assert_eq!(CONFIG_ATTRIBUTES.last(), Some(&egl::NONE));
        for channel in [egl::RED_SIZE, egl::GREEN_SIZE, egl::BLUE_SIZE, egl::ALPHA_SIZE] {
            assert_eq!(attribute(&CONFIG_ATTRIBUTES, channel), Some(8));
        }
        assert_eq!(attribute(&CONFIG_ATTRIBUTES, egl::DEPTH_SIZE), Some(0));
        assert_eq!(attribute(&CONFIG_ATTRIBUTES, egl::STENCIL_SIZE), Some(0));
        assert_eq!(
            attribute(&CONFIG_ATTRIBUTES, egl::RENDERABLE_TYPE),
            Some(egl::OPENGL_ES2_BIT)
        );
        assert_eq!(
            attribute(&CONFIG_ATTRIBUTES, egl::SURFACE_TYPE),
            Some(egl::WINDOW_BIT)
        );
    }

    #[test]
    fn contexts_are_es2_and_pbuffer_is_64_square() {
        assert_eq!(attribute(&CONTEXT_ATTRIBUTES, egl::CONTEXT_CLIENT_VERSION), Some(2));
        assert_eq!(attribute(&RESOURCE_SURFACE_ATTRIBUTES, egl::WIDTH), Some(64));
        assert_eq!(attribute(&RESOURCE_SURFACE_ATTRIBUTES, egl::HEIGHT), Some(64));
    }

    #[test]
    fn errors_name_the_operation_and_code() {
        let err = Err::<(), _>(egl::Error::BadSurface)
            .op("eglSwapBuffers")
            .unwrap_err();
        assert_eq!(err.to_string(), "eglSwapBuffers failed: BadSurface");
    }
}
