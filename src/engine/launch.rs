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

//! Everything the engine needs on disk before it can start: the asset
//! bundle, ICU data, and for release builds the AOT snapshot library.

use std::path::Path;
use std::path::PathBuf;

use libloading::Library;

use crate::config::ConfigError;
use crate::prelude::*;

const KERNEL_BLOB: &str = "kernel_blob.bin";
/// `flutter build` puts the AOT library two levels above the asset bundle.
const AOT_LIBRARY: &str = "../../lib/libapp.so";
const ICU_DATA: &str = "data/icudtl.dat";

pub fn aot_library_path(bundle: &Path) -> PathBuf {
    bundle.join(AOT_LIBRARY)
}

/// A bundle is usable if it carries either a JIT kernel or an AOT library.
pub fn validate_bundle(bundle: &Path) -> Result<()> {
    let kernel = bundle.join(KERNEL_BLOB).is_file();
    let aot = aot_library_path(bundle).is_file();
    if !bundle.is_dir() || !(kernel || aot) {
        error!("bundle {bundle:?} unusable: kernel = {kernel}, aot = {aot}");
        return Err(ConfigError::InvalidBundle(bundle.to_path_buf()).into());
    }
    debug!("bundle {bundle:?}: kernel = {kernel}, aot = {aot}");
    Ok(())
}

/// ICU data next to the executable wins over the configured fallback.
pub fn resolve_icu_data(exe_dir: &Path, fallback: &Path) -> Result<PathBuf> {
    let local = exe_dir.join(ICU_DATA);
    if local.is_file() {
        return Ok(local);
    }
    if fallback.is_file() {
        return Ok(fallback.to_path_buf());
    }
    Err(ConfigError::MissingIcuData(local, fallback.to_path_buf()).into())
}

/// The four snapshot sections of an AOT-compiled app. The pointers stay valid
/// for as long as this value lives.
#[derive(Debug)]
pub struct AotSnapshots {
    pub vm_snapshot_data: *const u8,
    pub vm_snapshot_instructions: *const u8,
    pub isolate_snapshot_data: *const u8,
    pub isolate_snapshot_instructions: *const u8,
    _library: Library,
}

impl AotSnapshots {
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initializers. AOT app libraries
        // contain snapshot data only.
        let library = unsafe { Library::new(path) }
            .with_context(loc!(), || format!("could not load AOT library {path:?}"))?;
        let symbol = |name: &[u8]| -> Result<*const u8> {
            // SAFETY: the snapshot symbols are data, so the symbol address is
            // the data pointer itself and is never called.
            let sym = unsafe { library.get::<*const u8>(name) }.with_context(loc!(), || {
                format!(
                    "AOT library {path:?} lacks {}",
                    String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
                )
            })?;
            Ok(*sym)
        };
        let vm_snapshot_data = symbol(b"_kDartVmSnapshotData\0")?;
        let vm_snapshot_instructions = symbol(b"_kDartVmSnapshotInstructions\0")?;
        let isolate_snapshot_data = symbol(b"_kDartIsolateSnapshotData\0")?;
        let isolate_snapshot_instructions = symbol(b"_kDartIsolateSnapshotInstructions\0")?;
        Ok(Self {
            vm_snapshot_data,
            vm_snapshot_instructions,
            isolate_snapshot_data,
            isolate_snapshot_instructions,
            _library: library,
        })
    }
}

/// Resolved inputs for starting the engine.
#[derive(Debug)]
pub struct LaunchPlan {
    pub assets_path: PathBuf,
    pub icu_data_path: PathBuf,
    /// argv for the engine; the bundle path comes first.
    pub argv: Vec<String>,
    pub aot: Option<AotSnapshots>,
    /// Why the AOT library could not be loaded. The engine may still start
    /// without it, so this only surfaces if the engine refuses to run.
    pub aot_error: Option<anyhow::Error>,
}

impl LaunchPlan {
    /// `runs_aot` comes from the engine library: AOT engines need the
    /// snapshot library when the bundle ships one.
    pub fn prepare(
        bundle: &Path,
        argv: Vec<String>,
        exe_dir: &Path,
        icu_fallback: &Path,
        runs_aot: bool,
    ) -> Result<Self> {
        validate_bundle(bundle).location(loc!())?;
        let icu_data_path = resolve_icu_data(exe_dir, icu_fallback).location(loc!())?;

        let aot_path = aot_library_path(bundle);
        let (aot, aot_error) = if runs_aot && aot_path.is_file() {
            info!("loading AOT snapshot {aot_path:?}");
            match AotSnapshots::load(&aot_path).error(loc!()) {
                Ok(aot) => (Some(aot), None),
                Err(err) => {
                    warn!("starting the engine without AOT snapshots");
                    (None, Some(err))
                },
            }
        } else {
            if runs_aot {
                warn!("engine runs AOT code but {aot_path:?} does not exist");
            }
            (None, None)
        };

        Ok(Self {
            assets_path: bundle.to_path_buf(),
            icu_data_path,
            argv,
            aot,
            aot_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    /// Lays out `root/build/flutter_assets`, returning the bundle path.
    fn bundle_dir(root: &Path) -> PathBuf {
        let bundle = root.join("build").join("flutter_assets");
        fs::create_dir_all(&bundle).unwrap();
        bundle
    }

    fn config_error(err: &anyhow::Error) -> Option<&ConfigError> {
        err.downcast_ref::<ConfigError>()
    }

    #[test]
    fn kernel_bundle_is_valid() {
        let root = tempfile::tempdir().unwrap();
        let bundle = bundle_dir(root.path());
        fs::write(bundle.join(KERNEL_BLOB), b"kernel").unwrap();
        validate_bundle(&bundle).unwrap();
    }

    #[test]
    fn aot_bundle_is_valid() {
        let root = tempfile::tempdir().unwrap();
        let bundle = bundle_dir(root.path());
        fs::create_dir_all(root.path().join("lib")).unwrap();
        fs::write(root.path().join("lib").join("libapp.so"), b"elf").unwrap();
        validate_bundle(&bundle).unwrap();
        assert!(aot_library_path(&bundle).is_file());
    }

    #[test]
    fn empty_or_missing_bundle_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let bundle = bundle_dir(root.path());
        let err = validate_bundle(&bundle).unwrap_err();
        assert!(matches!(config_error(&err), Some(ConfigError::InvalidBundle(p)) if *p == bundle));
        assert!(validate_bundle(&root.path().join("missing")).is_err());
    }

    #[test]
    fn icu_data_prefers_executable_dir() {
        let exe = tempfile::tempdir().unwrap();
        let fallback = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(
            resolve_icu_data(exe.path(), fallback.path()).unwrap(),
            fallback.path()
        );

        fs::create_dir_all(exe.path().join("data")).unwrap();
        fs::write(exe.path().join(ICU_DATA), b"icu").unwrap();
        assert_eq!(
            resolve_icu_data(exe.path(), fallback.path()).unwrap(),
            exe.path().join(ICU_DATA)
        );
    }

    #[test]
    fn missing_icu_data_names_both_paths() {
        let exe = tempfile::tempdir().unwrap();
        let fallback = exe.path().join("nowhere.dat");
        let err = resolve_icu_data(exe.path(), &fallback).unwrap_err();
        match config_error(&err) {
            Some(ConfigError::MissingIcuData(local, fb)) => {
                assert_eq!(*local, exe.path().join(ICU_DATA));
                assert_eq!(*fb, fallback);
            },
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn jit_plan_skips_aot() {
        let root = tempfile::tempdir().unwrap();
        let bundle = bundle_dir(root.path());
        fs::write(bundle.join(KERNEL_BLOB), b"kernel").unwrap();
        let icu = tempfile::NamedTempFile::new().unwrap();
        let argv = vec![bundle.display().to_string(), "--verbose-logging".into()];
        let plan =
            LaunchPlan::prepare(&bundle, argv.clone(), root.path(), icu.path(), true).unwrap();
        assert!(plan.aot.is_none());
        assert_eq!(plan.argv, argv);
        assert_eq!(plan.icu_data_path, icu.path());
    }

    #[test]
    fn unloadable_aot_library_is_deferred_to_engine_start() {
        let root = tempfile::tempdir().unwrap();
        let bundle = bundle_dir(root.path());
        fs::write(bundle.join(KERNEL_BLOB), b"kernel").unwrap();
        fs::create_dir_all(root.path().join("lib")).unwrap();
        fs::write(root.path().join("lib").join("libapp.so"), b"not an elf").unwrap();
        let icu = tempfile::NamedTempFile::new().unwrap();

        let plan = LaunchPlan::prepare(&bundle, vec![], root.path(), icu.path(), true).unwrap();
        assert!(plan.aot.is_none());
        let err = plan.aot_error.expect("load failure is kept");
        assert!(format!("{err:?}").contains("libapp.so"), "{err:?}");

        // A JIT engine doesn't care about the AOT library.
        let plan = LaunchPlan::prepare(&bundle, vec![], root.path(), icu.path(), false).unwrap();
        assert!(plan.aot.is_none());
        assert!(plan.aot_error.is_none());
    }
}
