//! Dynamic-library unit loading
//!
//! Units compiled as shared libraries export a single symbol,
//! `lumen_unit_manifest`, returning their [`UnitManifest`]. The library
//! handle stays open for as long as the unit is loaded, since method bodies are
//! function pointers into it.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::error::{BridgeError, BridgeResult};
use crate::unit::{UnitLoader, UnitManifest};

/// Symbol every unit library must export:
/// `extern "C" fn() -> *mut UnitManifest`.
pub const MANIFEST_SYMBOL: &str = "lumen_unit_manifest";

/// Errors raised while loading a unit library.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Library file not found or could not be opened
    #[error("Library not found: {path}")]
    NotFound {
        /// Path that was attempted, with the platform error appended
        path: String,
    },

    /// Symbol not found in the library
    #[error("Symbol not found: {symbol} in {library}")]
    SymbolNotFound {
        /// Symbol name that was not found
        symbol: String,
        /// Library path
        library: String,
    },

    /// The manifest entry point misbehaved
    #[error("Invalid unit manifest: {0}")]
    InvalidManifest(String),

    /// Path or symbol name could not be encoded for the platform call
    #[error("Platform error: {0}")]
    Platform(String),
}

impl From<LoadError> for BridgeError {
    fn from(err: LoadError) -> Self {
        BridgeError::Load(err.to_string())
    }
}

/// Cross-platform shared-library handle.
pub struct Library {
    handle: LibraryHandle,
    path: String,
}

impl Library {
    /// Open a shared library. `.so` via `dlopen(RTLD_NOW | RTLD_LOCAL)` on
    /// Unix, `.dll` via `LoadLibraryW` on Windows.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path_ref = path.as_ref();
        let path_str = path_ref
            .to_str()
            .ok_or_else(|| LoadError::Platform(format!("non-UTF-8 path: {:?}", path_ref)))?;

        let handle = LibraryHandle::load(path_str)?;

        Ok(Library {
            handle,
            path: path_str.to_string(),
        })
    }

    /// Look up a symbol.
    ///
    /// # Safety
    /// The caller must ensure the symbol exists with a matching signature
    /// for `T`, and must not use it after the library is dropped.
    pub unsafe fn get<T>(&self, symbol: &str) -> Result<T, LoadError> {
        self.handle.symbol(symbol, &self.path)
    }

    /// Call the unit's manifest entry point.
    pub fn load_manifest(&self) -> Result<UnitManifest, LoadError> {
        unsafe {
            type ManifestFn = extern "C" fn() -> *mut UnitManifest;
            let entry: ManifestFn = self.get(MANIFEST_SYMBOL)?;

            let manifest_ptr = entry();
            if manifest_ptr.is_null() {
                return Err(LoadError::InvalidManifest(format!(
                    "{} returned null",
                    MANIFEST_SYMBOL
                )));
            }

            Ok(*Box::from_raw(manifest_ptr))
        }
    }
}

/// [`UnitLoader`] backed by shared libraries. Keeps every loaded library
/// open until [`DynamicLoader::release`] is called for its path.
#[derive(Default)]
pub struct DynamicLoader {
    open: Mutex<FxHashMap<PathBuf, Library>>,
}

impl DynamicLoader {
    /// Create a loader with no open libraries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the library loaded from `path`, if any. Callers must ensure no
    /// method body from this unit can still be invoked.
    pub fn release(&self, path: &Path) -> bool {
        self.open.lock().remove(path).is_some()
    }
}

impl UnitLoader for DynamicLoader {
    fn load(&self, path: &Path) -> BridgeResult<UnitManifest> {
        let library = Library::open(path)?;
        let manifest = library.load_manifest()?;
        self.open.lock().insert(path.to_path_buf(), library);
        Ok(manifest)
    }

    fn release(&self, path: &Path) {
        DynamicLoader::release(self, path);
    }
}

// Platform implementations

#[cfg(unix)]
type LibraryHandle = UnixLibrary;

#[cfg(windows)]
type LibraryHandle = WindowsLibrary;

#[cfg(unix)]
struct UnixLibrary {
    handle: *mut std::ffi::c_void,
}

#[cfg(unix)]
impl UnixLibrary {
    fn load(path: &str) -> Result<Self, LoadError> {
        let c_path = CString::new(path)
            .map_err(|e| LoadError::Platform(format!("invalid path: {}", e)))?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };

        if handle.is_null() {
            let error = unsafe {
                let err_ptr = libc::dlerror();
                if err_ptr.is_null() {
                    "unknown error".to_string()
                } else {
                    CStr::from_ptr(err_ptr).to_string_lossy().into_owned()
                }
            };

            return Err(LoadError::NotFound {
                path: format!("{}: {}", path, error),
            });
        }

        Ok(UnixLibrary { handle })
    }

    unsafe fn symbol<T>(&self, name: &str, lib_path: &str) -> Result<T, LoadError> {
        let c_name = CString::new(name)
            .map_err(|e| LoadError::Platform(format!("invalid symbol name: {}", e)))?;

        // Clear any stale error before the lookup.
        libc::dlerror();

        let symbol = libc::dlsym(self.handle, c_name.as_ptr());

        let err_ptr = libc::dlerror();
        if !err_ptr.is_null() {
            let error = CStr::from_ptr(err_ptr).to_string_lossy().into_owned();
            return Err(LoadError::SymbolNotFound {
                symbol: name.to_string(),
                library: format!("{}: {}", lib_path, error),
            });
        }

        if symbol.is_null() {
            return Err(LoadError::SymbolNotFound {
                symbol: name.to_string(),
                library: lib_path.to_string(),
            });
        }

        Ok(std::mem::transmute_copy(&symbol))
    }
}

#[cfg(unix)]
impl Drop for UnixLibrary {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

#[cfg(unix)]
unsafe impl Send for UnixLibrary {}
#[cfg(unix)]
unsafe impl Sync for UnixLibrary {}

#[cfg(windows)]
struct WindowsLibrary {
    handle: *mut std::ffi::c_void,
}

#[cfg(windows)]
impl WindowsLibrary {
    fn load(path: &str) -> Result<Self, LoadError> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;

        let wide: Vec<u16> = OsStr::new(path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };

        if handle.is_null() {
            let error = unsafe { GetLastError() };
            return Err(LoadError::NotFound {
                path: format!("{} (error code: {})", path, error),
            });
        }

        Ok(WindowsLibrary { handle })
    }

    unsafe fn symbol<T>(&self, name: &str, lib_path: &str) -> Result<T, LoadError> {
        let c_name = CString::new(name)
            .map_err(|e| LoadError::Platform(format!("invalid symbol name: {}", e)))?;

        let symbol = GetProcAddress(self.handle, c_name.as_ptr());

        if symbol.is_null() {
            let error = GetLastError();
            return Err(LoadError::SymbolNotFound {
                symbol: name.to_string(),
                library: format!("{} (error code: {})", lib_path, error),
            });
        }

        Ok(std::mem::transmute_copy(&symbol))
    }
}

#[cfg(windows)]
impl Drop for WindowsLibrary {
    fn drop(&mut self) {
        unsafe {
            FreeLibrary(self.handle);
        }
    }
}

#[cfg(windows)]
unsafe impl Send for WindowsLibrary {}
#[cfg(windows)]
unsafe impl Sync for WindowsLibrary {}

#[cfg(windows)]
extern "system" {
    fn LoadLibraryW(filename: *const u16) -> *mut std::ffi::c_void;
    fn GetProcAddress(
        module: *mut std::ffi::c_void,
        procname: *const i8,
    ) -> *mut std::ffi::c_void;
    fn FreeLibrary(module: *mut std::ffi::c_void) -> i32;
    fn GetLastError() -> u32;
}
