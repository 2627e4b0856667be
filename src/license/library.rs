//! Dynamically loaded key server library
//!
//! Resolves the two exported entry points once at startup:
//!
//! ```c
//! int fpsProcessOperations(const char *in_json, int in_json_size, char **out_json, int *out_json_size);
//! int fpsDisposeResponse(char *out_pay_load, int out_pay_load_sz);
//! ```
#![allow(unsafe_code)]

use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::{Library, Symbol};
use thiserror::Error;

use super::backend::{LibraryStatus, LicenseBackend, Processed};

type ProcessFn = unsafe extern "C" fn(*const c_char, c_int, *mut *mut c_char, *mut c_int) -> c_int;
type DisposeFn = unsafe extern "C" fn(*mut c_char, c_int) -> c_int;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to load license library {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("symbol `{symbol}` not found in {path}: {source}")]
    Symbol {
        symbol: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

/// Buffer allocated by the library, returned through `dispose`.
pub struct LibraryPayload {
    ptr: NonNull<c_char>,
    len: c_int,
}

// The buffer is exclusively owned by this handle until it is disposed.
unsafe impl Send for LibraryPayload {}

impl AsRef<[u8]> for LibraryPayload {
    fn as_ref(&self) -> &[u8] {
        let len = usize::try_from(self.len).unwrap_or(0);
        if len == 0 {
            return &[];
        }
        // SAFETY: the library reports `len` readable bytes at `ptr`, valid until disposed.
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), len) };
        // The reported size counts the NUL terminator.
        bytes
            .iter()
            .position(|&b| b == 0)
            .map_or(bytes, |end| &bytes[..end])
    }
}

pub struct LicenseLibrary {
    process_fn: ProcessFn,
    dispose_fn: DisposeFn,
    path: PathBuf,
    // Keeps the resolved function pointers valid.
    _library: Library,
}

impl LicenseLibrary {
    pub fn load(
        path: impl AsRef<Path>,
        process_symbol: &str,
        dispose_symbol: &str,
    ) -> Result<Self, LibraryError> {
        let path = path.as_ref().to_path_buf();
        // SAFETY: loading runs the library's initializers; the library is trusted configuration.
        let library = unsafe { Library::new(&path) }.map_err(|source| LibraryError::Load {
            path: path.clone(),
            source,
        })?;

        let process_fn = resolve::<ProcessFn>(&library, &path, process_symbol)?;
        let dispose_fn = resolve::<DisposeFn>(&library, &path, dispose_symbol)?;

        tracing::info!(
            path = %path.display(),
            process_symbol,
            dispose_symbol,
            "license library loaded"
        );

        Ok(Self {
            process_fn,
            dispose_fn,
            path,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn resolve<T: Copy>(library: &Library, path: &Path, symbol: &str) -> Result<T, LibraryError> {
    // SAFETY: the caller names the C signature the symbol is declared with.
    let found: Symbol<T> =
        unsafe { library.get(symbol.as_bytes()) }.map_err(|source| LibraryError::Symbol {
            symbol: symbol.to_string(),
            path: path.to_path_buf(),
            source,
        })?;
    Ok(*found)
}

impl LicenseBackend for LicenseLibrary {
    type Payload = LibraryPayload;

    fn process(&self, input: &[u8]) -> Processed<LibraryPayload> {
        let Ok(input_len) = c_int::try_from(input.len()) else {
            tracing::error!(len = input.len(), "request body too large for license library");
            return Processed {
                status: LibraryStatus::PARAM_ERR,
                payload: None,
            };
        };

        let mut buffer = Vec::with_capacity(input.len() + 1);
        buffer.extend_from_slice(input);
        buffer.push(0);

        let mut out_ptr: *mut c_char = std::ptr::null_mut();
        let mut out_len: c_int = 0;
        // SAFETY: `buffer` is NUL-terminated and outlives the call; the out-pointers are valid.
        let status = unsafe {
            (self.process_fn)(
                buffer.as_ptr().cast::<c_char>(),
                input_len,
                &mut out_ptr,
                &mut out_len,
            )
        };

        Processed {
            status: LibraryStatus(status),
            payload: NonNull::new(out_ptr).map(|ptr| LibraryPayload { ptr, len: out_len }),
        }
    }

    fn dispose(&self, payload: LibraryPayload) -> LibraryStatus {
        // SAFETY: `payload` came from `process` of this library and is released only once.
        let status = unsafe { (self.dispose_fn)(payload.ptr.as_ptr(), payload.len) };
        LibraryStatus(status)
    }
}
