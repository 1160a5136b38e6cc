mod types;
mod error;
mod context;

pub use types::*;
pub use error::*;
pub use context::*;

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::Path;
use std::sync::Arc;

use qwen_model::gguf::GgufFile;
use qwen_model::qwen2::{Qwen2Model, Qwen2Weights};
use qwen_model::tokenizer::bpe::BpeTokenizer;
use qwen_model::Session;

/// Execute a closure that returns a `QwenStatus`, catching any panics and
/// converting them into `QwenStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> QwenStatus + std::panic::UnwindSafe>(f: F) -> QwenStatus {
    match std::panic::catch_unwind(f) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic".to_string());
            QwenStatus::ErrorInternal
        }
    }
}

/// Create a new inference context.
///
/// On success, writes a heap-allocated `QwenContext` pointer into
/// `*ctx_out` and returns `QwenStatus::Ok`. The caller must later call
/// `qwen_context_destroy` to free the context.
///
/// `backend` currently only accepts `QwenBackendType::Cpu`; requesting
/// `Metal` without the `metal` feature compiled in reports
/// `ErrorInvalidArgument`.
#[no_mangle]
pub extern "C" fn qwen_context_create(
    backend: QwenBackendType,
    ctx_out: *mut *mut QwenContext,
) -> QwenStatus {
    catch_panic(|| {
        if ctx_out.is_null() {
            set_last_error("ctx_out is null".to_string());
            return QwenStatus::ErrorInvalidArgument;
        }
        if matches!(backend, QwenBackendType::Metal) && !cfg!(feature = "metal") {
            set_last_error("metal backend not compiled in".to_string());
            return QwenStatus::ErrorInvalidArgument;
        }
        let ctx = Box::new(QwenContext::new());
        unsafe {
            *ctx_out = Box::into_raw(ctx);
        }
        QwenStatus::Ok
    })
}

/// Destroy a context previously created by `qwen_context_create`.
///
/// Passing a null pointer is a no-op and returns `QwenStatus::Ok`.
#[no_mangle]
pub unsafe extern "C" fn qwen_context_destroy(ctx: *mut QwenContext) -> QwenStatus {
    if ctx.is_null() {
        return QwenStatus::Ok;
    }
    drop(Box::from_raw(ctx));
    QwenStatus::Ok
}

/// Load a GGUF model and its tokenizer from disk.
///
/// The model file at `model_path` is opened, parsed, and loaded into the
/// context: the decoder weights are dequantized and narrowed to `dtype`,
/// and a fresh KV cache is allocated.
#[no_mangle]
pub unsafe extern "C" fn qwen_model_load(
    ctx: *mut QwenContext,
    model_path: *const c_char,
    dtype: QwenDType,
) -> QwenStatus {
    catch_panic(|| {
        if ctx.is_null() || model_path.is_null() {
            set_last_error("null argument".to_string());
            return QwenStatus::ErrorInvalidArgument;
        }
        let ctx = unsafe { &mut *ctx };
        let path_str = match unsafe { CStr::from_ptr(model_path) }.to_str() {
            Ok(s) => s,
            Err(e) => {
                set_last_error(format!("invalid path: {}", e));
                return QwenStatus::ErrorInvalidArgument;
            }
        };

        let path = Path::new(path_str);
        let gguf = match GgufFile::open(path) {
            Ok(g) => g,
            Err(e) => {
                set_last_error(format!("failed to open GGUF: {}", e));
                return QwenStatus::ErrorModelLoad;
            }
        };

        let tokenizer = match BpeTokenizer::from_gguf(&gguf.metadata) {
            Ok(t) => t,
            Err(e) => {
                set_last_error(format!("failed to load tokenizer: {}", e));
                return QwenStatus::ErrorModelLoad;
            }
        };

        let model = match Qwen2Model::from_gguf(&gguf, dtype.into()) {
            Ok(m) => m,
            Err(e) => {
                set_last_error(format!("failed to load model: {}", e));
                return QwenStatus::ErrorModelLoad;
            }
        };

        ctx.session = Some(Session::new(model, Arc::clone(&ctx.backend)));
        ctx.tokenizer = Some(tokenizer);
        QwenStatus::Ok
    })
}

/// Borrow the session's weight slots for the caller to inspect or
/// repopulate (e.g. after a hot-reload), as an opaque pointer.
///
/// Returns null if no model has been loaded yet. The pointer is valid
/// only as long as the context is alive and no other call reloads the
/// model; it is not meant to be dereferenced by C callers directly, only
/// passed back through a higher binding layer that knows the weight
/// layout.
#[no_mangle]
pub unsafe extern "C" fn qwen_weights(ctx: *mut QwenContext) -> *mut c_void {
    if ctx.is_null() {
        return std::ptr::null_mut();
    }
    let ctx = unsafe { &mut *ctx };
    match ctx.session.as_mut() {
        Some(session) => {
            let weights: &mut Qwen2Weights = session.model_mut().weights_mut();
            weights as *mut Qwen2Weights as *mut c_void
        }
        None => std::ptr::null_mut(),
    }
}

/// Prefill the session with a full token sequence and greedily choose the
/// next token.
///
/// Thinly wraps [`qwen_model::Session::prefill`]. On success, writes the
/// chosen token id to `*out_token` and returns `QwenStatus::Ok`. On any
/// internal failure (empty input, capacity exceeded, allocation failure),
/// `*out_token` is set to the sentinel `-1` and `QwenStatus::ErrorGenerate`
/// is returned -- the core never distinguishes these cases further at this
/// boundary.
#[no_mangle]
pub unsafe extern "C" fn qwen_prefill(
    ctx: *mut QwenContext,
    ids: *const i64,
    n: usize,
    out_token: *mut i64,
) -> QwenStatus {
    catch_panic(|| {
        if ctx.is_null() || ids.is_null() || out_token.is_null() || n == 0 {
            set_last_error("null or empty argument".to_string());
            return QwenStatus::ErrorInvalidArgument;
        }
        let ctx = unsafe { &mut *ctx };
        let session = match ctx.session.as_mut() {
            Some(s) => s,
            None => {
                set_last_error("model not loaded".to_string());
                return QwenStatus::ErrorGenerate;
            }
        };

        let id_slice = unsafe { std::slice::from_raw_parts(ids, n) };
        let token = session.prefill(id_slice);
        unsafe { *out_token = token };
        if token == qwen_model::qwen2::session::FAILURE_TOKEN {
            set_last_error("prefill failed".to_string());
            return QwenStatus::ErrorGenerate;
        }
        QwenStatus::Ok
    })
}

/// Append new tokens to an already-prefilled session and greedily choose
/// the next token.
///
/// Thinly wraps [`qwen_model::Session::step`]. `ids` holds only the newly
/// appended tokens since the last call (typically length 1). Fails if the
/// KV cache is disabled, `ids` is empty, or capacity is exceeded, mirroring
/// `qwen_prefill`'s error convention.
#[no_mangle]
pub unsafe extern "C" fn qwen_step(
    ctx: *mut QwenContext,
    ids: *const i64,
    n: usize,
    out_token: *mut i64,
) -> QwenStatus {
    catch_panic(|| {
        if ctx.is_null() || ids.is_null() || out_token.is_null() || n == 0 {
            set_last_error("null or empty argument".to_string());
            return QwenStatus::ErrorInvalidArgument;
        }
        let ctx = unsafe { &mut *ctx };
        let session = match ctx.session.as_mut() {
            Some(s) => s,
            None => {
                set_last_error("model not loaded".to_string());
                return QwenStatus::ErrorGenerate;
            }
        };

        let id_slice = unsafe { std::slice::from_raw_parts(ids, n) };
        let token = session.step(id_slice);
        unsafe { *out_token = token };
        if token == qwen_model::qwen2::session::FAILURE_TOKEN {
            set_last_error("step failed".to_string());
            return QwenStatus::ErrorGenerate;
        }
        QwenStatus::Ok
    })
}

/// Rewind the model's KV cache cursor to zero (e.g. to start a new
/// conversation while keeping the loaded weights).
#[no_mangle]
pub unsafe extern "C" fn qwen_reset_kv_cache(ctx: *mut QwenContext) -> QwenStatus {
    if ctx.is_null() {
        return QwenStatus::ErrorInvalidArgument;
    }
    let ctx = &mut *ctx;
    if let Some(session) = ctx.session.as_mut() {
        session.reset_kv_cache();
    }
    QwenStatus::Ok
}

/// Enable or disable the model's KV cache.
#[no_mangle]
pub unsafe extern "C" fn qwen_set_kv_cache_enabled(
    ctx: *mut QwenContext,
    enabled: bool,
) -> QwenStatus {
    if ctx.is_null() {
        return QwenStatus::ErrorInvalidArgument;
    }
    let ctx = &mut *ctx;
    match ctx.session.as_mut() {
        Some(session) => {
            if session.set_kv_cache_enabled(enabled) {
                QwenStatus::Ok
            } else {
                set_last_error("failed to (re)allocate KV cache storage".to_string());
                QwenStatus::ErrorOutOfMemory
            }
        }
        None => {
            set_last_error("model not loaded".to_string());
            QwenStatus::ErrorGenerate
        }
    }
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error, or
/// null if no error has occurred. The caller must free the returned
/// string with `qwen_free_string`.
#[no_mangle]
pub extern "C" fn qwen_last_error() -> *const c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null(),
    }
}

/// Free a string previously returned by `qwen_last_error`.
#[no_mangle]
pub unsafe extern "C" fn qwen_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
