//! C surface for the process-wide stack trace manager.
//!
//! All functions use the `stack_trace_` prefix and forward to
//! [`global`](super::global), so they never unwind into the caller.
//! Label pointers are stored as given and handed back unchanged by the
//! visit functions.

use super::global;
use core::ffi::{c_char, c_int, c_void, CStr};

/// Frame visitor: `(file, func)`.
pub type VisitFn = extern "C" fn(*const c_char, *const c_char);

/// Frame visitor with a caller context: `(ctx, file, func)`.
pub type VisitCtxFn = extern "C" fn(*mut c_void, *const c_char, *const c_char);

/// Start the process-wide manager with the default configuration.
///
/// Returns 1 if it was started, 0 if it was already running or failed.
#[no_mangle]
pub extern "C" fn stack_trace_start() -> c_int {
    global::start() as c_int
}

/// Stop the process-wide manager.
#[no_mangle]
pub extern "C" fn stack_trace_close() {
    global::close();
}

/// Convert a label pointer. `None` on null.
///
/// # Safety
/// A non-null `ptr` must point to a nul-terminated string that stays valid
/// and unmodified for `'a`.
unsafe fn label<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null, valid for 'a per this function's contract.
    Some(unsafe { CStr::from_ptr(ptr) })
}

/// Push a frame for the calling thread. Returns 1 if it was recorded.
///
/// # Safety
/// `file` and `func` must be non-null nul-terminated strings that outlive
/// the process-wide manager, typically string literals.
#[no_mangle]
pub unsafe extern "C" fn stack_trace_enter(file: *const c_char, func: *const c_char) -> c_int {
    // SAFETY: forwarded from the caller.
    let (Some(file), Some(func)) = (unsafe { label(file) }, unsafe { label(func) }) else {
        tracing::warn!("stack_trace_enter: null label");
        return 0;
    };
    global::enter(file, func) as c_int
}

/// Pop the calling thread's top frame if it matches `(file, func)` by content.
/// Returns 1 if a frame was popped.
///
/// # Safety
/// `file` and `func` must be null or valid nul-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn stack_trace_leave(file: *const c_char, func: *const c_char) -> c_int {
    // SAFETY: the labels are only compared for the duration of the call.
    let (Some(file), Some(func)) = (unsafe { label(file) }, unsafe { label(func) }) else {
        tracing::warn!("stack_trace_leave: null label");
        return 0;
    };
    global::leave(file, func) as c_int
}

/// Older name of [`stack_trace_leave`], kept for existing callers.
///
/// # Safety
/// Same as [`stack_trace_leave`].
#[no_mangle]
pub unsafe extern "C" fn stack_track_leave(file: *const c_char, func: *const c_char) -> c_int {
    // SAFETY: forwarded from the caller.
    unsafe { stack_trace_leave(file, func) }
}

/// Call `callback` with each frame of the calling thread, most recent first.
/// The callback must not call back into the stack trace functions.
#[no_mangle]
pub extern "C" fn stack_trace_visit(callback: Option<VisitFn>) {
    let Some(callback) = callback else {
        tracing::warn!("stack_trace_visit: null callback");
        return;
    };
    global::visit(|file, func| callback(file.as_ptr(), func.as_ptr()));
}

/// Like [`stack_trace_visit`], passing `ctx` through to every call.
#[no_mangle]
pub extern "C" fn stack_trace_visit_ctx(ctx: *mut c_void, callback: Option<VisitCtxFn>) {
    let Some(callback) = callback else {
        tracing::warn!("stack_trace_visit_ctx: null callback");
        return;
    };
    global::visit(|file, func| callback(ctx, file.as_ptr(), func.as_ptr()));
}
