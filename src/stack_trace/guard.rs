use super::global;
use core::ffi::CStr;
use core::marker::PhantomData;

/// Scoped frame on the process-wide stack trace.
///
/// Enters on construction and leaves on drop. A frame that could not be
/// recorded is not left either, so a failed `enter` never pops an outer
/// frame with the same labels.
#[must_use = "the frame is left as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FrameGuard {
    file: &'static CStr,
    func: &'static CStr,
    entered: bool,
    _not_send: PhantomData<*const ()>,
}

impl FrameGuard {
    pub fn new(file: &'static CStr, func: &'static CStr) -> Self {
        Self {
            file,
            func,
            entered: global::enter(file, func),
            _not_send: PhantomData,
        }
    }

    /// Whether the frame made it onto the stack.
    pub fn is_recorded(&self) -> bool {
        self.entered
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.entered {
            global::leave(self.file, self.func);
        }
    }
}

/// Turn a string literal (or `file!()`, `module_path!()`, ...) into a
/// `&'static CStr` at compile time.
#[macro_export]
macro_rules! trace_label {
    ($($label:tt)+) => {{
        const BYTES: &[u8] = ::core::concat!($($label)+, "\0").as_bytes();
        const LABEL: &::core::ffi::CStr = match ::core::ffi::CStr::from_bytes_with_nul(BYTES) {
            ::core::result::Result::Ok(label) => label,
            ::core::result::Result::Err(_) => ::core::panic!("trace label contains a nul byte"),
        };
        LABEL
    }};
}

/// Record the enclosing scope on the process-wide stack trace.
///
/// Without arguments the frame is labelled with `file!()` and
/// `module_path!()`; a string literal overrides the function label.
///
/// ```
/// fn parse() {
///     lifecycle_sync::auto_stack_trace!("parse");
///     // ...
/// }
/// # parse();
/// ```
#[macro_export]
macro_rules! auto_stack_trace {
    () => {
        let _stack_trace_guard = $crate::stack_trace::FrameGuard::new(
            $crate::trace_label!(file!()),
            $crate::trace_label!(module_path!()),
        );
    };
    ($func:literal) => {
        let _stack_trace_guard = $crate::stack_trace::FrameGuard::new(
            $crate::trace_label!(file!()),
            $crate::trace_label!($func),
        );
    };
}
