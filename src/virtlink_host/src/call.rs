use std::ffi::CStr;
use std::ptr::NonNull;

use libc::{c_char, c_int};
use tracing::trace;
use virtlink_common::error::ErrorContext;

use crate::error::VirtlinkError;
use crate::handle::HandleCell;
use crate::strings::OwnedCString;
use crate::Result;

/// A native entry point paired with the name reported when it fails.
///
/// Generators never learn a function's name from the closure they invoke,
/// so every call site binds the two together here; the [`native_call!`]
/// macro captures the name from the invocation itself.
///
/// [`native_call!`]: crate::native_call
pub struct NativeCall<F> {
    pub(crate) name: &'static str,
    pub(crate) f: F,
}

impl<F> NativeCall<F> {
    /// Pair a native entry point's name with its invocation.
    pub fn new(name: &'static str, f: F) -> Self {
        NativeCall { name, f }
    }

    /// The name of the underlying native entry point.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Build a [`NativeCall`](crate::call::NativeCall) from a native function
/// invocation, capturing the function's name for error reporting.
///
/// The one-argument form bakes the call's arguments into the invocation;
/// the two-argument form pairs the name with a closure for shapes where
/// the generator supplies some arguments itself (out-pointers, flags,
/// buffers).
#[macro_export]
macro_rules! native_call {
    ($func:ident ( $($arg:expr),* $(,)? )) => {
        $crate::call::NativeCall::new(stringify!($func), || unsafe { $func($($arg),*) })
    };
    ($func:ident, $f:expr) => {
        $crate::call::NativeCall::new(stringify!($func), $f)
    };
}

/// How the buffer returned by a string-returning native call is owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwnership {
    /// The native side keeps the buffer; copy without releasing it.
    Borrowed,
    /// The call transfers the buffer to the caller; release after copying.
    Transferred,
}

/// Invoke a native call returning a `char *`.
///
/// A null return fails with the generic call error. With
/// [`BufferOwnership::Transferred`] the native buffer is released exactly
/// once, whether or not the host copy succeeds; with
/// [`BufferOwnership::Borrowed`] no release happens at all.
pub fn string<F>(
    ctx: &dyn ErrorContext,
    ownership: BufferOwnership,
    call: NativeCall<F>,
) -> Result<String>
where
    F: FnOnce() -> *mut c_char,
{
    trace!(function = call.name, "invoking native string call");
    let Some(ptr) = NonNull::new((call.f)()) else {
        return Err(VirtlinkError::call(call.name, ctx));
    };
    match ownership {
        BufferOwnership::Transferred => {
            let buf = unsafe { OwnedCString::from_ptr(ptr) };
            buf.into_string()
        }
        BufferOwnership::Borrowed => {
            let s = unsafe { CStr::from_ptr(ptr.as_ptr()) };
            Ok(s.to_str()?.to_owned())
        }
    }
}

/// Invoke a native factory call returning an object pointer.
///
/// A null return fails with the generic call error; otherwise ownership of
/// the handle passes to the caller.
pub fn pointer<T, F>(ctx: &dyn ErrorContext, call: NativeCall<F>) -> Result<NonNull<T>>
where
    F: FnOnce() -> *mut T,
{
    trace!(function = call.name, "invoking native factory call");
    NonNull::new((call.f)()).ok_or_else(|| VirtlinkError::call(call.name, ctx))
}

/// Invoke a native call whose int return only distinguishes success from
/// failure. Negative fails with the generic call error.
pub fn unit<F>(ctx: &dyn ErrorContext, call: NativeCall<F>) -> Result<()>
where
    F: FnOnce() -> c_int,
{
    trace!(function = call.name, "invoking native status call");
    if (call.f)() < 0 {
        return Err(VirtlinkError::call(call.name, ctx));
    }
    Ok(())
}

/// Invoke a native call whose int return is a truth value. Negative fails
/// with the generic call error; zero is `false`, positive is `true`.
pub fn boolean<F>(ctx: &dyn ErrorContext, call: NativeCall<F>) -> Result<bool>
where
    F: FnOnce() -> c_int,
{
    trace!(function = call.name, "invoking native status call");
    match (call.f)() {
        r if r < 0 => Err(VirtlinkError::call(call.name, ctx)),
        0 => Ok(false),
        _ => Ok(true),
    }
}

/// Invoke a native call whose int return is a count or index. Negative
/// fails with the retrieval error; anything else comes back unchanged.
pub fn int<F>(ctx: &dyn ErrorContext, call: NativeCall<F>) -> Result<c_int>
where
    F: FnOnce() -> c_int,
{
    trace!(function = call.name, "invoking native status call");
    match (call.f)() {
        r if r < 0 => Err(VirtlinkError::retrieve(call.name, ctx)),
        r => Ok(r),
    }
}

/// Invoke the native destructor behind `handle` and null its backing
/// pointer.
///
/// Calling this twice is safe: a handle that was already released is left
/// alone and the call returns `Ok(())`. A failing destructor leaves the
/// pointer in place so the failure is observable and retryable.
pub fn free<T, F>(
    handle: &HandleCell<T>,
    ctx: &dyn ErrorContext,
    destroy: NativeCall<F>,
) -> Result<()>
where
    F: FnOnce(NonNull<T>) -> c_int,
{
    let Some(ptr) = handle.peek() else {
        return Ok(());
    };
    trace!(function = destroy.name, kind = handle.kind(), "releasing native handle");
    if (destroy.f)(ptr) < 0 {
        return Err(VirtlinkError::call(destroy.name, ctx));
    }
    handle.clear();
    Ok(())
}
