use std::ptr::{self, NonNull};

use libc::{c_char, c_int};
use tracing::trace;
use virtlink_common::error::ErrorContext;
use virtlink_common::RawList;

use crate::call::NativeCall;
use crate::error::VirtlinkError;
use crate::strings::OwnedCString;
use crate::Result;

/// A filled native array of element pointers, with the function that
/// releases one element.
///
/// Elements transfer out in order through [`take_next`]; whatever has not
/// transferred by drop time is released, followed by the array buffer
/// itself. At every point each element is owned by exactly one party: this
/// list, the party it transferred to, or nobody because it was already
/// released.
///
/// [`take_next`]: NativeList::take_next
pub struct NativeList<T, F: FnMut(*mut T)> {
    items: RawList<T>,
    len: usize,
    next: usize,
    release: F,
}

impl<T, F: FnMut(*mut T)> NativeList<T, F> {
    /// Take ownership of a filled native array of `len` element pointers.
    ///
    /// # Safety
    ///
    /// `items` must either be null with `len` zero, or point to at least
    /// `len` element pointers allocated by the C allocator; the caller
    /// must not touch the array or its elements afterward.
    pub unsafe fn from_raw(items: RawList<T>, len: usize, release: F) -> Self {
        NativeList {
            items,
            len,
            next: 0,
            release,
        }
    }

    /// Number of elements the native call produced, transferred or not.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the native call produced no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Transfer the next element out of the list.
    ///
    /// Ownership of the returned pointer passes to the caller; this list
    /// will no longer release it.
    pub fn take_next(&mut self) -> Option<*mut T> {
        if self.next >= self.len {
            return None;
        }
        let elem = unsafe { *self.items.add(self.next) };
        self.next += 1;
        Some(elem)
    }

    /// Release an element directly: the rollback path for an element that
    /// was taken but never reached an owner.
    pub fn dispose(&mut self, elem: *mut T) {
        if !elem.is_null() {
            (self.release)(elem);
        }
    }
}

impl<T, F: FnMut(*mut T)> Drop for NativeList<T, F> {
    fn drop(&mut self) {
        for i in self.next..self.len {
            let elem = unsafe { *self.items.add(i) };
            if !elem.is_null() {
                (self.release)(elem);
            }
        }
        if !self.items.is_null() {
            unsafe { libc::free(self.items.cast()) };
        }
    }
}

/// Invoke a native bulk-listing call and wrap every element it produced.
///
/// `wrap` takes ownership of its element only when it returns `Ok`; the
/// wrapper it builds is then responsible for the element's eventual
/// release. On any failure (a negative count, a failed host reservation,
/// or a `wrap` error partway through) every native element is released
/// exactly once and the array buffer is freed before the error propagates:
/// already-wrapped elements through their wrappers, the element in flight
/// and the untouched tail directly.
///
/// An omitted `flags` argument is the same as passing 0.
pub fn all<T, W, F, M, R>(
    ctx: &dyn ErrorContext,
    flags: Option<u32>,
    call: NativeCall<F>,
    mut wrap: M,
    release: R,
) -> Result<Vec<W>>
where
    F: FnOnce(*mut RawList<T>, u32) -> c_int,
    M: FnMut(NonNull<T>) -> Result<W>,
    R: FnMut(*mut T),
{
    let flags = flags.unwrap_or(0);
    let mut items: RawList<T> = ptr::null_mut();
    trace!(function = call.name, flags, "invoking native listing call");
    let count = (call.f)(&mut items, flags);
    if count < 0 {
        return Err(VirtlinkError::retrieve(call.name, ctx));
    }

    let len = count as usize;
    let mut list = unsafe { NativeList::from_raw(items, len, release) };

    let mut wrapped = Vec::new();
    wrapped.try_reserve_exact(len)?;
    while let Some(elem) = list.take_next() {
        let Some(elem) = NonNull::new(elem) else {
            continue;
        };
        match wrap(elem) {
            Ok(w) => wrapped.push(w),
            Err(e) => {
                list.dispose(elem.as_ptr());
                return Err(e);
            }
        }
    }
    Ok(wrapped)
}

/// Convert a native array of C strings into host strings.
///
/// Every element is released exactly once whether or not its conversion
/// succeeds. The array buffer itself stays with the caller, as the native
/// enumeration contract requires.
pub fn strings(items: &[*mut c_char]) -> Result<Vec<String>> {
    // take ownership of every element up front so all paths release them
    let owned: Vec<Option<OwnedCString>> = items
        .iter()
        .map(|&p| NonNull::new(p).map(|nn| unsafe { OwnedCString::from_ptr(nn) }))
        .collect();

    let mut out = Vec::new();
    out.try_reserve_exact(owned.len())?;
    for s in owned.into_iter().flatten() {
        out.push(s.into_string()?);
    }
    Ok(out)
}
