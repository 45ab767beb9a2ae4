use std::cell::Cell;
use std::ptr::NonNull;

use crate::error::VirtlinkError;
use crate::Result;

/// The backing pointer of a host object that wraps a native handle.
///
/// The pointer is nulled the moment the native object is released, so a
/// release can only ever happen once; every later access fails with
/// [`VirtlinkError::Freed`]. The cell is deliberately not `Sync`: a handle
/// is owned by one logical thread of control at a time.
#[derive(Debug)]
pub struct HandleCell<T> {
    kind: &'static str,
    ptr: Cell<Option<NonNull<T>>>,
}

impl<T> HandleCell<T> {
    /// Wrap a live native pointer under the given object kind name.
    pub fn new(kind: &'static str, ptr: NonNull<T>) -> Self {
        HandleCell {
            kind,
            ptr: Cell::new(Some(ptr)),
        }
    }

    /// The object kind name used in "has been freed" errors.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The backing pointer, or [`VirtlinkError::Freed`] after release.
    pub fn get(&self) -> Result<NonNull<T>> {
        self.ptr.get().ok_or(VirtlinkError::Freed(self.kind))
    }

    /// The backing pointer without the freed check.
    pub fn peek(&self) -> Option<NonNull<T>> {
        self.ptr.get()
    }

    /// Whether the native object was already released.
    pub fn is_released(&self) -> bool {
        self.ptr.get().is_none()
    }

    /// Null the backing pointer, returning whatever it held.
    pub fn clear(&self) -> Option<NonNull<T>> {
        self.ptr.take()
    }
}
