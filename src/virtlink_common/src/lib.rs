/// The native library's last-error record and the lookup seam for it.
pub mod error;
/// The typed-parameter wire surface shared with the native side.
pub mod params;

/// A native array of element pointers, as filled in by bulk-listing entry
/// points of the shape `int f(object, RawList<T> *out, unsigned int flags)`.
pub type RawList<T> = *mut *mut T;
