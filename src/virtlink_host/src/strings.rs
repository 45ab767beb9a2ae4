use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr::NonNull;

use crate::Result;

/// A NUL-terminated native buffer owned by this side of the boundary.
///
/// The buffer is released with the C allocator exactly once, on drop, so a
/// conversion failure or a panic partway through marshaling cannot leak it.
#[derive(Debug)]
pub struct OwnedCString {
    ptr: NonNull<c_char>,
}

impl OwnedCString {
    /// Take ownership of a native buffer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a NUL-terminated buffer allocated by the C
    /// allocator, and nothing else may release or mutate it afterward.
    pub unsafe fn from_ptr(ptr: NonNull<c_char>) -> Self {
        OwnedCString { ptr }
    }

    /// View the buffer as a `CStr`.
    pub fn as_c_str(&self) -> &CStr {
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    /// Copy the buffer into a host string, then release it.
    pub fn into_string(self) -> Result<String> {
        Ok(self.as_c_str().to_str()?.to_owned())
    }
}

impl Drop for OwnedCString {
    fn drop(&mut self) {
        unsafe { libc::free(self.ptr.as_ptr().cast()) };
    }
}

/// Convert an optional host string for a native call that accepts null.
///
/// `None` maps to a null argument; `Some` is NUL-checked and converted.
/// Callers pass `as_ptr()` of the returned `CString` (or a null pointer)
/// to the native side, which borrows rather than takes the memory.
pub fn optional_cstring(arg: Option<&str>) -> Result<Option<CString>> {
    Ok(arg.map(CString::new).transpose()?)
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::{optional_cstring, OwnedCString};
    use crate::error::VirtlinkError;

    fn malloc_cstring(s: &[u8]) -> NonNull<libc::c_char> {
        unsafe {
            let buf = libc::malloc(s.len() + 1).cast::<u8>();
            std::ptr::copy_nonoverlapping(s.as_ptr(), buf, s.len());
            *buf.add(s.len()) = 0;
            NonNull::new(buf.cast()).unwrap()
        }
    }

    #[test]
    fn into_string_copies_the_buffer() {
        let buf = unsafe { OwnedCString::from_ptr(malloc_cstring(b"qemu:///system")) };
        assert_eq!(buf.into_string().unwrap(), "qemu:///system");
    }

    #[test]
    fn invalid_utf8_fails_without_leaking() {
        let buf = unsafe { OwnedCString::from_ptr(malloc_cstring(b"\xff\xfe")) };
        assert!(matches!(buf.into_string(), Err(VirtlinkError::Utf8(_))));
    }

    #[test]
    fn optional_cstring_maps_none_to_none() {
        assert!(optional_cstring(None).unwrap().is_none());
    }

    #[test]
    fn optional_cstring_converts_some() {
        let converted = optional_cstring(Some("default")).unwrap().unwrap();
        assert_eq!(converted.as_bytes(), b"default");
    }

    #[test]
    fn optional_cstring_rejects_embedded_nul() {
        assert!(matches!(
            optional_cstring(Some("bad\0name")),
            Err(VirtlinkError::Nul(_))
        ));
    }
}
