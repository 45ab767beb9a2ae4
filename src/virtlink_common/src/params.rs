use std::str::Utf8Error;

use libc::{c_char, c_int};

/// Size of the name field of a typed parameter, including the NUL
/// terminator.
pub const TYPED_PARAM_FIELD_LENGTH: usize = 80;

/// Type tag for an `i32` value.
pub const TYPED_PARAM_INT: c_int = 1;
/// Type tag for a `u32` value.
pub const TYPED_PARAM_UINT: c_int = 2;
/// Type tag for an `i64` value.
pub const TYPED_PARAM_LLONG: c_int = 3;
/// Type tag for a `u64` value.
pub const TYPED_PARAM_ULLONG: c_int = 4;
/// Type tag for an `f64` value.
pub const TYPED_PARAM_DOUBLE: c_int = 5;
/// Type tag for a boolean value, stored as a `c_char` where zero is false.
pub const TYPED_PARAM_BOOLEAN: c_int = 6;
/// Type tag for a NUL-terminated string value.
pub const TYPED_PARAM_STRING: c_int = 7;

/// Value slot of a typed parameter. Which member is live is determined by
/// the enclosing entry's type tag.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawTypedParamValue {
    /// Live when the tag is [`TYPED_PARAM_INT`].
    pub i: i32,
    /// Live when the tag is [`TYPED_PARAM_UINT`].
    pub ui: u32,
    /// Live when the tag is [`TYPED_PARAM_LLONG`].
    pub l: i64,
    /// Live when the tag is [`TYPED_PARAM_ULLONG`].
    pub ul: u64,
    /// Live when the tag is [`TYPED_PARAM_DOUBLE`].
    pub d: f64,
    /// Live when the tag is [`TYPED_PARAM_BOOLEAN`].
    pub b: c_char,
    /// Live when the tag is [`TYPED_PARAM_STRING`].
    pub s: *mut c_char,
}

/// One entry of a native typed-parameter array, laid out the way the
/// native library declares it. Filled by the second call of the
/// count-then-fill protocol.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawTypedParam {
    /// Parameter name, NUL-terminated within the fixed-size field.
    pub field: [c_char; TYPED_PARAM_FIELD_LENGTH],
    /// One of the `TYPED_PARAM_*` tags.
    pub kind: c_int,
    /// Value, interpreted per `kind`.
    pub value: RawTypedParamValue,
}

impl Default for RawTypedParam {
    fn default() -> Self {
        RawTypedParam {
            field: [0; TYPED_PARAM_FIELD_LENGTH],
            kind: 0,
            value: RawTypedParamValue { ul: 0 },
        }
    }
}

impl RawTypedParam {
    /// Decode the name field up to its NUL terminator.
    pub fn name(&self) -> Result<&str, Utf8Error> {
        let len = self
            .field
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.field.len());
        let bytes = unsafe { std::slice::from_raw_parts(self.field.as_ptr().cast::<u8>(), len) };
        std::str::from_utf8(bytes)
    }

    /// Write `name` into the fixed-size field, NUL-terminated.
    ///
    /// Returns `false` when the name does not fit, leaving the field
    /// untouched.
    pub fn set_name(&mut self, name: &str) -> bool {
        let bytes = name.as_bytes();
        if bytes.len() >= TYPED_PARAM_FIELD_LENGTH {
            return false;
        }
        self.field = [0; TYPED_PARAM_FIELD_LENGTH];
        for (dst, &src) in self.field.iter_mut().zip(bytes) {
            *dst = src as c_char;
        }
        true
    }
}
