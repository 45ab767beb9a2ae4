use std::ffi::{CStr, CString};

use indexmap::IndexMap;
use libc::{c_char, c_int};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::trace;
use virtlink_common::error::ErrorContext;
use virtlink_common::params::{
    RawTypedParam, TYPED_PARAM_BOOLEAN, TYPED_PARAM_DOUBLE, TYPED_PARAM_INT, TYPED_PARAM_LLONG,
    TYPED_PARAM_STRING, TYPED_PARAM_UINT, TYPED_PARAM_ULLONG,
};

use crate::call::NativeCall;
use crate::error::VirtlinkError;
use crate::Result;

/// Host mapping of typed parameters. Keys are unique; iteration follows
/// native buffer order.
pub type ParamMap = IndexMap<String, ParamValue>;

/// Supported typed-parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum ParamKind {
    /// i32
    Int,
    /// u32
    UInt,
    /// i64
    Long,
    /// u64
    ULong,
    /// f64
    Double,
    /// bool
    Bool,
    /// String
    String,
}

impl ParamKind {
    /// The native wire tag for this kind.
    pub fn tag(self) -> c_int {
        match self {
            ParamKind::Int => TYPED_PARAM_INT,
            ParamKind::UInt => TYPED_PARAM_UINT,
            ParamKind::Long => TYPED_PARAM_LLONG,
            ParamKind::ULong => TYPED_PARAM_ULLONG,
            ParamKind::Double => TYPED_PARAM_DOUBLE,
            ParamKind::Bool => TYPED_PARAM_BOOLEAN,
            ParamKind::String => TYPED_PARAM_STRING,
        }
    }

    /// Decode a native wire tag.
    pub fn from_tag(tag: c_int) -> Result<Self> {
        match tag {
            TYPED_PARAM_INT => Ok(ParamKind::Int),
            TYPED_PARAM_UINT => Ok(ParamKind::UInt),
            TYPED_PARAM_LLONG => Ok(ParamKind::Long),
            TYPED_PARAM_ULLONG => Ok(ParamKind::ULong),
            TYPED_PARAM_DOUBLE => Ok(ParamKind::Double),
            TYPED_PARAM_BOOLEAN => Ok(ParamKind::Bool),
            TYPED_PARAM_STRING => Ok(ParamKind::String),
            other => Err(VirtlinkError::InvalidParamType(other)),
        }
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    /// i32
    Int(i32),
    /// u32
    UInt(u32),
    /// i64
    Long(i64),
    /// u64
    ULong(u64),
    /// f64
    Double(f64),
    /// bool
    Bool(bool),
    /// String
    String(String),
}

impl ParamValue {
    /// The kind of this value.
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::UInt(_) => ParamKind::UInt,
            ParamValue::Long(_) => ParamKind::Long,
            ParamValue::ULong(_) => ParamKind::ULong,
            ParamValue::Double(_) => ParamKind::Double,
            ParamValue::Bool(_) => ParamKind::Bool,
            ParamValue::String(_) => ParamKind::String,
        }
    }
}

/// Owns the native-allocated strings inside a filled parameter buffer and
/// releases each exactly once, however the enclosing conversion ends.
struct FilledParams<'a> {
    params: &'a mut [RawTypedParam],
    // slots whose string value no longer belongs to the native buffer
    detached: Vec<bool>,
}

impl<'a> FilledParams<'a> {
    fn new(params: &'a mut [RawTypedParam]) -> Self {
        let detached = vec![false; params.len()];
        FilledParams { params, detached }
    }

    fn entries(&self) -> &[RawTypedParam] {
        self.params
    }

    fn entries_mut(&mut self) -> &mut [RawTypedParam] {
        self.params
    }

    /// Point a string slot at caller-owned memory, releasing whatever
    /// native string it held.
    fn put_string(&mut self, idx: usize, ptr: *const c_char) {
        let param = &mut self.params[idx];
        if param.kind == TYPED_PARAM_STRING && !self.detached[idx] {
            let old = unsafe { param.value.s };
            if !old.is_null() {
                unsafe { libc::free(old.cast()) };
            }
        }
        param.value.s = ptr as *mut c_char;
        self.detached[idx] = true;
    }
}

impl Drop for FilledParams<'_> {
    fn drop(&mut self) {
        for (i, param) in self.params.iter().enumerate() {
            if self.detached[i] || param.kind != TYPED_PARAM_STRING {
                continue;
            }
            let s = unsafe { param.value.s };
            if !s.is_null() {
                unsafe { libc::free(s.cast()) };
            }
        }
    }
}

fn decode_value(param: &RawTypedParam) -> Result<ParamValue> {
    Ok(match param.kind {
        TYPED_PARAM_INT => ParamValue::Int(unsafe { param.value.i }),
        TYPED_PARAM_UINT => ParamValue::UInt(unsafe { param.value.ui }),
        TYPED_PARAM_LLONG => ParamValue::Long(unsafe { param.value.l }),
        TYPED_PARAM_ULLONG => ParamValue::ULong(unsafe { param.value.ul }),
        TYPED_PARAM_DOUBLE => ParamValue::Double(unsafe { param.value.d }),
        TYPED_PARAM_BOOLEAN => ParamValue::Bool(unsafe { param.value.b } != 0),
        TYPED_PARAM_STRING => {
            let ptr = unsafe { param.value.s };
            if ptr.is_null() {
                // a null string entry decodes as the empty string
                ParamValue::String(String::new())
            } else {
                let s = unsafe { CStr::from_ptr(ptr) };
                ParamValue::String(s.to_str()?.to_owned())
            }
        }
        other => return Err(VirtlinkError::InvalidParamType(other)),
    })
}

/// Fetch an object's typed parameters through the count-then-fill
/// protocol.
///
/// A negative count means the feature is unsupported on this connection
/// or build. A zero count is a genuine empty result: the fill call is
/// skipped and an empty mapping comes back. Native-owned strings in the
/// fill result are released exactly once, even when decoding fails
/// midway. An omitted `flags` argument is the same as passing 0.
pub fn retrieve<O, C, G>(
    obj: &O,
    ctx: &dyn ErrorContext,
    flags: Option<u32>,
    count: NativeCall<C>,
    fill: NativeCall<G>,
) -> Result<ParamMap>
where
    C: FnOnce(&O, u32) -> c_int,
    G: FnOnce(&O, u32, &mut [RawTypedParam], &mut c_int) -> Option<&'static str>,
{
    let flags = flags.unwrap_or(0);
    trace!(function = count.name, flags, "querying typed parameter count");
    let declared = (count.f)(obj, flags);
    if declared < 0 {
        return Err(VirtlinkError::no_support(count.name, ctx));
    }

    let mut map = ParamMap::new();
    if declared == 0 {
        return Ok(map);
    }

    let mut buf = vec![RawTypedParam::default(); declared as usize];
    let mut filled = declared;
    trace!(function = fill.name, "filling typed parameter buffer");
    if let Some(failed) = (fill.f)(obj, flags, &mut buf, &mut filled) {
        return Err(VirtlinkError::call(failed, ctx));
    }
    let filled = filled.clamp(0, declared) as usize;

    let guard = FilledParams::new(&mut buf[..filled]);
    for entry in guard.entries() {
        let name = entry.name()?.to_owned();
        let value = decode_value(entry)?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Assign typed parameters from a host mapping.
///
/// The native side, not the caller, knows each parameter's kind, so the
/// object's declared parameters are fetched first and the new values are
/// written over them; the full buffer then goes back in a single set
/// call, which applies atomically or not at all. Names the object does
/// not declare, and values whose kind differs from the declared one, fail
/// before any native write. An empty mapping is a no-op with no native
/// call; an omitted `flags` argument is the same as passing 0.
pub fn assign<O, C, G, S>(
    obj: &O,
    ctx: &dyn ErrorContext,
    input: &ParamMap,
    flags: Option<u32>,
    count: NativeCall<C>,
    get: NativeCall<G>,
    set: NativeCall<S>,
) -> Result<()>
where
    C: FnOnce(&O, u32) -> c_int,
    G: FnOnce(&O, u32, &mut [RawTypedParam], &mut c_int) -> Option<&'static str>,
    S: FnOnce(&O, u32, &[RawTypedParam], c_int) -> Option<&'static str>,
{
    if input.is_empty() {
        return Ok(());
    }
    let flags = flags.unwrap_or(0);

    trace!(function = count.name, flags, "querying typed parameter count");
    let declared = (count.f)(obj, flags);
    if declared < 0 {
        return Err(VirtlinkError::no_support(count.name, ctx));
    }

    let mut buf = vec![RawTypedParam::default(); declared as usize];
    let mut filled = 0;
    if declared > 0 {
        filled = declared;
        trace!(function = get.name, "fetching declared typed parameters");
        if let Some(failed) = (get.f)(obj, flags, &mut buf, &mut filled) {
            return Err(VirtlinkError::retrieve(failed, ctx));
        }
    }
    let filled = filled.clamp(0, declared) as usize;
    let mut guard = FilledParams::new(&mut buf[..filled]);

    // keeps encoded strings alive across the set call
    let mut encoded = Vec::new();
    for (name, value) in input {
        let mut slot = None;
        for (i, entry) in guard.entries().iter().enumerate() {
            if entry.name()? == name.as_str() {
                slot = Some(i);
                break;
            }
        }
        let Some(idx) = slot else {
            return Err(VirtlinkError::definition_explained(
                set.name,
                format!("unknown parameter {name}"),
            ));
        };

        let declared_kind = ParamKind::from_tag(guard.entries()[idx].kind)?;
        if value.kind() != declared_kind {
            return Err(VirtlinkError::definition_explained(
                set.name,
                format!(
                    "parameter {name} expects {declared_kind}, got {}",
                    value.kind()
                ),
            ));
        }

        match value {
            ParamValue::Int(v) => guard.entries_mut()[idx].value.i = *v,
            ParamValue::UInt(v) => guard.entries_mut()[idx].value.ui = *v,
            ParamValue::Long(v) => guard.entries_mut()[idx].value.l = *v,
            ParamValue::ULong(v) => guard.entries_mut()[idx].value.ul = *v,
            ParamValue::Double(v) => guard.entries_mut()[idx].value.d = *v,
            ParamValue::Bool(v) => guard.entries_mut()[idx].value.b = *v as c_char,
            ParamValue::String(v) => {
                let cstr = CString::new(v.as_str()).map_err(|_| {
                    VirtlinkError::definition_explained(
                        set.name,
                        format!("parameter {name} contains an embedded NUL byte"),
                    )
                })?;
                guard.put_string(idx, cstr.as_ptr());
                encoded.push(cstr);
            }
        }
    }

    trace!(function = set.name, count = filled, "writing typed parameters");
    if let Some(failed) = (set.f)(obj, flags, guard.entries(), filled as c_int) {
        return Err(VirtlinkError::definition(failed, ctx));
    }
    Ok(())
}
