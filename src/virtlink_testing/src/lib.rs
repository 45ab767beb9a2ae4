//! An in-process, scripted stand-in for the native virtualization
//! library.
//!
//! Machines live on the Rust heap behind raw pointers and strings and
//! list buffers come from the C allocator, so the marshaling layer
//! releases them exactly the way it releases real native memory. Every
//! live machine is tracked per thread, which lets tests assert that
//! nothing leaked and that nothing was released twice, and lets the
//! whole suite run in parallel without cross-test interference.

use std::cell::RefCell;
use std::collections::HashSet;
use std::ffi::CStr;

use bitflags::bitflags;
use libc::{c_char, c_int};
use virtlink_common::error::{ErrorContext, NativeErrorRecord};
use virtlink_common::params::RawTypedParam;
use virtlink_common::RawList;

bitflags! {
    /// Filters understood by [`StubConn::list_vms`]. No bits set means no
    /// filtering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ListVmsFlags: u32 {
        /// Include running machines.
        const ACTIVE = 1;
        /// Include stopped machines.
        const INACTIVE = 2;
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<NativeErrorRecord>> = const { RefCell::new(None) };
    static LIVE_VMS: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// Record a native-style error for subsequent last-error lookups on this
/// thread.
pub fn record_error(code: c_int, component: c_int, message: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(NativeErrorRecord {
            code,
            component,
            level: 2,
            message: Some(message.to_string()),
        })
    });
}

/// Forget any recorded error.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Number of stub machines currently allocated on this thread.
pub fn live_vms() -> usize {
    LIVE_VMS.with(|l| l.borrow().len())
}

/// Copy `s` onto the C heap as a NUL-terminated string, for callers that
/// will release it with `libc::free`.
pub fn malloc_c_string(s: &str) -> *mut c_char {
    malloc_c_bytes(s.as_bytes())
}

/// Copy raw bytes onto the C heap with a NUL terminator appended. Useful
/// for handing deliberately invalid UTF-8 to the marshaling layer.
pub fn malloc_c_bytes(bytes: &[u8]) -> *mut c_char {
    unsafe {
        let buf = libc::malloc(bytes.len() + 1).cast::<u8>();
        assert!(!buf.is_null(), "stub allocation failed");
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        *buf.add(bytes.len()) = 0;
        buf.cast()
    }
}

/// A typed parameter value as the fake native side stores it.
#[derive(Debug, Clone, PartialEq)]
pub enum StubParamValue {
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
    String(std::string::String),
}

impl StubParamValue {
    /// The wire tag this value is declared with.
    pub fn tag(&self) -> c_int {
        use virtlink_common::params::*;
        match self {
            StubParamValue::Int(_) => TYPED_PARAM_INT,
            StubParamValue::UInt(_) => TYPED_PARAM_UINT,
            StubParamValue::Long(_) => TYPED_PARAM_LLONG,
            StubParamValue::ULong(_) => TYPED_PARAM_ULLONG,
            StubParamValue::Double(_) => TYPED_PARAM_DOUBLE,
            StubParamValue::Bool(_) => TYPED_PARAM_BOOLEAN,
            StubParamValue::String(_) => TYPED_PARAM_STRING,
        }
    }
}

/// A fake native machine object.
///
/// Instances are handed out as raw pointers and must be released through
/// [`stub_vm_free`], mirroring the ownership contract of a real native
/// handle.
#[derive(Debug)]
pub struct StubVm {
    name: String,
    params: RefCell<Vec<(String, StubParamValue)>>,
}

impl StubVm {
    /// Allocate a live machine. Release it with [`stub_vm_free`].
    pub fn create(name: &str) -> *mut StubVm {
        let vm = Box::into_raw(Box::new(StubVm {
            name: name.to_string(),
            params: RefCell::new(Vec::new()),
        }));
        LIVE_VMS.with(|l| l.borrow_mut().insert(vm as usize));
        vm
    }

    /// The machine's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a typed parameter with its current value. Declaration
    /// order is the order the fill call reports.
    pub fn declare_param(&self, name: &str, value: StubParamValue) {
        self.params
            .borrow_mut()
            .push((name.to_string(), value));
    }

    /// The current value of a declared parameter.
    pub fn param(&self, name: &str) -> Option<StubParamValue> {
        self.params
            .borrow()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

/// Destructor for [`StubVm`]. Negative when `vm` is null.
///
/// # Safety
///
/// `vm` must be null or a pointer obtained from [`StubVm::create`] that
/// has not been freed yet; the tracking table turns a double free into a
/// test panic before memory is touched.
pub unsafe fn stub_vm_free(vm: *mut StubVm) -> c_int {
    if vm.is_null() {
        return -1;
    }
    let live = LIVE_VMS.with(|l| l.borrow_mut().remove(&(vm as usize)));
    assert!(live, "stub_vm_free called twice for the same machine");
    unsafe { drop(Box::from_raw(vm)) };
    0
}

/// Count-then-fill surface: number of parameters declared on `vm`.
pub fn stub_vm_param_count(vm: &StubVm, _flags: u32) -> c_int {
    vm.params.borrow().len() as c_int
}

/// Count-then-fill surface: write the declared parameters into `buf`.
///
/// String values are copied onto the C heap; the caller owns and releases
/// those copies.
pub fn stub_vm_param_fill(
    vm: &StubVm,
    _flags: u32,
    buf: &mut [RawTypedParam],
    filled: &mut c_int,
) -> Option<&'static str> {
    let params = vm.params.borrow();
    if buf.len() < params.len() {
        record_error(1, 0, "parameter buffer too small");
        return Some("stubVmGetParameters");
    }
    for (entry, (name, value)) in buf.iter_mut().zip(params.iter()) {
        assert!(entry.set_name(name));
        entry.kind = value.tag();
        match value {
            StubParamValue::Int(v) => entry.value.i = *v,
            StubParamValue::UInt(v) => entry.value.ui = *v,
            StubParamValue::Long(v) => entry.value.l = *v,
            StubParamValue::ULong(v) => entry.value.ul = *v,
            StubParamValue::Double(v) => entry.value.d = *v,
            StubParamValue::Bool(v) => entry.value.b = *v as c_char,
            StubParamValue::String(v) => entry.value.s = malloc_c_string(v),
        }
    }
    *filled = params.len() as c_int;
    None
}

/// Apply a full parameter buffer to `vm`, the way an atomic native set
/// call would: the whole buffer is validated before anything is stored.
pub fn stub_vm_param_set(
    vm: &StubVm,
    _flags: u32,
    buf: &[RawTypedParam],
    count: c_int,
) -> Option<&'static str> {
    let entries = &buf[..count as usize];
    let mut updates = Vec::with_capacity(entries.len());
    {
        let params = vm.params.borrow();
        for entry in entries {
            let Ok(name) = entry.name() else {
                record_error(2, 0, "parameter name is not valid UTF-8");
                return Some("stubVmSetParameters");
            };
            let Some((_, current)) = params.iter().find(|(n, _)| n == name) else {
                record_error(2, 0, "unknown parameter");
                return Some("stubVmSetParameters");
            };
            if current.tag() != entry.kind {
                record_error(2, 0, "parameter type mismatch");
                return Some("stubVmSetParameters");
            }
            let value = match entry.kind {
                t if t == StubParamValue::Int(0).tag() => {
                    StubParamValue::Int(unsafe { entry.value.i })
                }
                t if t == StubParamValue::UInt(0).tag() => {
                    StubParamValue::UInt(unsafe { entry.value.ui })
                }
                t if t == StubParamValue::Long(0).tag() => {
                    StubParamValue::Long(unsafe { entry.value.l })
                }
                t if t == StubParamValue::ULong(0).tag() => {
                    StubParamValue::ULong(unsafe { entry.value.ul })
                }
                t if t == StubParamValue::Double(0.0).tag() => {
                    StubParamValue::Double(unsafe { entry.value.d })
                }
                t if t == StubParamValue::Bool(false).tag() => {
                    StubParamValue::Bool(unsafe { entry.value.b } != 0)
                }
                _ => {
                    let ptr = unsafe { entry.value.s };
                    if ptr.is_null() {
                        StubParamValue::String(String::new())
                    } else {
                        let s = unsafe { CStr::from_ptr(ptr) };
                        StubParamValue::String(s.to_string_lossy().into_owned())
                    }
                }
            };
            updates.push((name.to_string(), value));
        }
    }
    let mut params = vm.params.borrow_mut();
    for (name, value) in updates {
        if let Some(slot) = params.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        }
    }
    None
}

/// A fake connection: a set of machines to report from listings, plus the
/// last-error lookup the marshaling layer consults.
#[derive(Debug, Default)]
pub struct StubConn {
    vms: RefCell<Vec<(String, bool)>>,
}

impl StubConn {
    /// A connection with no machines.
    pub fn new() -> Self {
        StubConn::default()
    }

    /// Configure a machine the connection will report from listings.
    pub fn add_vm(&self, name: &str, active: bool) {
        self.vms.borrow_mut().push((name.to_string(), active));
    }

    /// Bulk-listing surface: allocate a C-heap array of newly created
    /// machines matching `flags` and store it through `out`. Returns the
    /// element count. The caller owns the array and every machine in it.
    pub fn list_vms(&self, out: *mut RawList<StubVm>, flags: u32) -> c_int {
        let flags = ListVmsFlags::from_bits_truncate(flags);
        let wanted = if flags.is_empty() {
            ListVmsFlags::all()
        } else {
            flags
        };
        let selected: Vec<*mut StubVm> = self
            .vms
            .borrow()
            .iter()
            .filter(|(_, active)| {
                wanted.contains(if *active {
                    ListVmsFlags::ACTIVE
                } else {
                    ListVmsFlags::INACTIVE
                })
            })
            .map(|(name, _)| StubVm::create(name))
            .collect();
        let count = selected.len();
        unsafe {
            let buf = libc::malloc(std::mem::size_of::<*mut StubVm>() * count.max(1))
                .cast::<*mut StubVm>();
            assert!(!buf.is_null(), "stub allocation failed");
            for (i, vm) in selected.iter().enumerate() {
                *buf.add(i) = *vm;
            }
            *out = buf;
        }
        count as c_int
    }
}

impl ErrorContext for StubConn {
    fn last_error(&self) -> Option<NativeErrorRecord> {
        LAST_ERROR.with(|e| e.borrow().clone())
    }
}
