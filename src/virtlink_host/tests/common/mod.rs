use std::ptr::NonNull;

use virtlink_host::{call, native_call, HandleCell, Result};
use virtlink_testing::{stub_vm_free, StubConn, StubVm};

/// Host-side wrapper over a stub machine: owns the native handle the way a
/// generated binding object would, releasing it on drop if the test did not
/// free it explicitly.
#[derive(Debug)]
pub struct Machine {
    handle: HandleCell<StubVm>,
}

impl Machine {
    pub fn wrap(ptr: NonNull<StubVm>) -> Self {
        Machine {
            handle: HandleCell::new("Machine", ptr),
        }
    }

    pub fn name(&self) -> Result<String> {
        let ptr = self.handle.get()?;
        Ok(unsafe { ptr.as_ref() }.name().to_string())
    }

    /// Borrow the underlying stub object. Panics after free, which no test
    /// relying on this helper should reach.
    pub fn vm(&self) -> &StubVm {
        let ptr = self.handle.get().expect("machine already freed");
        unsafe { ptr.as_ref() }
    }

    pub fn handle(&self) -> &HandleCell<StubVm> {
        &self.handle
    }

    pub fn free(&self, conn: &StubConn) -> Result<()> {
        call::free(
            &self.handle,
            conn,
            native_call!(stub_vm_free, |vm: NonNull<StubVm>| unsafe {
                stub_vm_free(vm.as_ptr())
            }),
        )
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if let Some(ptr) = self.handle.clear() {
            unsafe { stub_vm_free(ptr.as_ptr()) };
        }
    }
}

/// A freshly allocated stub machine wrapped as a host object.
pub fn new_machine(name: &str) -> Machine {
    Machine::wrap(NonNull::new(StubVm::create(name)).expect("stub allocation failed"))
}
