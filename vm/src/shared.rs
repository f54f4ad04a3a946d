use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::{RunExit, Vm, VmCreateInfo, error::VmError};

/// A VM behind a mutex, for hosts that hand one instance to several
/// threads. Every access is serialized; independent VMs need no sharing.
#[derive(Clone)]
pub struct SharedVm(Arc<Mutex<Vm>>);

impl SharedVm {
    pub fn new(info: VmCreateInfo) -> Result<Self, VmError> {
        Ok(Self::from_vm(Vm::new(info)?))
    }

    pub fn from_vm(vm: Vm) -> Self {
        Self(Arc::new(Mutex::new(vm)))
    }

    /// Locks the VM for a sequence of calls.
    pub fn lock(&self) -> MutexGuard<'_, Vm> {
        self.0.lock()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Vm) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn load(&self, bytes: &[u8]) -> Result<(), VmError> {
        self.0.lock().load(bytes)
    }

    pub fn run(&self, max_steps: u64) -> Result<RunExit, VmError> {
        self.0.lock().run(max_steps)
    }

    /// Returns the VM if this is the last handle.
    pub fn try_unwrap(self) -> Result<Vm, Self> {
        Arc::try_unwrap(self.0).map(Mutex::into_inner).map_err(Self)
    }
}
