use core::fmt;
use std::{any::Any, sync::Arc};

use object::Value;

use crate::{Vm, error::VmError, signature::Signature};

/// Opaque host data handed back to a native on every call.
pub type NativeData = Arc<dyn Any + Send + Sync>;

/// The native calling convention.
///
/// `args` holds the call's arguments in push order and is only valid for the
/// duration of the call. `out` starts as `nil`; whatever the native leaves
/// there is pushed as the call's result.
pub type NativeFn =
    fn(vm: &mut Vm, args: &[Value], out: &mut Value, data: Option<&NativeData>) -> Result<(), VmError>;

/// A registered native: function pointer, user data and optional signature.
#[derive(Clone)]
pub struct NativeEntry {
    pub name: Arc<str>,
    pub func: NativeFn,
    pub data: Option<NativeData>,
    pub signature: Option<Arc<Signature>>,
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEntry")
            .field("name", &self.name)
            .field("func", &(self.func as *const ()))
            .field("data", &self.data.is_some())
            .field("signature", &self.signature.as_deref().map(ToString::to_string))
            .finish()
    }
}

/// Static description of a native, used for the builtin table.
#[derive(Clone, Copy)]
pub struct NativeDesc {
    pub name: &'static str,
    pub signature: Option<&'static str>,
    pub func: NativeFn,
}

impl NativeDesc {
    pub const fn new(name: &'static str, signature: Option<&'static str>, func: NativeFn) -> Self {
        Self { name, signature, func }
    }
}

/// Runs a native with `args`, applying its signature when it has one.
///
/// Coerced arguments stay rooted in the VM's scratch area for the duration
/// of the call.
pub(crate) fn invoke(vm: &mut Vm, entry: &NativeEntry, args: &[Value]) -> Result<Value, VmError> {
    let Some(signature) = entry.signature.as_deref() else {
        let mut out = Value::Nil;
        (entry.func)(vm, args, &mut out, entry.data.as_ref())?;
        return Ok(out);
    };

    let base = vm.scratch.len();
    let result = call_with_signature(vm, entry, signature, args);
    vm.scratch.truncate(base);
    result
}

fn call_with_signature(
    vm: &mut Vm,
    entry: &NativeEntry,
    signature: &Signature,
    args: &[Value],
) -> Result<Value, VmError> {
    let coerced = signature.coerce_args(vm, &entry.name, args)?;
    vm.scratch.extend_from_slice(&coerced);
    let mut out = Value::Nil;
    (entry.func)(vm, &coerced, &mut out, entry.data.as_ref())?;
    signature.coerce_return(vm, &entry.name, out)
}
