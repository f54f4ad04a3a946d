//! An embeddable stack-machine VM.
//!
//! A [`Vm`] owns its operand stack, globals, native table, string heap and
//! collector registry. Programs come in as [`bytecode::Program`]s (or their
//! binary form), run with [`Vm::step`] / [`Vm::run`], and call out to host
//! code through registered natives.

pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod native;
pub mod shared;
pub mod signature;
pub mod stack;

use std::{
    io::{self, Write},
    sync::Arc,
};

use bytecode::Program;
use heap::{GcConfig, GcMode, GcRegistry, GcStats, RootProvider};
use object::{Map, StrRef, StringHeap, StringPool, Value, ValueDisplay};

pub use error::{LastError, RuntimeError, Status, VmError};
pub use interpreter::{RunExit, StepExit};
pub use native::{NativeData, NativeDesc, NativeEntry, NativeFn};
pub use shared::SharedVm;
pub use signature::{ArgType, Signature};
pub use stack::{OperandStack, StackInfo};

// ── Configuration ─────────────────────────────────────────────────────

pub struct VmCreateInfo {
    pub stack: StackInfo,
    pub gc: GcConfig,
    /// Destination of `print`. Defaults to stdout.
    pub output: Option<Box<dyn Write + Send>>,
    /// Register the builtin natives from [`builtins::default_natives`].
    pub builtins: bool,
    /// Share one string per distinct constant across loaded programs.
    pub dedup_constants: bool,
}

impl Default for VmCreateInfo {
    fn default() -> Self {
        Self {
            stack: StackInfo::default(),
            gc: GcConfig::default(),
            output: None,
            builtins: true,
            dedup_constants: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// No program loaded.
    Empty,
    /// A program is loaded and can make progress.
    Ready,
    Halted,
    /// The last step failed. Only `load` and `reset` leave this state.
    Faulted,
}

/// A program after loading: the code plus its pool as heap strings.
#[derive(Debug, Default)]
pub(crate) struct LoadedProgram {
    pub(crate) code: Vec<u8>,
    pub(crate) consts: Vec<StrRef>,
}

// ── VM ────────────────────────────────────────────────────────────────

pub struct Vm {
    pub(crate) strings: StringHeap,
    pub(crate) pool: StringPool,
    pub(crate) stack: OperandStack,
    pub(crate) globals: Map<Value>,
    pub(crate) natives: Map<NativeEntry>,
    pub(crate) program: LoadedProgram,
    pub(crate) ip: usize,
    pub(crate) state: VmState,
    pub(crate) gc: GcRegistry,
    pub(crate) output: Box<dyn Write + Send>,
    /// Values that must stay alive while a native runs.
    pub(crate) scratch: Vec<Value>,
    /// Set while `call_native` runs a native from program code.
    pub(crate) in_native: bool,
    last_error: Option<LastError>,
    dedup_constants: bool,
}

/// Borrowed view of everything that keeps a string alive.
pub(crate) struct VmRoots<'a> {
    stack: &'a [Value],
    globals: &'a Map<Value>,
    natives: &'a Map<NativeEntry>,
    consts: &'a [StrRef],
    scratch: &'a [Value],
}

impl RootProvider for VmRoots<'_> {
    fn visit_roots(&self, visitor: &mut dyn FnMut(StrRef)) {
        let mut visit_value = |value: &Value| {
            if let Value::Str(s) = *value {
                visitor(s);
            }
        };
        self.stack.iter().for_each(&mut visit_value);
        self.scratch.iter().for_each(&mut visit_value);
        for (key, value) in self.globals.iter() {
            visitor(key);
            if let Value::Str(s) = *value {
                visitor(s);
            }
        }
        for key in self.natives.keys() {
            visitor(key);
        }
        for &s in self.consts {
            visitor(s);
        }
    }
}

impl Vm {
    pub fn new(info: VmCreateInfo) -> Result<Self, VmError> {
        let mut vm = Self {
            strings: StringHeap::new(),
            pool: StringPool::new(),
            stack: OperandStack::new(&info.stack)?,
            globals: Map::new(),
            natives: Map::new(),
            program: LoadedProgram::default(),
            ip: 0,
            state: VmState::Empty,
            gc: GcRegistry::new(info.gc),
            output: info.output.unwrap_or_else(|| Box::new(io::stdout())),
            scratch: Vec::new(),
            in_native: false,
            last_error: None,
            dedup_constants: info.dedup_constants,
        };
        if info.builtins {
            for desc in builtins::default_natives() {
                match desc.signature {
                    Some(sig) => vm.register_native_with_signature(desc.name, sig, desc.func, None)?,
                    None => vm.register_native(desc.name, desc.func, None)?,
                }
            }
        }
        log::debug!(
            "vm created: stack {} ({}), gc {:?}",
            info.stack.capacity,
            if info.stack.growable { "growable" } else { "fixed" },
            info.gc
        );
        Ok(vm)
    }

    // ── Programs ───────────────────────────────────────────────────

    /// Loads a binary program, replacing the current one.
    ///
    /// Nothing changes when the bytes are rejected.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        let result = self
            .outside_native("load a program")
            .and_then(|()| Program::load(bytes).map_err(VmError::from))
            .and_then(|program| self.install(&program));
        self.record(result)
    }

    /// Verifies and installs an already decoded program.
    pub fn load_program(&mut self, program: &Program) -> Result<(), VmError> {
        let result = self
            .outside_native("load a program")
            .and_then(|()| program.verify().map_err(VmError::from))
            .and_then(|()| self.install(program));
        self.record(result)
    }

    fn install(&mut self, program: &Program) -> Result<(), VmError> {
        let mut code = Vec::new();
        code.try_reserve_exact(program.code.len())
            .map_err(|_| VmError::OutOfMemory { what: "code" })?;
        code.extend_from_slice(&program.code);

        let mut consts = Vec::new();
        consts
            .try_reserve_exact(program.strings.len())
            .map_err(|_| VmError::OutOfMemory { what: "constant pool" })?;
        for bytes in &program.strings {
            let handle = if self.dedup_constants {
                self.pool.intern(&mut self.strings, bytes)?.0
            } else {
                self.strings.alloc(bytes)?
            };
            self.gc.track_borrowed(handle);
            consts.push(handle);
        }

        let old = std::mem::replace(&mut self.program, LoadedProgram { code, consts });
        // The outgoing pool is no longer referenced by code; in `Own` mode it
        // becomes collectable like any other string. Deduplicated constants
        // the new program shares stay borrowed.
        for handle in old.consts {
            if !self.program.consts.contains(&handle) {
                self.gc.adopt(handle);
            }
        }

        self.stack.clear();
        self.ip = 0;
        self.state = VmState::Ready;
        log::debug!(
            "loaded program: {} bytes of code, {} constants",
            self.program.code.len(),
            self.program.consts.len()
        );
        Ok(())
    }

    /// Rewinds the current program: empties the stack and clears a fault.
    /// Globals and natives are kept.
    pub fn reset(&mut self) -> Result<(), VmError> {
        let result = self.outside_native("reset").map(|()| {
            self.stack.clear();
            self.ip = 0;
            if self.state != VmState::Empty {
                self.state = VmState::Ready;
            }
        });
        self.record(result)
    }

    /// Natives called from program code may not move the program they are
    /// running in.
    pub(crate) fn outside_native(&self, what: &str) -> Result<(), VmError> {
        if self.in_native {
            return Err(VmError::bad_argument(format!("cannot {what} from inside a native call")));
        }
        Ok(())
    }

    // ── Natives ────────────────────────────────────────────────────

    /// Registers `func` under `name`, replacing any previous native.
    pub fn register_native(&mut self, name: &str, func: NativeFn, data: Option<NativeData>) -> Result<(), VmError> {
        let entry = NativeEntry {
            name: Arc::from(name),
            func,
            data,
            signature: None,
        };
        let result = self.insert_native(name, entry);
        self.record(result)
    }

    /// Registers `func` behind the signature wrapper: arity is checked and
    /// arguments and result are coerced before and after every call.
    pub fn register_native_with_signature(
        &mut self,
        name: &str,
        signature: &str,
        func: NativeFn,
        data: Option<NativeData>,
    ) -> Result<(), VmError> {
        let result = Signature::parse(signature).and_then(|sig| {
            let entry = NativeEntry {
                name: Arc::from(name),
                func,
                data,
                signature: Some(Arc::new(sig)),
            };
            self.insert_native(name, entry)
        });
        self.record(result)
    }

    fn insert_native(&mut self, name: &str, entry: NativeEntry) -> Result<(), VmError> {
        let key = match self.natives.key_for_bytes(&self.strings, name.as_bytes()) {
            Some(key) => key,
            None => self.alloc_tracked(name.as_bytes())?,
        };
        self.natives.put(&self.strings, key, entry)?;
        log::debug!("registered native `{name}`");
        Ok(())
    }

    pub fn unregister_native(&mut self, name: &str) -> bool {
        self.natives.del_bytes(&self.strings, name.as_bytes()).is_some()
    }

    pub fn has_native(&self, name: &str) -> bool {
        self.natives.get_bytes(&self.strings, name.as_bytes()).is_some()
    }

    /// Calls a registered native directly, outside of any program.
    pub fn call_native(&mut self, name: &str, args: &[Value]) -> Result<Value, VmError> {
        let result = match self.natives.get_bytes(&self.strings, name.as_bytes()).cloned() {
            Some(entry) => native::invoke(self, &entry, args),
            None => Err(VmError::NotFound {
                kind: "native",
                name: name.to_owned(),
            }),
        };
        self.record(result)
    }

    // ── Globals ────────────────────────────────────────────────────

    pub fn get_global(&mut self, name: &str) -> Result<Value, VmError> {
        let result = self
            .globals
            .get_bytes(&self.strings, name.as_bytes())
            .copied()
            .ok_or_else(|| VmError::NotFound {
                kind: "global",
                name: name.to_owned(),
            });
        self.record(result)
    }

    pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), VmError> {
        let result = self.put_global(name, value);
        self.record(result)
    }

    fn put_global(&mut self, name: &str, value: Value) -> Result<(), VmError> {
        self.check_live(value)?;
        let key = match self.globals.key_for_bytes(&self.strings, name.as_bytes()) {
            Some(key) => key,
            None => self.alloc_tracked(name.as_bytes())?,
        };
        self.globals.put(&self.strings, key, value)?;
        Ok(())
    }

    pub fn globals(&self) -> impl Iterator<Item = (&[u8], Value)> {
        self.globals
            .iter()
            .filter_map(|(key, &value)| Some((self.strings.bytes(key)?, value)))
    }

    // ── Strings and values ─────────────────────────────────────────

    /// Allocates a fresh VM string. Equal contents get distinct identities.
    pub fn new_string(&mut self, bytes: &[u8]) -> Result<Value, VmError> {
        let result = self.alloc_tracked(bytes).map(Value::Str);
        self.record(result)
    }

    /// Returns the pooled string for `text`, allocating it once.
    pub fn intern(&mut self, text: &str) -> Result<Value, VmError> {
        let result = self
            .pool
            .intern(&mut self.strings, text.as_bytes())
            .map_err(VmError::from)
            .map(|(handle, fresh)| {
                if fresh {
                    self.gc.track(handle);
                }
                Value::Str(handle)
            });
        self.record(result)
    }

    pub(crate) fn alloc_tracked(&mut self, bytes: &[u8]) -> Result<StrRef, VmError> {
        let handle = self.strings.alloc(bytes)?;
        self.gc.track(handle);
        Ok(handle)
    }

    pub fn string_bytes(&self, s: StrRef) -> Option<&[u8]> {
        self.strings.bytes(s)
    }

    pub fn value_bytes(&self, value: Value) -> Option<&[u8]> {
        self.strings.bytes(value.as_str()?)
    }

    /// Canonical text of a value.
    pub fn format(&self, value: Value) -> String {
        self.display(value).to_string()
    }

    pub fn display(&self, value: Value) -> ValueDisplay<'_> {
        ValueDisplay::new(&self.strings, value)
    }

    fn check_live(&self, value: Value) -> Result<(), VmError> {
        match value {
            Value::Str(s) if !self.strings.contains(s) => Err(VmError::bad_argument("string handle is no longer live")),
            _ => Ok(()),
        }
    }

    // ── Introspection ──────────────────────────────────────────────

    /// The operand stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    /// Pushes a host value, e.g. before stepping into code that expects it.
    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        let result = self.check_live(value).and_then(|()| self.stack.push(value));
        self.record(result)
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop("pop").ok()
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn constants(&self) -> &[StrRef] {
        &self.program.consts
    }

    pub fn live_strings(&self) -> usize {
        self.strings.len()
    }

    // ── Garbage collection ─────────────────────────────────────────

    /// Runs one mark-sweep cycle over the tracked strings.
    pub fn collect_garbage(&mut self) -> GcStats {
        let roots = VmRoots {
            stack: self.stack.as_slice(),
            globals: &self.globals,
            natives: &self.natives,
            consts: &self.program.consts,
            scratch: &self.scratch,
        };
        let stats = self.gc.collect(&roots, &mut self.strings);
        if stats.freed > 0 {
            self.pool.purge(&self.strings);
        }
        stats
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc.stats()
    }

    pub fn gc_mode(&self) -> GcMode {
        self.gc.mode()
    }

    pub fn set_gc_mode(&mut self, mode: GcMode) {
        self.gc.set_mode(mode);
    }

    pub fn set_gc_threshold(&mut self, threshold: Option<usize>) {
        self.gc.set_threshold(threshold);
    }

    // ── Errors ─────────────────────────────────────────────────────

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Stores a failure in the last-error slot and passes the result on.
    pub(crate) fn record<T>(&mut self, result: Result<T, VmError>) -> Result<T, VmError> {
        if let Err(err) = &result {
            self.last_error = Some(LastError::from(err));
        }
        result
    }
}

impl core::fmt::Debug for Vm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vm")
            .field("state", &self.state)
            .field("ip", &self.ip)
            .field("stack", &self.stack.depth())
            .field("globals", &self.globals.len())
            .field("natives", &self.natives.len())
            .field("strings", &self.strings.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{io, sync::Arc};

    use parking_lot::Mutex;

    /// An output sink tests can read back.
    #[derive(Debug, Clone, Default)]
    pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
