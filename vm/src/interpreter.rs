use core::cmp::Ordering;
use std::io::Write;

use bytecode::{DecodeError, Instruction, decode_at};
use object::{Number, StrRef, Value, ValueDisplay};

use crate::{
    Vm, VmState,
    error::{RuntimeError, VmError},
    native,
};

/// Outcome of one successful [`Vm::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExit {
    Continue,
    Halted,
}

/// Why [`Vm::run`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Halted,
    /// The step budget ran out. The VM is intact and `run` resumes it.
    StepLimit,
}

impl Vm {
    /// Executes exactly one instruction.
    ///
    /// A halted VM keeps reporting `Halted`. A faulted one keeps failing with
    /// [`RuntimeError::Faulted`] (leaving the recorded error alone) until a
    /// program is loaded or the VM is reset.
    pub fn step(&mut self) -> Result<StepExit, VmError> {
        if let Err(err) = self.outside_native("step") {
            return self.record(Err(err));
        }
        match self.state {
            VmState::Ready => {}
            VmState::Halted => return Ok(StepExit::Halted),
            VmState::Faulted => return Err(RuntimeError::Faulted.into()),
            VmState::Empty => {
                return self.record(Err(VmError::bad_argument("no program loaded")));
            }
        }

        if self.gc.wants_collection() {
            self.collect_garbage();
        }

        match self.execute() {
            Ok(exit) => Ok(exit),
            Err(err) => {
                log::warn!("fault at {}: {err}", self.ip);
                self.state = VmState::Faulted;
                self.record(Err(err))
            }
        }
    }

    /// Steps until the program halts, faults, or `max_steps` instructions
    /// have run. `0` means no limit.
    pub fn run(&mut self, max_steps: u64) -> Result<RunExit, VmError> {
        let mut steps = 0u64;
        loop {
            if max_steps != 0 && steps >= max_steps {
                log::debug!("step limit of {max_steps} reached at {}", self.ip);
                return Ok(RunExit::StepLimit);
            }
            match self.step()? {
                StepExit::Continue => steps += 1,
                StepExit::Halted => return Ok(RunExit::Halted),
            }
        }
    }

    /// Decodes and executes the instruction at `ip`. The instruction pointer
    /// only moves when the instruction succeeds.
    fn execute(&mut self) -> Result<StepExit, VmError> {
        let ip = self.ip;
        let code = &self.program.code;
        if ip >= code.len() {
            return Err(VmError::CodeOverrun { ip });
        }
        let instr = decode_at(code, ip).map_err(|err| match err {
            DecodeError::UnknownOpcode { byte, .. } => RuntimeError::UnknownOpcode { byte, ip }.into(),
            other => VmError::from(other),
        })?;
        log::trace!("{ip:>6}: {instr:<24} depth {}", self.stack.depth());

        let mut next = ip + instr.encoded_len();
        let op = instr.op().mnemonic();
        match instr {
            Instruction::PushInt { value } => self.stack.push(Value::Int(value))?,
            Instruction::PushFloat { value } => self.stack.push(Value::Float(value))?,
            Instruction::PushStr { idx } => {
                let s = self.constant(idx, ip)?;
                self.stack.push(Value::Str(s))?;
            }
            Instruction::PushNil => self.stack.push(Value::Nil)?,
            Instruction::PushBool { value } => self.stack.push(Value::Bool(value))?,

            Instruction::Add => {
                let (a, b) = self.stack.pop2(op)?;
                let result = self.add(a, b)?;
                self.stack.push(result)?;
            }
            Instruction::Sub => {
                let (a, b) = self.stack.pop2(op)?;
                let result = arith(op, a, b, i64::checked_sub, |x, y| x - y)?;
                self.stack.push(result)?;
            }
            Instruction::Mul => {
                let (a, b) = self.stack.pop2(op)?;
                let result = arith(op, a, b, i64::checked_mul, |x, y| x * y)?;
                self.stack.push(result)?;
            }
            Instruction::Div => {
                let (a, b) = self.stack.pop2(op)?;
                let result = divide(a, b)?;
                self.stack.push(result)?;
            }

            Instruction::Eq | Instruction::Neq => {
                let (a, b) = self.stack.pop2(op)?;
                let equal = self.values_equal(a, b);
                self.stack.push(Value::Bool(equal == matches!(instr, Instruction::Eq)))?;
            }
            Instruction::Lt | Instruction::Gt | Instruction::Le | Instruction::Ge => {
                let (a, b) = self.stack.pop2(op)?;
                let ordering = self.compare(op, a, b)?;
                let result = match instr {
                    Instruction::Lt => ordering == Some(Ordering::Less),
                    Instruction::Gt => ordering == Some(Ordering::Greater),
                    Instruction::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                    _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                };
                self.stack.push(Value::Bool(result))?;
            }

            Instruction::Print => {
                self.stack.require(op, 1)?;
                let top = self.stack.peek(0).unwrap_or_default();
                writeln!(self.output, "{}", ValueDisplay::new(&self.strings, top))?;
            }
            Instruction::Pop => {
                self.stack.pop(op)?;
            }
            Instruction::Dup => {
                self.stack.require(op, 1)?;
                let top = self.stack.peek(0).unwrap_or_default();
                self.stack.push(top)?;
            }
            Instruction::Swap => self.stack.swap_top(op)?,

            Instruction::StoreGlobal { idx } => {
                let key = self.constant(idx, ip)?;
                let value = self.stack.pop(op)?;
                self.globals.put(&self.strings, key, value)?;
            }
            Instruction::LoadGlobal { idx } => {
                let key = self.constant(idx, ip)?;
                let value = self.globals.get(&self.strings, key).copied().ok_or_else(|| VmError::NotFound {
                    kind: "global",
                    name: self.lossy(key),
                })?;
                self.stack.push(value)?;
            }
            Instruction::CallNative { idx, argc } => {
                let key = self.constant(idx, ip)?;
                let entry = self.natives.get(&self.strings, key).cloned().ok_or_else(|| VmError::NotFound {
                    kind: "native",
                    name: self.lossy(key),
                })?;
                let argc = usize::from(argc);
                self.stack.require(op, argc)?;

                // Arguments stay on the stack, and so stay rooted, during the call.
                let base = self.stack.depth() - argc;
                let args = self.stack.as_slice()[base..].to_vec();
                let nested = std::mem::replace(&mut self.in_native, true);
                let result = native::invoke(self, &entry, &args);
                self.in_native = nested;
                let result = result?;
                self.stack.truncate(base);
                self.stack.push(result)?;
            }

            Instruction::Jump { target } => next = target as usize,
            Instruction::JumpIfFalse { target } => {
                if !self.stack.pop(op)?.is_truthy() {
                    next = target as usize;
                }
            }
            Instruction::Halt => {
                self.state = VmState::Halted;
                log::debug!("halted at {ip}");
                return Ok(StepExit::Halted);
            }
        }

        self.ip = next;
        Ok(StepExit::Continue)
    }

    #[inline(always)]
    fn constant(&self, idx: u32, ip: usize) -> Result<StrRef, VmError> {
        self.program.consts.get(idx as usize).copied().ok_or_else(|| {
            DecodeError::StringIndexOutOfRange {
                index: idx,
                len: self.program.consts.len(),
                offset: ip,
            }
            .into()
        })
    }

    fn lossy(&self, s: StrRef) -> String {
        self.strings
            .bytes(s)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    /// Numeric addition, or concatenation of two strings into a new one.
    fn add(&mut self, a: Value, b: Value) -> Result<Value, VmError> {
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            let joined = self.strings.concat(x, y)?;
            self.gc.track(joined);
            return Ok(Value::Str(joined));
        }
        arith("add", a, b, i64::checked_add, |x, y| x + y)
    }

    /// Equality never faults: different kinds are unequal, ints and floats
    /// compare numerically and strings by content.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Native(x), Value::Native(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => {
                x == y
                    || match (self.strings.get(x), self.strings.get(y)) {
                        (Some(p), Some(q)) => p.hash() == q.hash() && p.as_bytes() == q.as_bytes(),
                        _ => false,
                    }
            }
            _ => match (a.as_number(), b.as_number()) {
                (Some(Number::Int(x)), Some(Number::Int(y))) => x == y,
                (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                _ => false,
            },
        }
    }

    /// Orders two numbers or two strings. `None` when either side is NaN.
    fn compare(&self, op: &'static str, a: Value, b: Value) -> Result<Option<Ordering>, VmError> {
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => {
                let lhs = self.strings.bytes(x).ok_or_else(|| stale(op))?;
                let rhs = self.strings.bytes(y).ok_or_else(|| stale(op))?;
                Ok(Some(lhs.cmp(rhs)))
            }
            _ => match (a.as_number(), b.as_number()) {
                (Some(Number::Int(x)), Some(Number::Int(y))) => Ok(Some(x.cmp(&y))),
                (Some(x), Some(y)) => Ok(x.as_f64().partial_cmp(&y.as_f64())),
                _ => Err(mismatch(op, a, b)),
            },
        }
    }
}

/// Integer arithmetic that widens to float when the checked operation
/// overflows. Any float operand makes the result a float.
fn arith(
    op: &'static str,
    a: Value,
    b: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, VmError> {
    match (a.as_number(), b.as_number()) {
        (Some(Number::Int(x)), Some(Number::Int(y))) => {
            Ok(int_op(x, y).map_or_else(|| Value::Float(float_op(x as f64, y as f64)), Value::Int))
        }
        (Some(x), Some(y)) => Ok(Value::Float(float_op(x.as_f64(), y.as_f64()))),
        _ => Err(mismatch(op, a, b)),
    }
}

/// Division always produces a float; an exactly zero divisor faults.
fn divide(a: Value, b: Value) -> Result<Value, VmError> {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => {
            let divisor = y.as_f64();
            if divisor == 0.0 {
                return Err(RuntimeError::DivisionByZero.into());
            }
            Ok(Value::Float(x.as_f64() / divisor))
        }
        _ => Err(mismatch("div", a, b)),
    }
}

fn mismatch(op: &'static str, a: Value, b: Value) -> VmError {
    RuntimeError::TypeMismatch {
        op,
        lhs: a.type_name(),
        rhs: b.type_name(),
    }
    .into()
}

fn stale(op: &'static str) -> VmError {
    VmError::bad_argument(format!("{op} on a string that is no longer live"))
}
