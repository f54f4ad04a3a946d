use crate::instruction::Instruction;
use crate::program::Program;

/// A forward jump whose target has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`] and [`BytecodeBuilder::jump_if_false`].
/// Resolve it with [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use = "an unbound label leaves a jump to offset 0"]
pub struct Label {
    /// Position of the u32 target bytes in the buffer.
    target_pos: usize,
}

/// Builds a program: instruction bytes plus the string constant pool.
///
/// Pool strings are deduplicated by content; the first appearance decides
/// the index.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    buf: Vec<u8>,
    strings: Vec<Box<[u8]>>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            strings: Vec::new(),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn build(self) -> Program {
        Program::new(self.strings, self.buf)
    }

    /// Returns the pool index for `bytes`, adding it on first use.
    pub fn intern(&mut self, bytes: &[u8]) -> u32 {
        if let Some(idx) = self.strings.iter().position(|s| &s[..] == bytes) {
            return idx as u32;
        }
        self.push_string(bytes)
    }

    /// Appends a pool entry without deduplication.
    pub fn push_string(&mut self, bytes: &[u8]) -> u32 {
        self.strings.push(Box::from(bytes));
        (self.strings.len() - 1) as u32
    }

    pub fn emit(&mut self, instr: Instruction) {
        instr.encode(&mut self.buf);
    }

    // ── instructions ───────────────────────────────────────────────

    pub fn push_int(&mut self, value: i64) {
        self.emit(Instruction::PushInt { value });
    }

    pub fn push_float(&mut self, value: f64) {
        self.emit(Instruction::PushFloat { value });
    }

    pub fn push_str(&mut self, s: &str) {
        let idx = self.intern(s.as_bytes());
        self.emit(Instruction::PushStr { idx });
    }

    pub fn push_nil(&mut self) {
        self.emit(Instruction::PushNil);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.emit(Instruction::PushBool { value });
    }

    pub fn add(&mut self) {
        self.emit(Instruction::Add);
    }

    pub fn sub(&mut self) {
        self.emit(Instruction::Sub);
    }

    pub fn mul(&mut self) {
        self.emit(Instruction::Mul);
    }

    pub fn div(&mut self) {
        self.emit(Instruction::Div);
    }

    pub fn eq(&mut self) {
        self.emit(Instruction::Eq);
    }

    pub fn neq(&mut self) {
        self.emit(Instruction::Neq);
    }

    pub fn lt(&mut self) {
        self.emit(Instruction::Lt);
    }

    pub fn gt(&mut self) {
        self.emit(Instruction::Gt);
    }

    pub fn le(&mut self) {
        self.emit(Instruction::Le);
    }

    pub fn ge(&mut self) {
        self.emit(Instruction::Ge);
    }

    pub fn print(&mut self) {
        self.emit(Instruction::Print);
    }

    pub fn pop(&mut self) {
        self.emit(Instruction::Pop);
    }

    pub fn dup(&mut self) {
        self.emit(Instruction::Dup);
    }

    pub fn swap(&mut self) {
        self.emit(Instruction::Swap);
    }

    pub fn store_global(&mut self, name: &str) {
        let idx = self.intern(name.as_bytes());
        self.emit(Instruction::StoreGlobal { idx });
    }

    pub fn load_global(&mut self, name: &str) {
        let idx = self.intern(name.as_bytes());
        self.emit(Instruction::LoadGlobal { idx });
    }

    pub fn call_native(&mut self, name: &str, argc: u8) {
        let idx = self.intern(name.as_bytes());
        self.emit(Instruction::CallNative { idx, argc });
    }

    pub fn halt(&mut self) {
        self.emit(Instruction::Halt);
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// `jmp` to a not yet known offset.
    pub fn jump(&mut self) -> Label {
        self.emit(Instruction::Jump { target: 0 });
        self.pending_label()
    }

    /// `jmp_if_false` to a not yet known offset.
    pub fn jump_if_false(&mut self) -> Label {
        self.emit(Instruction::JumpIfFalse { target: 0 });
        self.pending_label()
    }

    /// `jmp` to an already emitted offset.
    pub fn jump_to(&mut self, target: u32) {
        self.emit(Instruction::Jump { target });
    }

    /// Points `label` at the current offset.
    pub fn bind(&mut self, label: Label) {
        let target = self.current_offset().to_le_bytes();
        self.buf[label.target_pos..label.target_pos + 4].copy_from_slice(&target);
    }

    fn pending_label(&self) -> Label {
        Label {
            target_pos: self.buf.len() - 4,
        }
    }
}
