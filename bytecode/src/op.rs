/// Bytecode opcodes.
///
/// Every instruction is a single opcode byte followed by fixed-size,
/// little-endian operands. The operand layout depends only on the opcode,
/// so the encoded length of an instruction is known from its first byte.
///
/// Pool indices are always `u32`, immediates are 8 bytes, jump targets are
/// absolute `u32` byte offsets into the code section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Push a 64-bit integer immediate.
    /// Operands: `value:i64`
    PushInt = 0x01,

    /// Push a 64-bit float immediate (raw IEEE-754 bits).
    /// Operands: `bits:u64`
    PushFloat = 0x02,

    /// Push a string from the constant pool.
    /// Operands: `idx:u32`
    PushStr = 0x03,

    /// Push `nil`.
    PushNil = 0x04,

    /// Push a boolean.
    /// Operands: `value:u8` (0 or 1)
    PushBool = 0x05,

    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    /// Always divides in floating point.
    Div = 0x13,

    Eq = 0x20,
    Neq = 0x21,
    Lt = 0x22,
    Gt = 0x23,
    Le = 0x24,
    Ge = 0x25,

    /// Write the top of stack to the VM output. Does not pop.
    Print = 0x30,
    Pop = 0x31,
    Dup = 0x32,
    Swap = 0x33,

    /// Pop the top of stack into a global named by a pool string.
    /// Operands: `idx:u32`
    StoreGlobal = 0x40,

    /// Push the global named by a pool string.
    /// Operands: `idx:u32`
    LoadGlobal = 0x41,

    /// Call a registered native function.
    /// Operands: `name_idx:u32`, `argc:u8`
    CallNative = 0x50,

    /// Unconditional jump.
    /// Operands: `target:u32` (absolute code offset)
    Jump = 0x60,

    /// Pop a condition and jump if it is falsy.
    /// Operands: `target:u32` (absolute code offset)
    JumpIfFalse = 0x61,

    /// Stop execution successfully.
    Halt = 0xFF,
}

impl Op {
    pub const ALL: [Op; 25] = [
        Op::PushInt,
        Op::PushFloat,
        Op::PushStr,
        Op::PushNil,
        Op::PushBool,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Eq,
        Op::Neq,
        Op::Lt,
        Op::Gt,
        Op::Le,
        Op::Ge,
        Op::Print,
        Op::Pop,
        Op::Dup,
        Op::Swap,
        Op::StoreGlobal,
        Op::LoadGlobal,
        Op::CallNative,
        Op::Jump,
        Op::JumpIfFalse,
        Op::Halt,
    ];

    #[inline(always)]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Parses an opcode from its byte value.
    pub const fn from_byte(byte: u8) -> Option<Op> {
        let op = match byte {
            0x01 => Op::PushInt,
            0x02 => Op::PushFloat,
            0x03 => Op::PushStr,
            0x04 => Op::PushNil,
            0x05 => Op::PushBool,
            0x10 => Op::Add,
            0x11 => Op::Sub,
            0x12 => Op::Mul,
            0x13 => Op::Div,
            0x20 => Op::Eq,
            0x21 => Op::Neq,
            0x22 => Op::Lt,
            0x23 => Op::Gt,
            0x24 => Op::Le,
            0x25 => Op::Ge,
            0x30 => Op::Print,
            0x31 => Op::Pop,
            0x32 => Op::Dup,
            0x33 => Op::Swap,
            0x40 => Op::StoreGlobal,
            0x41 => Op::LoadGlobal,
            0x50 => Op::CallNative,
            0x60 => Op::Jump,
            0x61 => Op::JumpIfFalse,
            0xFF => Op::Halt,
            _ => return None,
        };
        Some(op)
    }

    /// Number of operand bytes following the opcode byte.
    pub const fn operand_len(self) -> usize {
        match self {
            Op::PushInt | Op::PushFloat => 8,
            Op::PushStr
            | Op::StoreGlobal
            | Op::LoadGlobal
            | Op::Jump
            | Op::JumpIfFalse => 4,
            Op::CallNative => 5,
            Op::PushBool => 1,
            Op::PushNil
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Eq
            | Op::Neq
            | Op::Lt
            | Op::Gt
            | Op::Le
            | Op::Ge
            | Op::Print
            | Op::Pop
            | Op::Dup
            | Op::Swap
            | Op::Halt => 0,
        }
    }

    /// Total encoded size, opcode byte included.
    #[inline(always)]
    pub const fn encoded_len(self) -> usize {
        1 + self.operand_len()
    }

    /// Whether the first operand is a constant pool index.
    pub const fn has_pool_operand(self) -> bool {
        matches!(
            self,
            Op::PushStr | Op::StoreGlobal | Op::LoadGlobal | Op::CallNative
        )
    }

    pub const fn is_jump(self) -> bool {
        matches!(self, Op::Jump | Op::JumpIfFalse)
    }

    /// Assembler mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::PushInt => "push_int",
            Op::PushFloat => "push_float",
            Op::PushStr => "push_str",
            Op::PushNil => "push_nil",
            Op::PushBool => "push_bool",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Eq => "eq",
            Op::Neq => "neq",
            Op::Lt => "lt",
            Op::Gt => "gt",
            Op::Le => "le",
            Op::Ge => "ge",
            Op::Print => "print",
            Op::Pop => "pop",
            Op::Dup => "dup",
            Op::Swap => "swap",
            Op::StoreGlobal => "store_global",
            Op::LoadGlobal => "load_global",
            Op::CallNative => "call_native",
            Op::Jump => "jmp",
            Op::JumpIfFalse => "jmp_if_false",
            Op::Halt => "halt",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Op> {
        Op::ALL.iter().copied().find(|op| op.mnemonic() == name)
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        Op::from_byte(byte).ok_or(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::Op;

    #[test]
    fn opcode_values_are_stable() {
        assert_eq!(Op::PushInt as u8, 0x01);
        assert_eq!(Op::PushStr as u8, 0x03);
        assert_eq!(Op::Div as u8, 0x13);
        assert_eq!(Op::Print as u8, 0x30);
        assert_eq!(Op::CallNative as u8, 0x50);
        assert_eq!(Op::Halt as u8, 0xFF);
    }

    #[test]
    fn byte_round_trip_for_every_op() {
        for op in Op::ALL {
            assert_eq!(Op::from_byte(op.byte()), Some(op));
            assert_eq!(Op::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(Op::from_byte(0x00), None);
        assert_eq!(Op::try_from(0x7Fu8), Err(0x7F));
    }

    #[test]
    fn encoded_lengths() {
        assert_eq!(Op::PushInt.encoded_len(), 9);
        assert_eq!(Op::PushStr.encoded_len(), 5);
        assert_eq!(Op::PushBool.encoded_len(), 2);
        assert_eq!(Op::CallNative.encoded_len(), 6);
        assert_eq!(Op::Add.encoded_len(), 1);
    }
}
