use core::fmt;

use crate::op::Op;

/// A decoded instruction.
///
/// Pool operands are raw indices into the program's string table; the
/// disassembler resolves them to text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    PushInt { value: i64 },
    PushFloat { value: f64 },
    PushStr { idx: u32 },
    PushNil,
    PushBool { value: bool },
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Print,
    Pop,
    Dup,
    Swap,
    StoreGlobal { idx: u32 },
    LoadGlobal { idx: u32 },
    CallNative { idx: u32, argc: u8 },
    Jump { target: u32 },
    JumpIfFalse { target: u32 },
    Halt,
}

impl Instruction {
    pub const fn op(&self) -> Op {
        match self {
            Self::PushInt { .. } => Op::PushInt,
            Self::PushFloat { .. } => Op::PushFloat,
            Self::PushStr { .. } => Op::PushStr,
            Self::PushNil => Op::PushNil,
            Self::PushBool { .. } => Op::PushBool,
            Self::Add => Op::Add,
            Self::Sub => Op::Sub,
            Self::Mul => Op::Mul,
            Self::Div => Op::Div,
            Self::Eq => Op::Eq,
            Self::Neq => Op::Neq,
            Self::Lt => Op::Lt,
            Self::Gt => Op::Gt,
            Self::Le => Op::Le,
            Self::Ge => Op::Ge,
            Self::Print => Op::Print,
            Self::Pop => Op::Pop,
            Self::Dup => Op::Dup,
            Self::Swap => Op::Swap,
            Self::StoreGlobal { .. } => Op::StoreGlobal,
            Self::LoadGlobal { .. } => Op::LoadGlobal,
            Self::CallNative { .. } => Op::CallNative,
            Self::Jump { .. } => Op::Jump,
            Self::JumpIfFalse { .. } => Op::JumpIfFalse,
            Self::Halt => Op::Halt,
        }
    }

    #[inline(always)]
    pub const fn encoded_len(&self) -> usize {
        self.op().encoded_len()
    }

    /// The constant pool index this instruction refers to, if any.
    pub const fn pool_index(&self) -> Option<u32> {
        match *self {
            Self::PushStr { idx }
            | Self::StoreGlobal { idx }
            | Self::LoadGlobal { idx }
            | Self::CallNative { idx, .. } => Some(idx),
            _ => None,
        }
    }

    pub const fn jump_target(&self) -> Option<u32> {
        match *self {
            Self::Jump { target } | Self::JumpIfFalse { target } => Some(target),
            _ => None,
        }
    }

    /// Appends the binary encoding of this instruction to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.op().byte());
        match *self {
            Self::PushInt { value } => out.extend_from_slice(&value.to_le_bytes()),
            Self::PushFloat { value } => {
                out.extend_from_slice(&value.to_bits().to_le_bytes())
            }
            Self::PushBool { value } => out.push(u8::from(value)),
            Self::PushStr { idx }
            | Self::StoreGlobal { idx }
            | Self::LoadGlobal { idx } => out.extend_from_slice(&idx.to_le_bytes()),
            Self::CallNative { idx, argc } => {
                out.extend_from_slice(&idx.to_le_bytes());
                out.push(argc);
            }
            Self::Jump { target } | Self::JumpIfFalse { target } => {
                out.extend_from_slice(&target.to_le_bytes())
            }
            _ => {}
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.op().mnemonic();
        match self {
            Self::PushInt { value } => write!(f, "{name} {value}"),
            Self::PushFloat { value } => write!(f, "{name} {value:?}"),
            Self::PushBool { value } => write!(f, "{name} {value}"),
            Self::PushStr { idx }
            | Self::StoreGlobal { idx }
            | Self::LoadGlobal { idx } => write!(f, "{name} #{idx}"),
            Self::CallNative { idx, argc } => write!(f, "{name} #{idx} {argc}"),
            Self::Jump { target } | Self::JumpIfFalse { target } => {
                write!(f, "{name} {target}")
            }
            _ => f.write_str(name),
        }
    }
}
