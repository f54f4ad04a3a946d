use crate::op::Op;

/// Reasons a byte buffer is not a loadable program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("program is too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("bad magic header")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("unexpected end of input reading {what} at offset {offset}")]
    UnexpectedEof { what: &'static str, offset: usize },

    #[error("{what} length {len} at offset {offset} runs past the end of the input ({remaining} bytes left)")]
    LengthPastEnd {
        what: &'static str,
        len: u32,
        offset: usize,
        remaining: usize,
    },

    #[error("{count} trailing bytes after the code section")]
    TrailingBytes { count: usize },

    #[error("unknown opcode 0x{byte:02x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },

    #[error("truncated {op:?} instruction at offset {offset}")]
    TruncatedInstruction { op: Op, offset: usize },

    #[error("invalid operand for {op:?} at offset {offset}")]
    InvalidOperand { op: Op, offset: usize },

    #[error("string index {index} out of range (pool has {len}) at offset {offset}")]
    StringIndexOutOfRange { index: u32, len: usize, offset: usize },

    #[error("jump at offset {offset} targets {target}, which is not an instruction boundary")]
    BadJumpTarget { target: u32, offset: usize },
}
