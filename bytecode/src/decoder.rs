use crate::error::DecodeError;
use crate::instruction::Instruction;
use crate::op::Op;

/// Decodes a code section into [`Instruction`]s.
///
/// Every read is bounds-checked: truncated operands and unknown opcode
/// bytes come back as [`DecodeError`]s carrying the offending offset. After
/// the first error the iterator is exhausted.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction together with its start offset, or
    /// `None` at end-of-stream.
    pub fn decode_next(&mut self) -> Option<Result<(usize, Instruction), DecodeError>> {
        if self.is_at_end() {
            return None;
        }
        let start = self.pos;
        match decode_at(self.bytes, start) {
            Ok(instr) => {
                self.pos = start + instr.encoded_len();
                Some(Ok((start, instr)))
            }
            Err(err) => {
                self.pos = self.bytes.len();
                Some(Err(err))
            }
        }
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    #[inline(always)]
    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

/// Decodes the single instruction starting at `pos`.
///
/// `pos` must be inside `bytes`; callers at the end of the stream get an
/// `UnexpectedEof`.
pub fn decode_at(bytes: &[u8], pos: usize) -> Result<Instruction, DecodeError> {
    let byte = *bytes.get(pos).ok_or(DecodeError::UnexpectedEof {
        what: "opcode",
        offset: pos,
    })?;
    let op = Op::from_byte(byte).ok_or(DecodeError::UnknownOpcode { byte, offset: pos })?;

    let operands = bytes
        .get(pos + 1..pos + op.encoded_len())
        .ok_or(DecodeError::TruncatedInstruction { op, offset: pos })?;

    let instr = match op {
        Op::PushInt => Instruction::PushInt {
            value: i64::from_le_bytes(read_array(operands)),
        },
        Op::PushFloat => Instruction::PushFloat {
            value: f64::from_bits(u64::from_le_bytes(read_array(operands))),
        },
        Op::PushStr => Instruction::PushStr { idx: read_u32(operands) },
        Op::PushNil => Instruction::PushNil,
        Op::PushBool => match operands[0] {
            0 => Instruction::PushBool { value: false },
            1 => Instruction::PushBool { value: true },
            _ => return Err(DecodeError::InvalidOperand { op, offset: pos }),
        },
        Op::Add => Instruction::Add,
        Op::Sub => Instruction::Sub,
        Op::Mul => Instruction::Mul,
        Op::Div => Instruction::Div,
        Op::Eq => Instruction::Eq,
        Op::Neq => Instruction::Neq,
        Op::Lt => Instruction::Lt,
        Op::Gt => Instruction::Gt,
        Op::Le => Instruction::Le,
        Op::Ge => Instruction::Ge,
        Op::Print => Instruction::Print,
        Op::Pop => Instruction::Pop,
        Op::Dup => Instruction::Dup,
        Op::Swap => Instruction::Swap,
        Op::StoreGlobal => Instruction::StoreGlobal { idx: read_u32(operands) },
        Op::LoadGlobal => Instruction::LoadGlobal { idx: read_u32(operands) },
        Op::CallNative => Instruction::CallNative {
            idx: read_u32(operands),
            argc: operands[4],
        },
        Op::Jump => Instruction::Jump { target: read_u32(operands) },
        Op::JumpIfFalse => Instruction::JumpIfFalse { target: read_u32(operands) },
        Op::Halt => Instruction::Halt,
    };
    Ok(instr)
}

// `operands` always has exactly `op.operand_len()` bytes here.
#[inline(always)]
fn read_array<const N: usize>(operands: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&operands[..N]);
    out
}

#[inline(always)]
fn read_u32(operands: &[u8]) -> u32 {
    u32::from_le_bytes(read_array(operands))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_operand_is_an_error() {
        let bytes = [Op::PushInt.byte(), 1, 2, 3];
        assert_eq!(
            decode_at(&bytes, 0),
            Err(DecodeError::TruncatedInstruction { op: Op::PushInt, offset: 0 })
        );
    }

    #[test]
    fn unknown_opcode_stops_iteration() {
        let bytes = [Op::PushNil.byte(), 0xEE, Op::Halt.byte()];
        let mut decoder = BytecodeDecoder::new(&bytes);
        assert_eq!(decoder.next(), Some(Ok((0, Instruction::PushNil))));
        assert_eq!(
            decoder.next(),
            Some(Err(DecodeError::UnknownOpcode { byte: 0xEE, offset: 1 }))
        );
        assert_eq!(decoder.next(), None);
    }

    #[test]
    fn push_bool_rejects_non_binary_operand() {
        let bytes = [Op::PushBool.byte(), 2];
        assert!(matches!(
            decode_at(&bytes, 0),
            Err(DecodeError::InvalidOperand { op: Op::PushBool, .. })
        ));
    }

    #[test]
    fn reports_offsets() {
        let mut code = Vec::new();
        Instruction::PushInt { value: 7 }.encode(&mut code);
        Instruction::CallNative { idx: 2, argc: 1 }.encode(&mut code);
        Instruction::Halt.encode(&mut code);
        let offsets: Vec<usize> = BytecodeDecoder::new(&code)
            .map(|r| r.map(|(off, _)| off))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(offsets, vec![0, 9, 15]);
    }
}
