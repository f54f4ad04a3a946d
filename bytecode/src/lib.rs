mod asm;
mod builder;
mod decoder;
mod error;
mod instruction;
mod op;
mod program;

pub use asm::{AsmError, AsmErrorKind, assemble, disassemble, normalize};
pub use builder::{BytecodeBuilder, Label};
pub use decoder::{BytecodeDecoder, decode_at};
pub use error::DecodeError;
pub use instruction::Instruction;
pub use op::Op;
pub use program::{MAGIC, MIN_HEADER_LEN, Program, VERSION, has_magic};
