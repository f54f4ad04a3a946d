//! The binary program container.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! MAGIC(4) VERSION(1) NSTR(u32) { LEN(u32) BYTES } x NSTR CODE_LEN(u32) CODE
//! ```

use std::collections::HashSet;

use crate::decoder::BytecodeDecoder;
use crate::error::DecodeError;

pub const MAGIC: [u8; 4] = *b"PILA";
pub const VERSION: u8 = 1;

/// Smallest buffer that can hold a magic and a version byte.
pub const MIN_HEADER_LEN: usize = MAGIC.len() + 1;

/// A parsed and validated program: the string constant pool plus the
/// instruction stream.
///
/// Pool strings are raw bytes; a VM copies them into its own string heap on
/// load.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    pub strings: Vec<Box<[u8]>>,
    pub code: Vec<u8>,
}

impl Program {
    pub fn new(strings: Vec<Box<[u8]>>, code: Vec<u8>) -> Self {
        Self { strings, code }
    }

    /// Parses and validates a program image.
    ///
    /// Nothing is returned unless the whole image is well formed, so a
    /// failed load never exposes a partially built program.
    pub fn load(bytes: &[u8]) -> Result<Program, DecodeError> {
        if bytes.len() < MIN_HEADER_LEN {
            return Err(DecodeError::TooShort {
                len: bytes.len(),
                min: MIN_HEADER_LEN,
            });
        }

        let mut r = Reader::new(bytes);
        if r.take(MAGIC.len(), "magic")? != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = r.read_u8("version")?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let count = r.read_u32("string count")?;
        // Every record needs at least its 4-byte length prefix.
        let mut strings = Vec::with_capacity((count as usize).min(r.remaining() / 4));
        for _ in 0..count {
            let len = r.read_u32("string length")?;
            strings.push(Box::from(r.take_len(len, "string")?));
        }

        let code_len = r.read_u32("code length")?;
        let code = r.take_len(code_len, "code")?.to_vec();

        if r.remaining() != 0 {
            return Err(DecodeError::TrailingBytes {
                count: r.remaining(),
            });
        }

        let program = Program { strings, code };
        program.verify()?;
        log::debug!(
            "loaded program: {} strings, {} code bytes",
            program.strings.len(),
            program.code.len()
        );
        Ok(program)
    }

    /// Checks every instruction in one linear pass.
    ///
    /// Rejects unknown opcodes, truncated instructions, pool indices past
    /// the end of the pool, and jumps that do not land on an instruction.
    pub fn verify(&self) -> Result<(), DecodeError> {
        let mut starts = HashSet::new();
        let mut jumps = Vec::new();

        for decoded in BytecodeDecoder::new(&self.code) {
            let (offset, instr) = decoded?;
            starts.insert(offset);
            if let Some(index) = instr.pool_index() {
                if index as usize >= self.strings.len() {
                    return Err(DecodeError::StringIndexOutOfRange {
                        index,
                        len: self.strings.len(),
                        offset,
                    });
                }
            }
            if let Some(target) = instr.jump_target() {
                jumps.push((offset, target));
            }
        }

        for (offset, target) in jumps {
            if !starts.contains(&(target as usize)) {
                return Err(DecodeError::BadJumpTarget { target, offset });
            }
        }
        Ok(())
    }

    /// Serializes the program into the bit-exact container layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let pool_len: usize = self.strings.iter().map(|s| 4 + s.len()).sum();
        let mut out = Vec::with_capacity(MIN_HEADER_LEN + 8 + pool_len + self.code.len());
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&(self.strings.len() as u32).to_le_bytes());
        for s in &self.strings {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s);
        }
        out.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.code);
        out
    }

    pub fn string(&self, idx: u32) -> Option<&[u8]> {
        self.strings.get(idx as usize).map(|s| &s[..])
    }

    pub fn instructions(&self) -> BytecodeDecoder<'_> {
        BytecodeDecoder::new(&self.code)
    }
}

/// Whether `bytes` starts with the program magic.
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

/// A bounds-checked cursor over the input image.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        let slice = self
            .offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(self.offset..end))
            .ok_or(DecodeError::UnexpectedEof {
                what,
                offset: self.offset,
            })?;
        self.offset += len;
        Ok(slice)
    }

    /// Like [`Reader::take`], for lengths that came out of the input itself.
    fn take_len(&mut self, len: u32, what: &'static str) -> Result<&'a [u8], DecodeError> {
        if len as usize > self.remaining() {
            return Err(DecodeError::LengthPastEnd {
                what,
                len,
                offset: self.offset,
                remaining: self.remaining(),
            });
        }
        self.take(len as usize, what)
    }

    fn read_u8(&mut self, what: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, what)?[0])
    }

    fn read_u32(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
