use core::fmt;
use std::io;

use bytecode::DecodeError;
use object::ObjectError;

/// The closed set of outcomes every fallible engine call maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    OutOfMemory,
    BadBytecode,
    RuntimeError,
    NotFound,
    BadArgument,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::OutOfMemory => "out of memory",
            Status::BadBytecode => "bad bytecode",
            Status::RuntimeError => "runtime error",
            Status::NotFound => "not found",
            Status::BadArgument => "bad argument",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Faults raised while executing instructions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack underflow in {op}: needs {needed} values, stack has {depth}")]
    StackUnderflow {
        op: &'static str,
        needed: usize,
        depth: usize,
    },

    #[error("stack overflow: capacity of {capacity} values exceeded")]
    StackOverflow { capacity: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("type mismatch in {op}: cannot apply to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("unknown opcode 0x{byte:02x} at {ip}")]
    UnknownOpcode { byte: u8, ip: usize },

    #[error("vm is faulted; load a program or reset before running again")]
    Faulted,
}

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("out of memory while allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("bad bytecode: {0}")]
    BadBytecode(#[from] DecodeError),

    #[error("instruction pointer {ip} ran past the end of the code")]
    CodeOverrun { ip: usize },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("{kind} `{name}` not found")]
    NotFound { kind: &'static str, name: String },

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("output error: {0}")]
    Io(#[from] io::Error),
}

impl VmError {
    pub fn status(&self) -> Status {
        match self {
            VmError::OutOfMemory { .. } => Status::OutOfMemory,
            VmError::BadBytecode(_) | VmError::CodeOverrun { .. } => Status::BadBytecode,
            VmError::Runtime(_) | VmError::Io(_) => Status::RuntimeError,
            VmError::NotFound { .. } => Status::NotFound,
            VmError::BadArgument(_) => Status::BadArgument,
        }
    }

    pub(crate) fn bad_argument(message: impl Into<String>) -> Self {
        VmError::BadArgument(message.into())
    }
}

impl From<ObjectError> for VmError {
    fn from(err: ObjectError) -> Self {
        match err {
            ObjectError::OutOfMemory { what } => VmError::OutOfMemory { what },
            other => VmError::BadArgument(other.to_string()),
        }
    }
}

/// The most recent failure reported by a public call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub status: Status,
    pub message: String,
}

impl From<&VmError> for LastError {
    fn from(err: &VmError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(VmError::CodeOverrun { ip: 3 }.status(), Status::BadBytecode);
        assert_eq!(VmError::from(DecodeError::BadMagic).status(), Status::BadBytecode);
        assert_eq!(
            VmError::from(RuntimeError::DivisionByZero).status(),
            Status::RuntimeError
        );
        assert_eq!(
            VmError::from(ObjectError::OutOfMemory { what: "map slots" }).status(),
            Status::OutOfMemory
        );
        assert_eq!(
            VmError::from(ObjectError::StaleString).status(),
            Status::BadArgument
        );
    }

    #[test]
    fn last_error_text() {
        let err = VmError::NotFound {
            kind: "native",
            name: "nope".into(),
        };
        let last = LastError::from(&err);
        assert_eq!(last.status, Status::NotFound);
        assert_eq!(last.to_string(), "not found: native `nope` not found");
    }
}
