use core::fmt;

use crate::string::StrRef;

/// An opaque host token carried by [`Value::Native`].
///
/// The VM never dereferences it; hosts typically stash a pointer or an index
/// into their own tables.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NativeHandle(u64);

impl NativeHandle {
    #[inline(always)]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    /// The stored bits as a pointer. Dereferencing it is up to the host
    /// that created the handle.
    #[inline(always)]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle(0x{:x})", self.0)
    }
}

/// The unit of computation and storage.
///
/// `Str` is a non-owning handle into a [`StringHeap`](crate::StringHeap).
/// The derived `PartialEq` compares string handles by identity; content
/// comparison needs the heap.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StrRef),
    Native(NativeHandle),
}

/// A numeric view of a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[inline(always)]
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

impl Value {
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Native(_) => "native",
        }
    }

    /// `nil`, `false`, `0` and `0.0` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match *self {
            Value::Nil => false,
            Value::Bool(b) => b,
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
            Value::Str(_) | Value::Native(_) => true,
        }
    }

    #[inline(always)]
    pub fn as_number(&self) -> Option<Number> {
        match *self {
            Value::Int(i) => Some(Number::Int(i)),
            Value::Float(f) => Some(Number::Float(f)),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_str(&self) -> Option<StrRef> {
        match *self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<StrRef> for Value {
    fn from(s: StrRef) -> Self {
        Value::Str(s)
    }
}

impl From<NativeHandle> for Value {
    fn from(h: NativeHandle) -> Self {
        Value::Native(h)
    }
}
