use core::fmt;

use object::{Number, Value, parse_number};

use crate::{Vm, error::VmError};

/// One position of a native signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Float,
    Str,
    Bool,
    Nil,
    Any,
}

impl ArgType {
    pub const fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'i' => ArgType::Int,
            'f' => ArgType::Float,
            's' => ArgType::Str,
            'b' => ArgType::Bool,
            'n' => ArgType::Nil,
            'a' => ArgType::Any,
            _ => return None,
        })
    }

    pub const fn code(self) -> char {
        match self {
            ArgType::Int => 'i',
            ArgType::Float => 'f',
            ArgType::Str => 's',
            ArgType::Bool => 'b',
            ArgType::Nil => 'n',
            ArgType::Any => 'a',
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ArgType::Int => "int",
            ArgType::Float => "float",
            ArgType::Str => "string",
            ArgType::Bool => "bool",
            ArgType::Nil => "nil",
            ArgType::Any => "any",
        }
    }
}

/// A parsed signature such as `"i,f->s"` or `"s,*->n"`.
///
/// Parameters are comma-separated type codes; a trailing `*` accepts any
/// number of extra, uncoerced arguments. The return type defaults to `a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<ArgType>,
    variadic: bool,
    ret: ArgType,
}

impl Signature {
    pub fn parse(text: &str) -> Result<Self, VmError> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let bad = |why: &str| VmError::bad_argument(format!("invalid signature `{text}`: {why}"));

        let (params_text, ret) = match compact.split_once("->") {
            Some((params, ret)) => {
                let mut codes = ret.chars();
                let ret = match (codes.next(), codes.next()) {
                    (Some(c), None) => {
                        ArgType::from_code(c).ok_or_else(|| bad("unknown return type"))?
                    }
                    _ => return Err(bad("expected one return type after `->`")),
                };
                (params, ret)
            }
            None => (compact.as_str(), ArgType::Any),
        };

        let mut params = Vec::new();
        let mut variadic = false;
        if !params_text.is_empty() {
            for token in params_text.split(',') {
                if variadic {
                    return Err(bad("`*` must be the last parameter"));
                }
                let mut codes = token.chars();
                match (codes.next(), codes.next()) {
                    (Some('*'), None) => variadic = true,
                    (Some(c), None) => {
                        params.push(ArgType::from_code(c).ok_or_else(|| bad("unknown parameter type"))?)
                    }
                    _ => return Err(bad("parameters are single type codes")),
                }
            }
        }

        Ok(Self {
            params,
            variadic,
            ret,
        })
    }

    pub fn params(&self) -> &[ArgType] {
        &self.params
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn ret(&self) -> ArgType {
        self.ret
    }

    pub fn check_arity(&self, native: &str, argc: usize) -> Result<(), VmError> {
        let required = self.params.len();
        let ok = if self.variadic {
            argc >= required
        } else {
            argc == required
        };
        if ok {
            return Ok(());
        }
        let expected = if self.variadic {
            format!("at least {required}")
        } else {
            required.to_string()
        };
        Err(VmError::bad_argument(format!(
            "native `{native}` expects {expected} arguments, got {argc}"
        )))
    }

    /// Checks arity and coerces the fixed arguments. Extra variadic
    /// arguments are passed through as they are.
    pub fn coerce_args(&self, vm: &mut Vm, native: &str, args: &[Value]) -> Result<Vec<Value>, VmError> {
        self.check_arity(native, args.len())?;
        let mut coerced = Vec::with_capacity(args.len());
        for (i, &arg) in args.iter().enumerate() {
            let value = match self.params.get(i) {
                Some(&ty) => coerce(vm, ty, arg)?.ok_or_else(|| {
                    VmError::bad_argument(format!(
                        "native `{native}` argument {}: cannot convert {} to {}",
                        i + 1,
                        arg.type_name(),
                        ty.name()
                    ))
                })?,
                None => arg,
            };
            coerced.push(value);
        }
        Ok(coerced)
    }

    pub fn coerce_return(&self, vm: &mut Vm, native: &str, value: Value) -> Result<Value, VmError> {
        if self.ret == ArgType::Nil {
            return Ok(Value::Nil);
        }
        coerce(vm, self.ret, value)?.ok_or_else(|| {
            VmError::bad_argument(format!(
                "native `{native}` returned {}, declared {}",
                value.type_name(),
                self.ret.name()
            ))
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for ty in &self.params {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{}", ty.code())?;
        }
        if self.variadic {
            f.write_str(if first { "*" } else { ",*" })?;
        }
        write!(f, "->{}", self.ret.code())
    }
}

/// Converts `value` to `ty`. `Ok(None)` means the conversion is not
/// defined for this value; `Err` is reserved for allocation failure.
pub fn coerce(vm: &mut Vm, ty: ArgType, value: Value) -> Result<Option<Value>, VmError> {
    Ok(match ty {
        ArgType::Any => Some(value),
        ArgType::Nil => value.is_nil().then_some(Value::Nil),
        ArgType::Int => to_int(vm, value).map(Value::Int),
        ArgType::Float => to_float(vm, value).map(Value::Float),
        ArgType::Bool => to_bool(vm, value).map(Value::Bool),
        ArgType::Str => match value {
            Value::Str(s) if vm.strings.contains(s) => Some(value),
            Value::Str(_) => None,
            other => {
                let text = vm.format(other);
                Some(vm.new_string(text.as_bytes())?)
            }
        },
    })
}

fn parse_str(vm: &Vm, value: Value) -> Option<Number> {
    let bytes = vm.strings.bytes(value.as_str()?)?;
    parse_number(bytes)
}

fn to_int(vm: &Vm, value: Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(i),
        // Saturating, NaN becomes 0.
        Value::Float(f) => Some(f as i64),
        Value::Bool(b) => Some(i64::from(b)),
        Value::Str(_) => match parse_str(vm, value)? {
            Number::Int(i) => Some(i),
            Number::Float(f) => Some(f as i64),
        },
        Value::Nil | Value::Native(_) => None,
    }
}

fn to_float(vm: &Vm, value: Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(i as f64),
        Value::Float(f) => Some(f),
        Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
        Value::Str(_) => parse_str(vm, value).map(Number::as_f64),
        Value::Nil | Value::Native(_) => None,
    }
}

fn to_bool(vm: &Vm, value: Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(b),
        Value::Int(i) => Some(i != 0),
        Value::Float(f) => Some(f != 0.0),
        Value::Nil => Some(false),
        Value::Str(s) => match vm.strings.bytes(s)? {
            b"true" => Some(true),
            b"false" => Some(false),
            _ => None,
        },
        Value::Native(_) => None,
    }
}
