use core::fmt;

use crate::{
    string::StringHeap,
    value::{Number, Value},
};

/// The user-facing numeric parser shared by coercions and tooling.
///
/// Accepts surrounding ASCII whitespace, an optional sign, then either a
/// `0x` hex integer or a decimal number with optional fraction and exponent.
/// Decimal integers that do not fit `i64` become floats; hex ones are
/// rejected. `inf` and `nan` are not numbers here.
pub fn parse_number(bytes: &[u8]) -> Option<Number> {
    let text = core::str::from_utf8(bytes).ok()?.trim_ascii();
    let (negative, body) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let magnitude = u64::from_str_radix(hex, 16).ok()?;
        let value = if negative {
            0i64.checked_sub_unsigned(magnitude)?
        } else {
            i64::try_from(magnitude).ok()?
        };
        return Some(Number::Int(value));
    }

    let is_integer = scan_decimal(body.as_bytes())?;
    if is_integer
        && let Ok(i) = text.trim_start_matches('+').parse::<i64>()
    {
        return Some(Number::Int(i));
    }
    text.trim_start_matches('+')
        .parse::<f64>()
        .ok()
        .map(Number::Float)
}

/// Validates `digits [. digits] [(e|E) [sign] digits]` with at least one
/// mantissa digit. Returns whether it was a plain integer.
fn scan_decimal(s: &[u8]) -> Option<bool> {
    let mut i = 0;
    let digits = |i: &mut usize| {
        let start = *i;
        while *i < s.len() && s[*i].is_ascii_digit() {
            *i += 1;
        }
        *i - start
    };

    let mut mantissa = digits(&mut i);
    let mut integer = true;
    if s.get(i) == Some(&b'.') {
        i += 1;
        integer = false;
        mantissa += digits(&mut i);
    }
    if mantissa == 0 {
        return None;
    }
    if matches!(s.get(i), Some(b'e' | b'E')) {
        i += 1;
        integer = false;
        if matches!(s.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        if digits(&mut i) == 0 {
            return None;
        }
    }
    (i == s.len()).then_some(integer)
}

/// Canonical float text: integral values keep a `.0`, everything else
/// uses the shortest round-trip form.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_owned()
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{f:.1}")
    } else {
        format!("{f:?}")
    }
}

/// Displays a value in its canonical textual form.
pub struct ValueDisplay<'a> {
    heap: &'a StringHeap,
    value: Value,
}

impl<'a> ValueDisplay<'a> {
    pub fn new(heap: &'a StringHeap, value: Value) -> Self {
        Self { heap, value }
    }
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(x)),
            Value::Str(s) => match self.heap.bytes(s) {
                Some(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
                None => f.write_str("<freed string>"),
            },
            Value::Native(h) => write!(f, "<native 0x{:x}>", h.raw()),
        }
    }
}

pub fn format_value(heap: &StringHeap, value: Value) -> String {
    ValueDisplay::new(heap, value).to_string()
}
