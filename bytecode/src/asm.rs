//! Text assembler and disassembler.
//!
//! One instruction per line: a mnemonic followed by whitespace separated
//! operands. `;` starts a comment. String operands are double quoted (or a
//! raw pool index written `#N`), jump operands are absolute byte offsets or
//! label names, and `name:` defines a label. `.str "..."` appends an
//! explicit pool entry.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::builder::{BytecodeBuilder, Label};
use crate::error::DecodeError;
use crate::instruction::Instruction;
use crate::op::Op;
use crate::program::Program;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind}")]
pub struct AsmError {
    pub line: usize,
    pub kind: AsmErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsmErrorKind {
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("`{0}` is missing an operand")]
    MissingOperand(&'static str),
    #[error("unexpected operand `{0}`")]
    UnexpectedOperand(String),
    #[error("invalid integer `{0}`")]
    InvalidInt(String),
    #[error("invalid float `{0}`")]
    InvalidFloat(String),
    #[error("invalid boolean `{0}`")]
    InvalidBool(String),
    #[error("expected a string operand")]
    ExpectedString,
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid escape sequence")]
    InvalidEscape,
    #[error("label `{0}` defined twice")]
    DuplicateLabel(String),
    #[error("undefined label `{0}`")]
    UndefinedLabel(String),
    #[error("{0}")]
    Verify(#[from] DecodeError),
}

// ── lexing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(Vec<u8>),
    Index(u32),
}

fn tokenize(line: &str) -> Result<Vec<Token>, AsmErrorKind> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
        } else if b == b';' {
            break;
        } else if b == b'"' {
            let (s, next) = lex_string(bytes, i + 1)?;
            tokens.push(Token::Str(s));
            i = next;
        } else {
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b';' {
                i += 1;
            }
            let word = &line[start..i];
            match word.strip_prefix('#') {
                Some(idx) => {
                    let idx = idx
                        .parse()
                        .map_err(|_| AsmErrorKind::InvalidInt(word.to_string()))?;
                    tokens.push(Token::Index(idx));
                }
                None => tokens.push(Token::Word(word.to_string())),
            }
        }
    }
    Ok(tokens)
}

/// Reads a string body starting after the opening quote. Returns the
/// decoded bytes and the index after the closing quote.
fn lex_string(bytes: &[u8], mut i: usize) -> Result<(Vec<u8>, usize), AsmErrorKind> {
    let mut out = Vec::new();
    loop {
        let b = *bytes.get(i).ok_or(AsmErrorKind::UnterminatedString)?;
        i += 1;
        match b {
            b'"' => return Ok((out, i)),
            b'\\' => {
                let esc = *bytes.get(i).ok_or(AsmErrorKind::UnterminatedString)?;
                i += 1;
                match esc {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'0' => out.push(0),
                    b'\\' => out.push(b'\\'),
                    b'"' => out.push(b'"'),
                    b'x' => {
                        let hex = bytes.get(i..i + 2).ok_or(AsmErrorKind::InvalidEscape)?;
                        let hex = std::str::from_utf8(hex).map_err(|_| AsmErrorKind::InvalidEscape)?;
                        let v = u8::from_str_radix(hex, 16).map_err(|_| AsmErrorKind::InvalidEscape)?;
                        out.push(v);
                        i += 2;
                    }
                    _ => return Err(AsmErrorKind::InvalidEscape),
                }
            }
            _ => out.push(b),
        }
    }
}

fn escape_into(out: &mut String, bytes: &[u8]) {
    out.push('"');
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0 => out.push_str("\\0"),
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('"');
}

fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match token {
            Token::Word(w) => out.push_str(w),
            Token::Str(s) => escape_into(&mut out, s),
            Token::Index(idx) => {
                let _ = write!(out, "#{idx}");
            }
        }
    }
    out
}

/// Canonical form of assembler text: comments stripped, whitespace
/// collapsed, string escapes rewritten, numeric literals rewritten the way
/// [`disassemble`] prints them, blank lines dropped.
///
/// Labels and `.str` directives are kept as written, so only sources without
/// them satisfy `disassemble(assemble(s)) == normalize(s)`. Lines that fail to
/// lex are kept trimmed as they are.
pub fn normalize(source: &str) -> String {
    let mut out = String::new();
    for line in source.lines() {
        let rendered = match tokenize(line) {
            Ok(mut tokens) => {
                canonical_number(&mut tokens);
                render_tokens(&tokens)
            }
            Err(_) => line.trim().to_string(),
        };
        if !rendered.is_empty() {
            out.push_str(&rendered);
            out.push('\n');
        }
    }
    out
}

fn canonical_number(tokens: &mut [Token]) {
    let [Token::Word(head), Token::Word(operand)] = tokens else {
        return;
    };
    let canonical = match head.as_str() {
        "push_int" => operand.parse::<i64>().ok().map(|v| v.to_string()),
        "push_float" => parse_float(operand).map(|v| {
            let mut text = String::new();
            float_into(&mut text, v);
            text
        }),
        _ => None,
    };
    if let Some(canonical) = canonical {
        *operand = canonical;
    }
}

// ── assembling ─────────────────────────────────────────────────────

struct Assembler {
    builder: BytecodeBuilder,
    labels: HashMap<String, u32>,
    /// Forward references: label name to (first use line, unresolved jumps).
    pending: HashMap<String, (usize, Vec<Label>)>,
    line_no: usize,
}

/// Assembles source text into a verified [`Program`].
pub fn assemble(source: &str) -> Result<Program, AsmError> {
    let mut asm = Assembler {
        builder: BytecodeBuilder::new(),
        labels: HashMap::new(),
        pending: HashMap::new(),
        line_no: 0,
    };

    for (n, line) in source.lines().enumerate() {
        let line_no = n + 1;
        asm.line_no = line_no;
        asm.line(line)
            .map_err(|kind| AsmError { line: line_no, kind })?;
    }

    if let Some((name, (line, _))) = asm.pending.iter().min_by_key(|(_, (line, _))| *line) {
        return Err(AsmError {
            line: *line,
            kind: AsmErrorKind::UndefinedLabel(name.clone()),
        });
    }

    let program = asm.builder.build();
    program.verify().map_err(|err| AsmError {
        line: 0,
        kind: err.into(),
    })?;
    Ok(program)
}

impl Assembler {
    fn line(&mut self, line: &str) -> Result<(), AsmErrorKind> {
        let mut tokens = tokenize(line)?.into_iter().peekable();

        while let Some(Token::Word(w)) = tokens.peek() {
            let Some(name) = w.strip_suffix(':') else {
                break;
            };
            let name = name.to_string();
            tokens.next();
            self.define_label(name)?;
        }

        let Some(head) = tokens.next() else {
            return Ok(());
        };
        let mnemonic = match head {
            Token::Word(w) => w,
            Token::Str(_) | Token::Index(_) => {
                return Err(AsmErrorKind::UnknownMnemonic(render_tokens(&[head])));
            }
        };
        let operands: Vec<Token> = tokens.collect();

        if mnemonic == ".str" {
            let [Token::Str(s)] = operands.as_slice() else {
                return Err(AsmErrorKind::ExpectedString);
            };
            self.builder.push_string(s);
            return Ok(());
        }

        let op = Op::from_mnemonic(&mnemonic)
            .ok_or_else(|| AsmErrorKind::UnknownMnemonic(mnemonic.clone()))?;
        let mut operands = operands.into_iter();
        let name = op.mnemonic();

        match op {
            Op::PushInt => {
                let word = expect_word(operands.next(), name)?;
                let value = word.parse().map_err(|_| AsmErrorKind::InvalidInt(word))?;
                self.builder.emit(Instruction::PushInt { value });
            }
            Op::PushFloat => {
                let word = expect_word(operands.next(), name)?;
                let value = parse_float(&word).ok_or(AsmErrorKind::InvalidFloat(word))?;
                self.builder.emit(Instruction::PushFloat { value });
            }
            Op::PushBool => {
                let word = expect_word(operands.next(), name)?;
                let value = match word.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(AsmErrorKind::InvalidBool(word)),
                };
                self.builder.emit(Instruction::PushBool { value });
            }
            Op::PushStr => {
                let idx = self.pool_operand(operands.next(), name)?;
                self.builder.emit(Instruction::PushStr { idx });
            }
            Op::StoreGlobal => {
                let idx = self.pool_operand(operands.next(), name)?;
                self.builder.emit(Instruction::StoreGlobal { idx });
            }
            Op::LoadGlobal => {
                let idx = self.pool_operand(operands.next(), name)?;
                self.builder.emit(Instruction::LoadGlobal { idx });
            }
            Op::CallNative => {
                let idx = self.pool_operand(operands.next(), name)?;
                let word = expect_word(operands.next(), name)?;
                let argc = word.parse().map_err(|_| AsmErrorKind::InvalidInt(word))?;
                self.builder.emit(Instruction::CallNative { idx, argc });
            }
            Op::Jump | Op::JumpIfFalse => {
                let word = expect_word(operands.next(), name)?;
                self.jump(op, word)?;
            }
            _ => {
                let instr = simple_instruction(op);
                self.builder.emit(instr);
            }
        }

        match operands.next() {
            Some(extra) => Err(AsmErrorKind::UnexpectedOperand(render_tokens(&[extra]))),
            None => Ok(()),
        }
    }

    fn define_label(&mut self, name: String) -> Result<(), AsmErrorKind> {
        let here = self.builder.current_offset();
        if self.labels.insert(name.clone(), here).is_some() {
            return Err(AsmErrorKind::DuplicateLabel(name));
        }
        if let Some((_, waiting)) = self.pending.remove(&name) {
            for label in waiting {
                self.builder.bind(label);
            }
        }
        Ok(())
    }

    fn jump(&mut self, op: Op, word: String) -> Result<(), AsmErrorKind> {
        let target = match word.parse::<u32>() {
            Ok(target) => Some(target),
            Err(_) if word.starts_with(|c: char| c.is_ascii_digit()) => {
                return Err(AsmErrorKind::InvalidInt(word));
            }
            Err(_) => self.labels.get(&word).copied(),
        };

        match (op, target) {
            (Op::Jump, Some(target)) => self.builder.emit(Instruction::Jump { target }),
            (_, Some(target)) => self.builder.emit(Instruction::JumpIfFalse { target }),
            (Op::Jump, None) => {
                let label = self.builder.jump();
                self.wait_for(word, label);
            }
            (_, None) => {
                let label = self.builder.jump_if_false();
                self.wait_for(word, label);
            }
        }
        Ok(())
    }

    fn wait_for(&mut self, name: String, label: Label) {
        let line = self.line_no;
        self.pending
            .entry(name)
            .or_insert_with(|| (line, Vec::new()))
            .1
            .push(label);
    }

    fn pool_operand(&mut self, token: Option<Token>, name: &'static str) -> Result<u32, AsmErrorKind> {
        match token {
            Some(Token::Str(s)) => Ok(self.builder.intern(&s)),
            Some(Token::Index(idx)) => Ok(idx),
            Some(Token::Word(_)) => Err(AsmErrorKind::ExpectedString),
            None => Err(AsmErrorKind::MissingOperand(name)),
        }
    }
}

fn expect_word(token: Option<Token>, name: &'static str) -> Result<String, AsmErrorKind> {
    match token {
        Some(Token::Word(w)) => Ok(w),
        Some(other) => Err(AsmErrorKind::UnexpectedOperand(render_tokens(&[other]))),
        None => Err(AsmErrorKind::MissingOperand(name)),
    }
}

/// Decimal float syntax, or `0x` followed by the raw IEEE-754 bits.
fn parse_float(word: &str) -> Option<f64> {
    match word.strip_prefix("0x") {
        Some(bits) => u64::from_str_radix(bits, 16).ok().map(f64::from_bits),
        None => word.parse().ok(),
    }
}

/// Floats print in their shortest round-trip form. NaNs other than the
/// canonical one print as raw bits so sign and payload survive.
fn float_into(out: &mut String, value: f64) {
    if value.is_nan() && value.to_bits() != f64::NAN.to_bits() {
        let _ = write!(out, "0x{:016x}", value.to_bits());
    } else {
        let _ = write!(out, "{value:?}");
    }
}

fn simple_instruction(op: Op) -> Instruction {
    match op {
        Op::PushNil => Instruction::PushNil,
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
        _ => Instruction::Halt,
    }
}

// ── disassembling ──────────────────────────────────────────────────

/// Renders a program as canonical assembler text.
///
/// When the pool is exactly what assembling the text would rebuild (first
/// appearance order, no extras), string operands are printed inline.
/// Otherwise the pool is spelled out with `.str` directives first. Either
/// way, assembling the output reproduces `program` byte for byte.
pub fn disassemble(program: &Program) -> String {
    let instructions: Vec<Instruction> = program
        .instructions()
        .map_while(|r| r.ok().map(|(_, instr)| instr))
        .collect();

    let mut implied: Vec<&[u8]> = Vec::new();
    for idx in instructions.iter().filter_map(Instruction::pool_index) {
        if let Some(s) = program.string(idx) {
            if !implied.contains(&s) {
                implied.push(s);
            }
        }
    }
    let explicit_pool = implied.len() != program.strings.len()
        || implied.iter().zip(&program.strings).any(|(a, b)| *a != &b[..]);

    let mut out = String::new();
    if explicit_pool {
        for s in &program.strings {
            out.push_str(".str ");
            escape_into(&mut out, s);
            out.push('\n');
        }
    }

    for instr in &instructions {
        out.push_str(instr.op().mnemonic());
        match *instr {
            Instruction::PushInt { value } => {
                let _ = write!(out, " {value}");
            }
            Instruction::PushFloat { value } => {
                out.push(' ');
                float_into(&mut out, value);
            }
            Instruction::PushBool { value } => {
                let _ = write!(out, " {value}");
            }
            Instruction::PushStr { idx }
            | Instruction::StoreGlobal { idx }
            | Instruction::LoadGlobal { idx } => {
                out.push(' ');
                pool_operand_into(&mut out, program, idx);
            }
            Instruction::CallNative { idx, argc } => {
                out.push(' ');
                pool_operand_into(&mut out, program, idx);
                let _ = write!(out, " {argc}");
            }
            Instruction::Jump { target } | Instruction::JumpIfFalse { target } => {
                let _ = write!(out, " {target}");
            }
            _ => {}
        }
        out.push('\n');
    }
    out
}

fn pool_operand_into(out: &mut String, program: &Program, idx: u32) {
    let Some(s) = program.string(idx) else {
        let _ = write!(out, "#{idx}");
        return;
    };
    let first = program.strings.iter().position(|p| &p[..] == s);
    if first == Some(idx as usize) {
        escape_into(out, s);
    } else {
        let _ = write!(out, "#{idx}");
    }
}
