use std::io::Write;

use object::Value;

use crate::{
    Vm,
    error::VmError,
    native::{NativeData, NativeDesc},
};

pub fn default_natives() -> Vec<NativeDesc> {
    vec![
        NativeDesc::new("print", None, native_print),
        NativeDesc::new("len", Some("s->i"), native_len),
        NativeDesc::new("str", Some("a->s"), native_identity),
        NativeDesc::new("int", Some("a->i"), native_identity),
        NativeDesc::new("float", Some("a->f"), native_identity),
        NativeDesc::new("type", Some("a->s"), native_type),
        NativeDesc::new("concat", Some("s,s,*->s"), native_concat),
    ]
}

/// Writes its arguments separated by spaces, then a newline.
fn native_print(vm: &mut Vm, args: &[Value], _out: &mut Value, _: Option<&NativeData>) -> Result<(), VmError> {
    let mut line = String::new();
    for (i, &arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&vm.format(arg));
    }
    line.push('\n');
    vm.output.write_all(line.as_bytes())?;
    Ok(())
}

fn native_len(vm: &mut Vm, args: &[Value], out: &mut Value, _: Option<&NativeData>) -> Result<(), VmError> {
    let len = args[0]
        .as_str()
        .and_then(|s| vm.strings.get(s))
        .map_or(0, |s| s.len());
    *out = Value::Int(i64::from(len));
    Ok(())
}

/// The signature does the conversion.
fn native_identity(_: &mut Vm, args: &[Value], out: &mut Value, _: Option<&NativeData>) -> Result<(), VmError> {
    *out = args[0];
    Ok(())
}

fn native_type(vm: &mut Vm, args: &[Value], out: &mut Value, _: Option<&NativeData>) -> Result<(), VmError> {
    *out = vm.new_string(args[0].type_name().as_bytes())?;
    Ok(())
}

fn native_concat(vm: &mut Vm, args: &[Value], out: &mut Value, _: Option<&NativeData>) -> Result<(), VmError> {
    let mut joined = Vec::new();
    for &arg in args {
        match arg.as_str().and_then(|s| vm.strings.bytes(s)) {
            Some(bytes) => joined.extend_from_slice(bytes),
            None => joined.extend_from_slice(vm.format(arg).as_bytes()),
        }
    }
    *out = vm.new_string(&joined)?;
    Ok(())
}
