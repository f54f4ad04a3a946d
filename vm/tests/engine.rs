use std::{io, sync::Arc};

use bytecode::{BytecodeBuilder, Instruction, MAGIC, Program, VERSION, assemble, disassemble, normalize};
use heap::{GcConfig, GcMode};
use object::{Map, StringHeap, Value};
use parking_lot::Mutex;
use vm::{NativeData, RunExit, Status, Vm, VmCreateInfo, VmError, VmState};

#[derive(Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn new_vm(gc: GcConfig) -> (Vm, Output) {
    let out = Output::default();
    let vm = Vm::new(VmCreateInfo {
        gc,
        output: Some(Box::new(out.clone())),
        ..VmCreateInfo::default()
    })
    .unwrap();
    (vm, out)
}

fn own_gc() -> GcConfig {
    GcConfig {
        mode: GcMode::Own,
        threshold: None,
    }
}

const ANSWER: &str = r#"
    push_int 2
    push_int 40
    add
    store_global "r"
    load_global "r"
    call_native "print" 1
    pop
    halt
"#;

// ── Program format ────────────────────────────────────────────────────

#[test]
fn assembler_round_trip() {
    let sources = [
        ANSWER,
        "push_str \"a\\\"b\"\npush_str \"a\\\"b\"\nadd\nprint\nhalt\n",
        "push_float 0.1\npush_float -2.0\nmul\npush_int -9223372036854775808\nhalt\n",
        "push_bool true\njmp_if_false 9\npush_nil\nhalt\nhalt\n",
    ];
    for source in sources {
        let program = assemble(source).unwrap();
        assert_eq!(disassemble(&program), normalize(source));
        let bytes = program.to_bytes();
        assert_eq!(Program::load(&bytes).unwrap(), program);
    }

    let floats = [
        f64::NAN.to_bits(),
        0xfff8_0000_0000_0001,
        0x7ff0_0000_0000_0001,
        (-0.0f64).to_bits(),
        f64::NEG_INFINITY.to_bits(),
        f64::MIN_POSITIVE.to_bits() >> 1,
    ];
    for bits in floats {
        let mut b = BytecodeBuilder::new();
        b.push_float(f64::from_bits(bits));
        b.halt();
        let program = b.build();
        let text = disassemble(&program);
        assert_eq!(assemble(&text).unwrap(), program, "{text}");
    }
    assert_eq!(
        disassemble(&assemble("push_float NaN\nhalt\n").unwrap()),
        "push_float NaN\nhalt\n"
    );
}

#[test]
fn short_or_foreign_buffers_are_rejected() {
    let (mut vm, _) = new_vm(GcConfig::default());
    let inputs: [&[u8]; 5] = [b"", b"P", b"PILA", b"NOPE\x01\0\0\0\0\0\0\0\0", b"\0\0\0\0\x01"];
    for bytes in inputs {
        let err = vm.load(bytes).unwrap_err();
        assert_eq!(err.status(), Status::BadBytecode);
        assert_eq!(vm.state(), VmState::Empty);
        assert_eq!(vm.last_error().unwrap().status, Status::BadBytecode);
    }
    assert!(vm.stack().is_empty());
}

#[test]
fn pool_index_out_of_range_is_rejected_at_load() {
    let mut bytes = MAGIC.to_vec();
    bytes.push(VERSION);
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.push(b'x');
    let mut code = Vec::new();
    Instruction::PushStr { idx: 1 }.encode(&mut code);
    Instruction::Halt.encode(&mut code);
    bytes.extend_from_slice(&(code.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&code);

    let (mut vm, _) = new_vm(GcConfig::default());
    assert_eq!(vm.load(&bytes).unwrap_err().status(), Status::BadBytecode);
    assert_eq!(vm.step().unwrap_err().status(), Status::BadArgument);
    assert!(vm.stack().is_empty());
}

#[test]
fn truncated_sections_are_rejected() {
    let program = assemble(ANSWER).unwrap();
    let bytes = program.to_bytes();
    let (mut vm, _) = new_vm(GcConfig::default());
    for len in 0..bytes.len() {
        assert_eq!(vm.load(&bytes[..len]).unwrap_err().status(), Status::BadBytecode, "{len}");
    }
    vm.load(&bytes).unwrap();
    assert_eq!(vm.state(), VmState::Ready);
}

// ── Execution ─────────────────────────────────────────────────────────

#[test]
fn the_answer_prints_and_leaves_the_stack_empty() {
    let (mut vm, out) = new_vm(GcConfig::default());
    vm.load(&assemble(ANSWER).unwrap().to_bytes()).unwrap();
    assert_eq!(vm.run(0).unwrap(), RunExit::Halted);
    assert_eq!(out.text(), "42\n");
    assert!(vm.stack().is_empty());
    assert_eq!(vm.get_global("r").unwrap(), Value::Int(42));
}

#[test]
fn integer_overflow_widens() {
    let (mut vm, out) = new_vm(GcConfig::default());
    let program = assemble("push_int 9223372036854775807\npush_int 1\nadd\nprint\nhalt\n").unwrap();
    vm.load_program(&program).unwrap();
    vm.run(0).unwrap();
    assert_eq!(vm.stack(), &[Value::Float(9223372036854775808.0)]);
    assert_eq!(out.text(), "9223372036854775808.0\n");
}

#[test]
fn loading_replaces_the_program_and_keeps_globals() {
    let (mut vm, _) = new_vm(GcConfig::default());
    vm.load_program(&assemble("push_int 1\nstore_global \"g\"\npush_nil\nhalt\n").unwrap())
        .unwrap();
    vm.run(0).unwrap();
    assert_eq!(vm.stack().len(), 1);

    vm.load_program(&assemble("load_global \"g\"\npush_int 1\nadd\nhalt\n").unwrap())
        .unwrap();
    assert_eq!(vm.state(), VmState::Ready);
    assert!(vm.stack().is_empty());
    vm.run(0).unwrap();
    assert_eq!(vm.stack(), &[Value::Int(2)]);
}

#[test]
fn a_faulted_vm_can_be_reused() {
    let (mut vm, _) = new_vm(GcConfig::default());
    vm.load_program(&assemble("push_int 1\npush_int 0\ndiv\nhalt\n").unwrap())
        .unwrap();
    assert!(vm.run(0).is_err());
    assert_eq!(vm.state(), VmState::Faulted);
    assert_eq!(vm.last_error().unwrap().message, "division by zero");

    vm.load_program(&assemble("push_int 5\nhalt\n").unwrap()).unwrap();
    assert_eq!(vm.run(0).unwrap(), RunExit::Halted);
}

// ── Natives ───────────────────────────────────────────────────────────

fn add_ints(_: &mut Vm, args: &[Value], out: &mut Value, _: Option<&NativeData>) -> Result<(), VmError> {
    match (args[0], args[1]) {
        (Value::Int(a), Value::Int(b)) => *out = Value::Int(a.wrapping_add(b)),
        _ => return Err(VmError::BadArgument("expected ints".into())),
    }
    Ok(())
}

fn run_add(vm: &mut Vm, push_args: &str) -> Result<RunExit, VmError> {
    let argc = push_args.lines().count();
    let source = format!("{push_args}\ncall_native \"add\" {argc}\nhalt\n");
    vm.load_program(&assemble(&source).unwrap()).unwrap();
    vm.run(0)
}

#[test]
fn signature_coercion() {
    let (mut vm, _) = new_vm(GcConfig::default());
    vm.register_native_with_signature("add", "i,i->i", add_ints, None)
        .unwrap();

    run_add(&mut vm, "push_float 2.0\npush_int 3").unwrap();
    assert_eq!(vm.stack(), &[Value::Int(5)]);

    run_add(&mut vm, "push_str \"4\"\npush_bool true").unwrap();
    assert_eq!(vm.stack(), &[Value::Int(5)]);

    let err = run_add(&mut vm, "push_str \"x\"\npush_int 3").unwrap_err();
    assert_eq!(err.status(), Status::BadArgument);
    assert!(vm.last_error().unwrap().message.contains("argument 1"));

    let err = run_add(&mut vm, "push_int 3").unwrap_err();
    assert_eq!(err.status(), Status::BadArgument);
    assert!(vm.last_error().unwrap().message.contains("expects 2 arguments"));
}

#[test]
fn unwrapped_natives_see_raw_arguments() {
    let (mut vm, _) = new_vm(GcConfig::default());
    vm.register_native("add", add_ints, None).unwrap();
    let err = run_add(&mut vm, "push_float 2.0\npush_int 3").unwrap_err();
    assert_eq!(err.status(), Status::BadArgument);
    assert_eq!(vm.last_error().unwrap().message, "bad argument: expected ints");
}

// ── Garbage collection ────────────────────────────────────────────────

const GARBAGE: &str = r#"
    push_str "keep"
    push_str "-me"
    add
    store_global "kept"
    push_str "drop"
    push_str "-me"
    add
    pop
    push_str "on"
    push_str "-stack"
    add
    halt
"#;

#[test]
fn observing_collector_frees_nothing() {
    let (mut vm, _) = new_vm(GcConfig::default());
    vm.load_program(&assemble(GARBAGE).unwrap()).unwrap();
    vm.run(0).unwrap();

    let before = vm.live_strings();
    let first = vm.collect_garbage();
    let second = vm.collect_garbage();
    assert_eq!(first.freed, 0);
    assert_eq!(second.freed, 0);
    assert!(first.marked > 0);
    assert_eq!(first.marked, second.marked);
    assert_eq!(vm.live_strings(), before);
}

#[test]
fn owning_collector_frees_exactly_the_unreachable() {
    let (mut vm, _) = new_vm(own_gc());
    vm.load_program(&assemble(GARBAGE).unwrap()).unwrap();
    vm.run(0).unwrap();

    let before = vm.live_strings();
    let stats = vm.collect_garbage();
    assert_eq!(stats.freed, 1, "only \"drop-me\" is unreachable");
    assert_eq!(vm.live_strings(), before - 1);
    assert_eq!(vm.collect_garbage().freed, 0);

    let kept = vm.get_global("kept").unwrap();
    assert_eq!(vm.value_bytes(kept), Some(&b"keep-me"[..]));
    let top = *vm.stack().last().unwrap();
    assert_eq!(vm.value_bytes(top), Some(&b"on-stack"[..]));
    for &konst in vm.constants() {
        assert!(vm.string_bytes(konst).is_some());
    }
}

#[test]
fn replaced_constants_become_collectable() {
    let (mut vm, _) = new_vm(own_gc());
    vm.load_program(&assemble("push_str \"old\"\npop\nhalt\n").unwrap())
        .unwrap();
    vm.run(0).unwrap();
    let old = vm.constants()[0];

    vm.load_program(&assemble("halt\n").unwrap()).unwrap();
    assert_eq!(vm.collect_garbage().freed, 1);
    assert!(vm.string_bytes(old).is_none());
}

#[test]
fn deduplicated_constants_are_shared_across_loads() {
    let mut vm = Vm::new(VmCreateInfo {
        gc: own_gc(),
        output: Some(Box::new(Output::default())),
        dedup_constants: true,
        ..VmCreateInfo::default()
    })
    .unwrap();

    vm.load_program(&assemble("push_str \"shared\"\npush_str \"first\"\nhalt\n").unwrap())
        .unwrap();
    let shared = vm.constants()[0];
    let first = vm.constants()[1];

    vm.load_program(&assemble("push_str \"shared\"\npush_str \"second\"\nhalt\n").unwrap())
        .unwrap();
    assert_eq!(vm.constants()[0], shared);
    assert_ne!(vm.constants()[1], first);

    assert_eq!(vm.collect_garbage().freed, 1, "only \"first\" left the pool");
    assert!(vm.string_bytes(first).is_none());
    assert_eq!(vm.string_bytes(shared), Some(&b"shared"[..]));
    assert_eq!(vm.run(0).unwrap(), RunExit::Halted);
    assert_eq!(vm.value_bytes(vm.stack()[0]), Some(&b"shared"[..]));

    vm.reset().unwrap();
    vm.load_program(&assemble("halt\n").unwrap()).unwrap();
    assert_eq!(vm.collect_garbage().freed, 2);
    assert!(vm.string_bytes(shared).is_none());

    // A freed constant is reallocated rather than resurrected.
    vm.load_program(&assemble("push_str \"shared\"\nhalt\n").unwrap())
        .unwrap();
    assert_ne!(vm.constants()[0], shared);
    assert_eq!(vm.string_bytes(vm.constants()[0]), Some(&b"shared"[..]));
}

#[test]
fn native_names_and_global_keys_are_roots() {
    let (mut vm, _) = new_vm(own_gc());
    vm.register_native("add", add_ints, None).unwrap();
    vm.set_global("name", Value::Nil).unwrap();
    let loose = vm.new_string(b"loose").unwrap();

    assert_eq!(vm.collect_garbage().freed, 1);
    assert!(vm.value_bytes(loose).is_none());
    assert!(vm.has_native("add"));
    assert_eq!(vm.get_global("name").unwrap(), Value::Nil);
}

// ── Map invariants ────────────────────────────────────────────────────

#[test]
fn map_operations_keep_their_contract() {
    let mut heap = StringHeap::new();
    let keys: Vec<_> = (0..64)
        .map(|i| heap.alloc(format!("key{i}").as_bytes()).unwrap())
        .collect();
    let mut map = Map::new();
    let mut model = vec![None; keys.len()];

    // Deterministic pseudo-random mix of puts and deletes.
    let mut seed = 0x2545_f491_4f6c_dd1du64;
    for step in 0..5_000u64 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let k = (seed % keys.len() as u64) as usize;
        if seed & 0x100 == 0 {
            map.put(&heap, keys[k], step).unwrap();
            model[k] = Some(step);
        } else {
            assert_eq!(map.del(&heap, keys[k]), model[k].take());
        }
        assert!(map.len() + map.tombstones() <= map.capacity());
        assert_eq!(map.get(&heap, keys[k]).copied(), model[k]);
    }
    assert_eq!(map.len(), model.iter().filter(|v| v.is_some()).count());
}

#[test]
fn step_limit_bounds_an_infinite_loop() {
    let (mut vm, _) = new_vm(GcConfig::default());
    let mut b = BytecodeBuilder::new();
    let top = b.current_offset();
    b.push_int(1);
    b.pop();
    b.jump_to(top);
    vm.load_program(&b.build()).unwrap();

    assert_eq!(vm.run(1_000).unwrap(), RunExit::StepLimit);
    assert_eq!(vm.state(), VmState::Ready);
    assert_eq!(vm.run(3).unwrap(), RunExit::StepLimit);
}
