use std::{hint::black_box, io};

use bytecode::{BytecodeBuilder, Program};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use heap::{GcConfig, GcMode};
use vm::{RunExit, Vm, VmCreateInfo};

/// Every `load_program` allocates the pool again, so benches collect to
/// keep memory flat across iterations.
fn owning(threshold: usize) -> GcConfig {
    GcConfig {
        mode: GcMode::Own,
        threshold: Some(threshold),
    }
}

fn quiet_vm(gc: GcConfig) -> Vm {
    let vm = Vm::new(VmCreateInfo {
        gc,
        output: Some(Box::new(io::sink())),
        ..VmCreateInfo::default()
    });
    match vm {
        Ok(vm) => vm,
        Err(err) => panic!("vm: {err}"),
    }
}

/// `i = 0; while i < n { i = i + 1 }`
fn counting_loop(n: i64) -> Program {
    let mut b = BytecodeBuilder::new();
    b.push_int(0);
    b.store_global("i");
    let top = b.current_offset();
    b.load_global("i");
    b.push_int(n);
    b.lt();
    let exit = b.jump_if_false();
    b.load_global("i");
    b.push_int(1);
    b.add();
    b.store_global("i");
    b.jump_to(top);
    b.bind(exit);
    b.halt();
    b.build()
}

/// Concatenates and drops a string `n` times.
fn string_churn(n: usize) -> Program {
    let mut b = BytecodeBuilder::new();
    for _ in 0..n {
        b.push_str("left");
        b.push_str("right");
        b.add();
        b.pop();
    }
    b.halt();
    b.build()
}

fn run_to_halt(vm: &mut Vm, program: &Program) {
    vm.load_program(program).unwrap();
    assert_eq!(vm.run(0).unwrap(), RunExit::Halted);
}

fn bench_counting_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("counting_loop");
    for &n in &[100_i64, 1_000, 10_000] {
        let program = counting_loop(n);
        let mut vm = quiet_vm(owning(1024));
        group.bench_with_input(BenchmarkId::from_parameter(n), &program, |b, p| {
            b.iter(|| run_to_halt(black_box(&mut vm), p));
        });
    }
    group.finish();
}

fn bench_native_calls(c: &mut Criterion) {
    let mut b = BytecodeBuilder::new();
    for _ in 0..500 {
        b.push_float(3.7);
        b.call_native("int", 1);
        b.pop();
    }
    b.halt();
    let program = b.build();
    let mut vm = quiet_vm(owning(1024));
    c.bench_function("native_call_with_signature", |bench| {
        bench.iter(|| run_to_halt(black_box(&mut vm), &program));
    });
}

fn bench_string_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_churn");
    let program = string_churn(500);
    for threshold in [16_usize, 256, 4096] {
        let mut vm = quiet_vm(owning(threshold));
        group.bench_with_input(BenchmarkId::from_parameter(threshold), &program, |b, p| {
            b.iter(|| run_to_halt(black_box(&mut vm), p));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_counting_loop, bench_native_calls, bench_string_churn);
criterion_main!(benches);
