//! Run with:
//!   cargo bench --bench shim_benchmark

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use native_shim::{
    ConstantHandle, ConstantPool, HostRuntime, Value, expand_splat,
    model::{ModelCreateInfo, ModelVm},
    string_interpolate,
};

/// Collects at the safepoint after each iteration so long runs stay bounded.
/// Benchmark inputs must be reachable from a global.
fn collecting_vm() -> ModelVm {
    ModelVm::new(ModelCreateInfo {
        gc_threshold: Some(1 << 16),
    })
}

fn bench_constant_fetch(c: &mut Criterion) {
    let mut vm = collecting_vm();
    let pool = ConstantPool::new();
    let handles: Vec<ConstantHandle> = (0..1024)
        .map(|i| {
            let s = vm.new_string(&format!("constant-{i}"));
            pool.register(&mut vm, s).expect("register")
        })
        .collect();

    c.bench_function("constant_fetch_1024", |b| {
        b.iter(|| {
            for &handle in &handles {
                black_box(pool.fetch(&mut vm, black_box(handle)).expect("fetch"));
            }
        })
    });
}

fn bench_expand_splat(c: &mut Criterion) {
    let mut vm = collecting_vm();
    let long = vm.new_array(&[Value::from_fixnum(1); 8]);
    let short = vm.new_array(&[Value::from_fixnum(1)]);
    vm.global_set("$long", long);
    vm.global_set("$short", short);

    let mut group = c.benchmark_group("expand_splat");
    group.bench_function("long_enough", |b| {
        b.iter(|| {
            black_box(expand_splat(&mut vm, black_box(long), 2, 2).expect("splat"));
            vm.safepoint();
        })
    });
    group.bench_function("padded", |b| {
        b.iter(|| {
            black_box(expand_splat(&mut vm, black_box(short), 2, 2).expect("splat"));
            vm.safepoint();
        })
    });
    group.finish();
}

fn bench_string_interpolate(c: &mut Criterion) {
    let mut vm = collecting_vm();
    let prefix = vm.new_string("count: ");
    let sym = vm.new_symbol("items");
    vm.global_set("$prefix", prefix);

    c.bench_function("string_interpolate_mixed", |b| {
        b.iter(|| {
            let mut args = [prefix, Value::from_fixnum(42), sym, Value::NIL];
            black_box(string_interpolate(&mut vm, &mut args).expect("interpolate"));
            vm.safepoint();
        })
    });
}

criterion_group!(
    benches,
    bench_constant_fetch,
    bench_expand_splat,
    bench_string_interpolate
);
criterion_main!(benches);
