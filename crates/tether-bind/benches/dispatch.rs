use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tether_bind::{push, register, Described, TypeDescriptor};
use tether_vm::{State, Value};

#[derive(Clone)]
struct Vec2 {
    x: f64,
    y: f64,
}

impl Described for Vec2 {
    const NAME: &'static str = "Vec2";

    fn describe(d: &mut TypeDescriptor<Self>) {
        d.field("x", |v| &v.x, |v| &mut v.x)
            .field("y", |v| &v.y, |v| &mut v.y)
            .method("Length", |v: &Vec2| (v.x * v.x + v.y * v.y).sqrt());
    }
}

fn bench_free_function(c: &mut Criterion) {
    let mut state = State::new();
    register(&mut state, "Add", |a: i64, b: i64| a + b);
    let add = state.get_global("Add");

    c.bench_function("call_add", |b| {
        b.iter(|| {
            state
                .call_function(&add, [black_box(Value::Integer(2)), Value::Integer(3)])
                .unwrap()
        });
    });
}

fn bench_object_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("object");

    let mut state = State::new();
    push(&mut state, Vec2 { x: 3.0, y: 4.0 }).unwrap();
    let vec2 = state.value(-1);

    group.bench_function("field_read", |b| {
        b.iter(|| state.get_property(black_box(&vec2), "x").unwrap());
    });

    group.bench_function("field_write", |b| {
        b.iter(|| state.set_property(black_box(&vec2), "y", 1.5).unwrap());
    });

    group.bench_function("method_call", |b| {
        b.iter(|| state.call_method(black_box(&vec2), "Length", []).unwrap());
    });

    group.finish();
}

fn bench_push_object(c: &mut Criterion) {
    let mut state = State::new();

    c.bench_function("push_object", |b| {
        b.iter(|| {
            push(&mut state, black_box(Vec2 { x: 1.0, y: 2.0 })).unwrap();
            state.pop(1);
            state.collect_garbage()
        });
    });
}

criterion_group!(benches, bench_free_function, bench_object_access, bench_push_object);
criterion_main!(benches);
