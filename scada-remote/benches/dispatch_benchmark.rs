use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use scada_core::{Designer, Element, ElementKind, ViewMode, Workspace};
use scada_remote::patch::split_patch;
use scada_remote::{Dispatcher, Origin, SettingsStore, Telemetry};

fn plant(mode: ViewMode, elements: usize) -> Workspace {
    let mut ws = Workspace::new();
    for i in 0..elements {
        let mut el = Element::new("gauge", ElementKind::Custom).with_prop("tag", json!(format!("line-{}", i % 10)));
        el.id = format!("g{i}");
        ws.create_element(el).unwrap();
    }
    ws.set_view_mode(mode);
    ws
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(SettingsStore::new(json!({"url": "memory://bench"})), Telemetry::new())
}

fn bench_split_patch(c: &mut Criterion) {
    let patch = json!({
        "x": 10, "y": 20, "fill": "#00ff00",
        "level": 42.5, "unit": "bar",
        "props": {"alarm": true, "setpoint": 50}
    });
    let patch = patch.as_object().unwrap().clone();

    c.bench_function("split_patch", |b| {
        b.iter(|| black_box(split_patch(black_box(&patch))))
    });
}

fn bench_query(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let mut ws = plant(ViewMode::View, 200);
    let message = json!({"action": "findByTag", "payload": {"tag": "line-3"}, "requestId": "q"});

    c.bench_function("dispatch_find_by_tag_200", |b| {
        b.iter(|| black_box(dispatcher.dispatch(&mut ws, black_box(&message), Origin::Remote)))
    });
}

fn bench_runtime_update(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let mut ws = plant(ViewMode::View, 200);
    let mut level = 0u64;

    c.bench_function("dispatch_update_by_tag_view", |b| {
        b.iter(|| {
            level += 1;
            let message: Value = json!({
                "action": "updateProps",
                "payload": {"tag": "line-3", "props": {"level": level}},
                "requestId": "u"
            });
            black_box(dispatcher.dispatch(&mut ws, &message, Origin::Remote))
        })
    });
}

fn bench_persisted_update(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let mut ws = plant(ViewMode::Edit, 50);
    let message = json!({
        "action": "updateElement",
        "payload": {"id": "g7", "patch": {"x": 5, "level": 1}},
        "requestId": "p"
    });

    c.bench_function("dispatch_update_edit_local", |b| {
        b.iter(|| black_box(dispatcher.dispatch(&mut ws, black_box(&message), Origin::Local)))
    });
}

criterion_group!(
    benches,
    bench_split_patch,
    bench_query,
    bench_runtime_update,
    bench_persisted_update,
);
criterion_main!(benches);
