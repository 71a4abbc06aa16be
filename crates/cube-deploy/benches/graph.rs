use criterion::{Criterion, criterion_group, criterion_main};
use cube_deploy::graph::{Component, ComponentGraph, Source};
use cube_scm::ScmKind;
use std::hint::black_box;
use std::path::PathBuf;

fn make_component(i: usize) -> Component {
    let name = format!("comp_{}", i);
    Component {
        source: Source::Lib {
            file: PathBuf::from(format!("/app/lib/{}.lib", name)),
        },
        path: PathBuf::from(format!("/app/lib/{}", name)),
        url: Some(format!("https://example.com/{}.git", name)),
        rev: Some("v1.0.0".to_string()),
        scm: Some(ScmKind::Git),
        name,
    }
}

/// Layered DAG: every component depends on up to three components of the next layer.
fn build_graph(count: usize) -> ComponentGraph {
    let mut graph = ComponentGraph::new();
    let root = graph
        .insert(Component::root("app", PathBuf::from("/app")))
        .id();
    let ids: Vec<usize> = (0..count)
        .map(|i| graph.insert(make_component(i)).id())
        .collect();

    const WIDTH: usize = 10;
    for &id in ids.iter().take(WIDTH) {
        graph.add_edge(root, id);
    }
    for (i, &id) in ids.iter().enumerate() {
        for step in 1..=3 {
            if let Some(&dep) = ids.get(i + WIDTH * step - (step - 1)) {
                graph.add_edge(id, dep);
            }
        }
    }
    graph
}

fn bench_topo_order_500(c: &mut Criterion) {
    let graph = build_graph(500);

    c.bench_function("topo_order_500_components", |b| {
        b.iter(|| black_box(&graph).topo_order().unwrap())
    });
}

fn bench_find_cycle_500(c: &mut Criterion) {
    let graph = build_graph(500);

    c.bench_function("find_cycle_500_components", |b| {
        b.iter(|| black_box(&graph).find_cycle())
    });
}

fn bench_insert_dedupe_500(c: &mut Criterion) {
    c.bench_function("insert_500_components_twice", |b| {
        b.iter(|| {
            let mut graph = ComponentGraph::new();
            for i in 0..500 {
                graph.insert(make_component(i));
            }
            for i in 0..500 {
                graph.insert(make_component(i));
            }
            black_box(graph.len())
        })
    });
}

fn bench_render_tree_500(c: &mut Criterion) {
    let graph = build_graph(500);

    c.bench_function("render_tree_500_components", |b| {
        b.iter(|| black_box(&graph).render_tree(0))
    });
}

criterion_group!(
    benches,
    bench_topo_order_500,
    bench_find_cycle_500,
    bench_insert_dedupe_500,
    bench_render_tree_500
);
criterion_main!(benches);
