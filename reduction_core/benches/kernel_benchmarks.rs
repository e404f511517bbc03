//! Throughput of the per-feature kernels and the full learn path.
//!
//! Run with: cargo bench --bench kernel_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reduction_core::optimizer::kernels::{
    coin_predict, coin_update, pistol_predict, pistol_update, proximal_update,
};
use reduction_core::optimizer::{CoinChannels, FtrlParams, PistolChannels, ProximalChannels};
use reduction_core::{CbClass, CbLabel, Example, ExampleType, Label, LearnerConfig, Workspace};

fn params(alpha: f32, beta: f32) -> FtrlParams {
    FtrlParams {
        alpha,
        beta,
        l1: 0.0,
        l2: 0.0,
    }
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_step");
    let xs: Vec<f32> = (0..256).map(|i| ((i % 17) as f32 - 8.0) / 8.0).collect();

    let proximal = params(0.005, 0.1);
    group.bench_function("proximal", |b| {
        b.iter(|| {
            let mut w = ProximalChannels::default();
            for &x in &xs {
                w = proximal_update(w, x, -0.5 * x, &proximal);
            }
            black_box(w)
        });
    });

    let pistol = params(1.0, 0.5);
    group.bench_function("pistol", |b| {
        b.iter(|| {
            let mut w = PistolChannels::default();
            for &x in &xs {
                let (state, _) = pistol_predict(w, x, &pistol);
                w = pistol_update(state, x, -0.5 * x);
            }
            black_box(w)
        });
    });

    let coin = params(4.0, 1.0);
    group.bench_function("coin", |b| {
        b.iter(|| {
            let mut w = CoinChannels::default();
            for &x in &xs {
                black_box(coin_predict(&w, x, &coin));
                w = coin_update(w, x, -0.5 * x, &coin, 1.0);
            }
            black_box(w)
        });
    });

    group.finish();
}

fn quiet(toml: &str) -> LearnerConfig {
    let mut config = LearnerConfig::from_str(toml).unwrap();
    config.run.quiet = true;
    config
}

fn bench_single_line_learn(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_line_learn");

    for features in [4usize, 32, 256] {
        let mut workspace = Workspace::new(quiet("[weights]\nbits = 18\n")).unwrap();
        let mut ec = Example::new().with_label(Label::Simple(Some(1.0)));
        for i in 0..features {
            workspace.add_feature(&mut ec, "x", &format!("f{i}"), 1.0);
        }
        group.bench_with_input(BenchmarkId::from_parameter(features), &features, |b, _| {
            b.iter(|| workspace.learn(black_box(&mut ec)).unwrap());
        });
    }

    group.finish();
}

fn bench_igl_batch(c: &mut Criterion) {
    let mut workspace = Workspace::new(quiet(
        "[weights]\nbits = 18\nsparse = true\n[features]\ninteractions = [\"UA\"]\n\
         [igl]\nexperimental_igl = true\n[igl.decoder]\ninteractions = [\"AF\"]\n",
    ))
    .unwrap();

    let mut shared = Example::new().with_kind(ExampleType::Shared);
    workspace.add_feature(&mut shared, "User", "user=Tom", 1.0);
    let mut batch = vec![shared];
    for action in 0..7u32 {
        let mut ec = Example::new().with_kind(ExampleType::Action);
        workspace.add_feature(&mut ec, "Action", &format!("article={action}"), 1.0);
        let costs = if action == 3 {
            vec![CbClass::observed(0.0, action, 1.0 / 7.0)]
        } else {
            Vec::new()
        };
        ec.label = Label::Cb(CbLabel { costs });
        batch.push(ec);
    }
    let mut feedback = Example::new().with_kind(ExampleType::Feedback);
    workspace.add_feature(&mut feedback, "F", "click", 1.0);
    batch.push(feedback);

    c.bench_function("igl_learn_batch_7_actions", |b| {
        b.iter(|| workspace.learn_multi(black_box(&mut batch)).unwrap());
    });
}

criterion_group!(benches, bench_kernels, bench_single_line_learn, bench_igl_batch);
criterion_main!(benches);
