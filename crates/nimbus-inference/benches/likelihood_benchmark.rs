use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nimbus_core::traits::DistanceDensity;
use nimbus_core::{Filter, MagnitudeLimit, MagnitudeLimitSeries};
use nimbus_inference::{
    BatchConfig, FieldLikelihood, FieldLikelihoodBuilder, LinearLightCurve, SkyLocalization,
    evaluate_batch,
};
use nimbus_prob::{DistanceAnsatz, PixelMixtureDistance, QuadratureConfig};
use std::hint::black_box;
use std::sync::Arc;

const T0: f64 = 2458598.5;

fn density(n_pixels: usize) -> Arc<dyn DistanceDensity> {
    let pixels: Vec<(f64, DistanceAnsatz)> = (0..n_pixels)
        .map(|i| {
            let mu = 120.0 + 5.0 * i as f64;
            let sigma = 30.0 + (i % 7) as f64;
            let distnorm = 1.0 / (mu * mu + sigma * sigma);
            (1.0 + (i % 3) as f64, DistanceAnsatz::new(mu, sigma, distnorm).unwrap())
        })
        .collect();
    let cfg = QuadratureConfig::default();
    Arc::new(PixelMixtureDistance::new(&pixels, (1.0, 2000.0), &cfg).unwrap())
}

fn field(n_pixels: usize) -> FieldLikelihood {
    let limits = |offset: f64| {
        (0..4)
            .map(|k| MagnitudeLimit {
                time: T0 + offset + k as f64,
                mlim: 20.0 + 0.1 * k as f64,
                sigma: 0.15,
            })
            .collect::<Vec<_>>()
    };
    FieldLikelihoodBuilder::new(SkyLocalization::new(0.3, density(n_pixels)).unwrap(), T0)
        .with_series(MagnitudeLimitSeries::new(Filter::G, limits(0.2)).unwrap())
        .with_series(MagnitudeLimitSeries::new(Filter::R, limits(0.4)).unwrap())
        .with_default_light_curve(Arc::new(LinearLightCurve))
        .build()
        .unwrap()
}

fn bench_single_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_likelihood");
    for n_pixels in [1usize, 16] {
        let lik = field(n_pixels);
        group.bench_with_input(BenchmarkId::new("pixels", n_pixels), &lik, |b, lik| {
            b.iter(|| black_box(lik.evaluate(black_box(&[-16.0, 0.5]))).unwrap())
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let lik = field(1);
    let samples: Vec<Vec<f64>> = (0..64).map(|i| vec![-18.0 + 0.1 * i as f64, 0.3]).collect();
    c.bench_function("field_batch_64", |b| {
        let config = BatchConfig::default();
        b.iter(|| black_box(evaluate_batch(&lik, black_box(&samples), &config)).unwrap())
    });
}

criterion_group!(benches, bench_single_sample, bench_batch);
criterion_main!(benches);
