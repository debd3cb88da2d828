use chem_core::config::{ChlorDosingMethod, ChlorinatorLink, DosingMethod};
use chem_core::{ChlorinatorBridge, DoseLimits, DosePlan, percent_of_time};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

// Demand/slope pairs sweeping the whole duty-cycle curve.
fn demand_sweep(n: usize) -> Vec<(f64, f64)> {
    (0..n)
        .map(|i| {
            let t = i as f64 / n as f64;
            let demand = -30.0 + 90.0 * t;
            let slope = (t * 12.0).sin() * 15.0;
            (demand, slope)
        })
        .collect()
}

pub fn bench_duty_cycle(c: &mut Criterion) {
    let mut g = c.benchmark_group("duty_cycle");
    //   BENCH_SAMPLE_SIZE=10 cargo bench -p chem_core --bench duty_cycle
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }

    let sweep = demand_sweep(10_000);
    g.bench_function("percent_of_time", |b| {
        b.iter_batched(
            || sweep.clone(),
            |s| {
                let total: f64 = s
                    .iter()
                    .filter_map(|&(d, sl)| percent_of_time(black_box(d), black_box(sl), 1.0))
                    .sum();
                black_box(total);
            },
            BatchSize::SmallInput,
        )
    });

    let bridge = ChlorinatorBridge::new(ChlorinatorLink {
        id: 1,
        method: ChlorDosingMethod::Target,
        lbs_per_day: Some(1.4),
    });
    g.bench_function("bridge_plan", |b| {
        b.iter(|| {
            for &(d, sl) in &sweep {
                black_box(bridge.plan(black_box(d), sl, 0.8).ok());
            }
        })
    });

    for method in [DosingMethod::Time, DosingMethod::Volume, DosingMethod::VolumeTime] {
        let limits = DoseLimits {
            method,
            max_time: 600.0,
            max_volume: 500.0,
            rated_flow: 100.0,
        };
        g.bench_function(format!("pump_limits_{method:?}"), |b| {
            b.iter(|| {
                for ml in (1..2_000).step_by(7) {
                    black_box(limits.apply(DosePlan::for_volume(f64::from(ml), 100.0)));
                }
            })
        });
    }
    g.finish();
}

criterion_group!(duty_cycle, bench_duty_cycle);
criterion_main!(duty_cycle);
