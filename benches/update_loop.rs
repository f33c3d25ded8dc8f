use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use relayrt::prelude::*;
use std::hint::black_box;
use std::time::{Duration, Instant};

struct CountdownService {
    left: u64,
}

impl Service for CountdownService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::new(kind::USER_BASE, "countdown")
    }

    fn on_update(&mut self, ctx: &mut RunnerContext) {
        if self.left == 0 {
            ctx.raise_event(event::SHUTDOWN, FlatJson::new());
            return;
        }
        self.left = black_box(self.left - 1);
        ctx.mark_busy();
    }
}

fn run_ticks(ticks: u64) -> Duration {
    let engine = Engine::new();
    engine.start().unwrap();

    let runner = engine
        .create_runner_builder("bench")
        .unwrap()
        .with_service(move || Ok(Box::new(CountdownService { left: ticks }) as BoxedService))
        .build_thread_runner()
        .unwrap();

    let start = Instant::now();
    runner.start().unwrap();
    runner.stop().unwrap();
    let elapsed = start.elapsed();

    engine.stop().unwrap();
    elapsed
}

pub fn bench_update_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("runner_update_loop");

    for &ticks in &[100_000u64, 1_000_000u64] {
        group.bench_function(BenchmarkId::from_parameter(ticks), |b| {
            b.iter_custom(|n| {
                let mut total = Duration::ZERO;
                for _ in 0..n {
                    total += run_ticks(ticks);
                }
                total
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(10);
    targets = bench_update_loop
}
criterion_main!(benches);
