use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use metrics_exposition::{
    default_registry, Bucket, Collector, ExporterBuilder, Families, MetricFamily,
};
use quanta::Clock;

const BOUNDS_NS: [u64; 4] = [1_000, 10_000, 100_000, 1_000_000];

#[derive(Default)]
struct ServerStats {
    loops: AtomicU64,
    lucky_iterations: AtomicU64,
    // Cumulative per bound, plus +Inf.
    delta_buckets: [AtomicU64; BOUNDS_NS.len() + 1],
    delta_sum_ns: AtomicU64,
}

impl ServerStats {
    fn observe(&self, delta: Duration) {
        let nanos = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        for (bucket, bound) in self.delta_buckets.iter().zip(BOUNDS_NS) {
            if nanos <= bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.delta_buckets[BOUNDS_NS.len()].fetch_add(1, Ordering::Relaxed);
        self.delta_sum_ns.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl Collector for ServerStats {
    fn collect(&self) -> Families<'_> {
        let mut loops =
            MetricFamily::counter("tcp_server_loops", "The iterations of the TCP server event loop so far.")
                .with_label_names(["system"]);
        loops.add_counter(&["foo"], self.loops.load(Ordering::Relaxed), None);

        let mut lucky = MetricFamily::gauge("lucky_iterations", "Iterations that came up lucky.");
        lucky.add_gauge(&[], self.lucky_iterations.load(Ordering::Relaxed));

        let mut delta = MetricFamily::histogram(
            "tcp_server_loop_delta",
            "The time taken for iterations of the TCP server event loop.",
        )
        .with_unit("nanoseconds")
        .with_label_names(["system"]);
        let buckets = BOUNDS_NS
            .iter()
            .map(ToString::to_string)
            .chain(std::iter::once("+Inf".to_string()))
            .zip(&self.delta_buckets)
            .map(|(bound, count)| Bucket::new(bound, count.load(Ordering::Relaxed)))
            .collect();
        delta.add_histogram(&["foo"], buckets, Some(self.delta_sum_ns.load(Ordering::Relaxed).into()), None);

        Box::new([loops, lucky, delta].into_iter())
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let stats = Arc::new(ServerStats::default());
    let registry = default_registry();
    registry.register_arc(stats.clone()).expect("failed to register collector");

    ExporterBuilder::new(registry)
        .with_http_listener(([127, 0, 0, 1], 9000))
        .install()
        .expect("failed to install exporter");

    let clock = Clock::new();
    let mut last = None;

    // Loop over and over, pretending to do some work.
    loop {
        let iteration = stats.loops.fetch_add(1, Ordering::Relaxed);

        if let Some(t) = last {
            stats.observe(clock.now() - t);
        }

        if iteration % 4 != 0 {
            stats.lucky_iterations.fetch_add(1, Ordering::Relaxed);
        }

        last = Some(clock.now());

        thread::sleep(Duration::from_millis(750));
    }
}
