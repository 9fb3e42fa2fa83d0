/// Make sure to run this example with `--features push-gateway` to properly enable push gateway support.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use metrics_exposition::{default_registry, ExporterBuilder, MetricFamily};

fn main() {
    tracing_subscriber::fmt::init();

    let jobs_processed = Arc::new(AtomicU64::new(0));
    let registry = default_registry();

    let counter = Arc::clone(&jobs_processed);
    registry
        .register(move || {
            let mut family = MetricFamily::counter("jobs_processed", "Jobs processed by this batch.");
            family.add_counter(&[], counter.load(Ordering::Relaxed), None);
            vec![family]
        })
        .expect("failed to register collector");

    ExporterBuilder::new(registry)
        .with_push_gateway("http://127.0.0.1:9091", "example", Duration::from_secs(10))
        .expect("push gateway endpoint should be valid")
        .add_grouping_key("instance", "example-host")
        .install()
        .expect("failed to install exporter");

    // Pretend to work through a batch.
    loop {
        jobs_processed.fetch_add(1, Ordering::Relaxed);
        thread::sleep(Duration::from_millis(500));
    }
}
