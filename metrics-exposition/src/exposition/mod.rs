//! Text generators for gathered metric families.
//!
//! Two wire formats are supported: the classic Prometheus text format in [`text`], and
//! [OpenMetrics] in [`openmetrics`]. Both render a full set of families at once and either
//! succeed with the complete exposition or fail without producing any output.
//!
//! [OpenMetrics]: https://github.com/OpenObservability/OpenMetrics/blob/main/specification/OpenMetrics.md
pub mod openmetrics;
pub mod text;

use crate::common::SampleError;
use crate::formatting::format_float;
use crate::model::{MetricFamily, MetricType, Sample};

/// Checks that histogram buckets carry their upper bound.
fn check_bucket_bound(family: &MetricFamily, sample: &Sample) -> Result<(), SampleError> {
    let is_histogram = matches!(family.kind, MetricType::Histogram | MetricType::GaugeHistogram);
    if is_histogram && sample.name.ends_with("_bucket") && !sample.labels.contains_key("le") {
        return Err(SampleError::Shape("histogram bucket is missing the `le` label"));
    }
    Ok(())
}

/// Renders the value of a sample, coercing it to a float.
fn sample_value(sample: &Sample) -> Result<String, SampleError> {
    sample.value.to_f64().map(format_float)
}
