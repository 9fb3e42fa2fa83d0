//! The [OpenMetrics] text format.
//!
//! [OpenMetrics]: https://github.com/OpenObservability/OpenMetrics/blob/main/specification/OpenMetrics.md
use tracing::trace;

use super::{check_bucket_bound, sample_value};
use crate::common::{ExpositionError, RenderError, SampleError};
use crate::escaping::EscapingScheme;
use crate::formatting::{
    float_repr, format_float, sanitize_openmetrics_description, write_help_line, write_labels,
    write_series, write_type_line, write_unit_line,
};
use crate::model::{MetricFamily, MetricType, Sample, Timestamp};
use crate::registry::Registry;

/// Renders metric families in the OpenMetrics text format, including the closing `# EOF` line.
///
/// ## Errors
///
/// If any sample fails to render, an error is returned carrying the offending family, and no
/// output is produced.
pub fn render(families: &[MetricFamily], scheme: EscapingScheme) -> Result<String, RenderError> {
    let mut output = String::new();
    for family in families {
        render_family(&mut output, family, scheme)?;
    }
    output.push_str("# EOF\n");
    Ok(output)
}

/// Gathers all metrics from `registry` and renders them in the OpenMetrics text format.
///
/// ## Errors
///
/// If gathering fails, or if any sample fails to render, an error is returned.
pub fn generate_latest(
    registry: &Registry,
    scheme: EscapingScheme,
) -> Result<Vec<u8>, ExpositionError> {
    let families = registry.gather()?;
    let output = render(&families, scheme)?;
    trace!(families = families.len(), bytes = output.len(), "rendered OpenMetrics exposition");
    Ok(output.into_bytes())
}

fn render_family(
    output: &mut String,
    family: &MetricFamily,
    scheme: EscapingScheme,
) -> Result<(), RenderError> {
    let desc = sanitize_openmetrics_description(&family.documentation);
    write_help_line(output, &family.name, &desc, scheme);
    write_type_line(output, &family.name, family.kind.as_str(), scheme);
    if let Some(unit) = &family.unit {
        write_unit_line(output, &family.name, unit, scheme);
    }

    for sample in &family.samples {
        write_sample(output, family, sample, scheme)
            .map_err(|e| RenderError::new(&sample.name, e, family))?;
    }
    Ok(())
}

fn write_sample(
    buffer: &mut String,
    family: &MetricFamily,
    sample: &Sample,
    scheme: EscapingScheme,
) -> Result<(), SampleError> {
    check_bucket_bound(family, sample)?;
    let value = sample_value(sample)?;
    let exemplar = match &sample.exemplar {
        Some(exemplar) => {
            if !can_carry_exemplar(family, sample) {
                return Err(SampleError::Shape(
                    "exemplars are only allowed on histogram buckets and counter totals",
                ));
            }
            Some((exemplar, format_float(exemplar.value.to_f64()?)))
        }
        None => None,
    };

    write_series(buffer, &sample.name, &sample.labels, scheme);
    buffer.push(' ');
    buffer.push_str(&value);
    if let Some(timestamp) = &sample.timestamp {
        buffer.push(' ');
        buffer.push_str(&format_timestamp(timestamp));
    }
    if let Some((exemplar, value)) = exemplar {
        buffer.push_str(" # ");
        write_labels(buffer, &exemplar.labels, scheme);
        buffer.push(' ');
        buffer.push_str(&value);
        if let Some(timestamp) = &exemplar.timestamp {
            buffer.push(' ');
            buffer.push_str(&format_timestamp(timestamp));
        }
    }
    buffer.push('\n');
    Ok(())
}

fn can_carry_exemplar(family: &MetricFamily, sample: &Sample) -> bool {
    match family.kind {
        MetricType::Counter => sample.name.ends_with("_total"),
        MetricType::Histogram | MetricType::GaugeHistogram => sample.name.ends_with("_bucket"),
        _ => false,
    }
}

/// Formats a timestamp as decimal seconds.
fn format_timestamp(timestamp: &Timestamp) -> String {
    match timestamp {
        Timestamp::Seconds(seconds) => float_repr(*seconds),
        Timestamp::Precise { .. } => {
            let nanos = timestamp.total_nanos();
            let sign = if nanos < 0 { "-" } else { "" };
            let nanos = nanos.unsigned_abs();
            format!("{sign}{}.{:09}", nanos / 1_000_000_000, nanos % 1_000_000_000)
        }
    }
}
