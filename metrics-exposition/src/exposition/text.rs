//! The Prometheus text [exposition format].
//!
//! OpenMetrics-only types are folded into the closest legacy type, and samples the legacy format
//! has no place for (`_created`, `_gsum` and `_gcount`) are split off into trailing gauges.
//!
//! [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
use std::collections::BTreeMap;

use tracing::trace;

use super::{check_bucket_bound, sample_value};
use crate::common::{ExpositionError, RenderError, SampleError};
use crate::escaping::EscapingScheme;
use crate::formatting::{sanitize_description, write_help_line, write_series, write_type_line};
use crate::model::{MetricFamily, MetricType, Sample};
use crate::registry::Registry;

const SPLIT_SUFFIXES: [&str; 3] = ["_created", "_gsum", "_gcount"];

/// Renders metric families in the Prometheus text format.
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
    Ok(output)
}

/// Gathers all metrics from `registry` and renders them in the Prometheus text format.
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
    trace!(families = families.len(), bytes = output.len(), "rendered text exposition");
    Ok(output.into_bytes())
}

fn render_family(
    output: &mut String,
    family: &MetricFamily,
    scheme: EscapingScheme,
) -> Result<(), RenderError> {
    let (name, kind) = match family.kind {
        MetricType::Counter => (format!("{}_total", family.name), "counter"),
        MetricType::Info => (format!("{}_info", family.name), "gauge"),
        MetricType::StateSet => (family.name.clone(), "gauge"),
        MetricType::GaugeHistogram => (family.name.clone(), "histogram"),
        MetricType::Unknown => (family.name.clone(), "untyped"),
        kind => (family.name.clone(), kind.as_str()),
    };
    let desc = sanitize_description(&family.documentation);

    let mut buffer = String::new();
    write_help_line(&mut buffer, &name, &desc, scheme);
    write_type_line(&mut buffer, &name, kind, scheme);

    let mut split_off: BTreeMap<&str, String> = BTreeMap::new();
    for sample in &family.samples {
        let suffix = SPLIT_SUFFIXES
            .iter()
            .copied()
            .find(|suffix| sample.name.strip_suffix(suffix) == Some(family.name.as_str()));
        let target = match suffix {
            Some(suffix) => split_off.entry(suffix).or_default(),
            None => &mut buffer,
        };
        write_sample(target, family, sample, scheme)
            .map_err(|e| RenderError::new(&sample.name, e, family))?;
    }

    for (suffix, lines) in split_off {
        let name = format!("{}{}", family.name, suffix);
        write_help_line(&mut buffer, &name, &desc, scheme);
        write_type_line(&mut buffer, &name, "gauge", scheme);
        buffer.push_str(&lines);
    }

    output.push_str(&buffer);
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

    write_series(buffer, &sample.name, &sample.labels, scheme);
    buffer.push(' ');
    buffer.push_str(&value);
    if let Some(timestamp) = &sample.timestamp {
        buffer.push(' ');
        buffer.push_str(&timestamp.as_millis().to_string());
    }
    buffer.push('\n');
    Ok(())
}
