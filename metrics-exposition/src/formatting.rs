//! Helpers for rendering metrics in the Prometheus and OpenMetrics text formats.

use crate::escaping::{escape_label_name, escape_metric_name, is_valid_legacy_metric_name};
use crate::escaping::{push_quoted_escaped, EscapingScheme};
use crate::model::Labels;

/// Writes a help (description) line in the Prometheus [exposition format].
///
/// `desc` must already be sanitized for the target format, see [`sanitize_description`] and
/// [`sanitize_openmetrics_description`].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_help_line(buffer: &mut String, name: &str, desc: &str, scheme: EscapingScheme) {
    buffer.push_str("# HELP ");
    buffer.push_str(&escape_metric_name(name, scheme));
    buffer.push(' ');
    buffer.push_str(desc);
    buffer.push('\n');
}

/// Writes a metric type line in the Prometheus [exposition format].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_type_line(buffer: &mut String, name: &str, metric_type: &str, scheme: EscapingScheme) {
    buffer.push_str("# TYPE ");
    buffer.push_str(&escape_metric_name(name, scheme));
    buffer.push(' ');
    buffer.push_str(metric_type);
    buffer.push('\n');
}

/// Writes a unit line in the OpenMetrics format.
pub fn write_unit_line(buffer: &mut String, name: &str, unit: &str, scheme: EscapingScheme) {
    buffer.push_str("# UNIT ");
    buffer.push_str(&escape_metric_name(name, scheme));
    buffer.push(' ');
    buffer.push_str(unit);
    buffer.push('\n');
}

/// Writes the series identifier of a sample: its name and labels, without the value.
///
/// When UTF-8 names are allowed and `name` is not a valid legacy name, the quoted name moves
/// inside the braces, as in `{"my.metric",label="value"}`.
pub fn write_series(buffer: &mut String, name: &str, labels: &Labels, scheme: EscapingScheme) {
    if scheme == EscapingScheme::AllowUtf8 && !is_valid_legacy_metric_name(name) {
        buffer.push('{');
        push_quoted_escaped(buffer, name);
        for (key, value) in labels {
            buffer.push(',');
            write_label(buffer, key, value, scheme);
        }
        buffer.push('}');
        return;
    }

    buffer.push_str(&escape_metric_name(name, scheme));
    if !labels.is_empty() {
        write_labels(buffer, labels, scheme);
    }
}

/// Writes a brace-enclosed label set, such as `{a="b",c="d"}`.
///
/// An empty label set is written as `{}`.
pub fn write_labels(buffer: &mut String, labels: &Labels, scheme: EscapingScheme) {
    buffer.push('{');
    let mut first = true;
    for (key, value) in labels {
        if first {
            first = false;
        } else {
            buffer.push(',');
        }
        write_label(buffer, key, value, scheme);
    }
    buffer.push('}');
}

fn write_label(buffer: &mut String, key: &str, value: &str, scheme: EscapingScheme) {
    buffer.push_str(&escape_label_name(key, scheme));
    buffer.push_str("=\"");
    buffer.push_str(&sanitize_label_value(value));
    buffer.push('"');
}

/// Sanitizes a label value to be valid under the Prometheus [exposition format].
///
/// Backslashes, double quotes and line feeds are escaped.
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn sanitize_label_value(value: &str) -> String {
    sanitize(value, true)
}

/// Sanitizes a metric description for the Prometheus text format.
///
/// Backslashes and line feeds are escaped; double quotes are left as-is.
pub fn sanitize_description(value: &str) -> String {
    sanitize(value, false)
}

/// Sanitizes a metric description for the OpenMetrics format, which also escapes double quotes.
pub fn sanitize_openmetrics_description(value: &str) -> String {
    sanitize(value, true)
}

fn sanitize(value: &str, escape_quotes: bool) -> String {
    let mut sanitized = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => sanitized.push_str("\\\\"),
            '\n' => sanitized.push_str("\\n"),
            '"' if escape_quotes => sanitized.push_str("\\\""),
            c => sanitized.push(c),
        }
    }
    sanitized
}

/// Formats a float the way Go's Prometheus client does.
///
/// Infinities and NaN use their Prometheus spellings, and large positive values switch to
/// exponent notation after six integer digits. The exponent is always written with a leading
/// zero, so `1234567.0` is `1.234567e+06` and `1e10` is `1e+010`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "+Inf".to_string() } else { "-Inf".to_string() };
    }

    let repr = float_repr(value);
    match repr.find('.') {
        Some(dot) if value > 0.0 && dot > 6 => {
            let digits = format!("{}.{}{}", &repr[..1], &repr[1..dot], &repr[dot + 1..]);
            let mantissa = digits.trim_end_matches(|c| c == '0' || c == '.');
            format!("{mantissa}e+0{}", dot - 1)
        }
        _ => repr,
    }
}

/// Formats a float as its shortest round-trip representation.
///
/// Integral values keep a trailing `.0`, and values outside `[1e-4, 1e16)` use exponent
/// notation with a signed, two-digit exponent, e.g. `1e+16` or `1.5e-05`.
pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }

    let magnitude = value.abs();
    if magnitude == 0.0 || (1e-4..1e16).contains(&magnitude) {
        let mut repr = value.to_string();
        if !repr.contains('.') {
            repr.push_str(".0");
        }
        return repr;
    }

    let scientific = format!("{value:e}");
    match scientific.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent = exponent.parse::<i32>().unwrap_or_default();
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => scientific,
    }
}
