//! Content negotiation between scrapers and the text generators.
//!
//! A scraper advertises what it understands through its `Accept` header. [`negotiate`] picks the
//! wire format and escaping scheme to answer with, and the exact `Content-Type` to send back.
use crate::common::{ExpositionError, RenderError};
use crate::escaping::EscapingScheme;
use crate::exposition::{openmetrics, text};
use crate::model::MetricFamily;
use crate::registry::Registry;

/// Content type of the Prometheus text format, version 0.0.4.
pub const CONTENT_TYPE_PLAIN_0_0_4: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Content type of the Prometheus text format, version 1.0.0.
pub const CONTENT_TYPE_PLAIN_1_0_0: &str = "text/plain; version=1.0.0; charset=utf-8";

/// The latest Prometheus text content type.
pub const CONTENT_TYPE_LATEST: &str = CONTENT_TYPE_PLAIN_1_0_0;

/// The latest OpenMetrics content type.
pub const OPENMETRICS_CONTENT_TYPE_LATEST: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

const MEDIA_TYPE_OPENMETRICS: &str = "application/openmetrics-text";
const MEDIA_TYPE_PLAIN: &str = "text/plain";

/// A wire format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    /// The Prometheus text format.
    Text,
    /// The OpenMetrics text format.
    OpenMetrics,
}

/// The outcome of content negotiation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Negotiated {
    /// The wire format to answer with.
    pub format: Format,
    /// How names must be escaped.
    pub escaping: EscapingScheme,
    /// The `Content-Type` header to send back.
    pub content_type: String,
}

impl Negotiated {
    fn fallback() -> Self {
        Negotiated {
            format: Format::Text,
            escaping: EscapingScheme::Underscores,
            content_type: CONTENT_TYPE_PLAIN_0_0_4.to_string(),
        }
    }

    /// Renders `families` in the negotiated format and escaping scheme.
    ///
    /// ## Errors
    ///
    /// If any sample fails to render, an error is returned and no output is produced.
    pub fn render(&self, families: &[MetricFamily]) -> Result<String, RenderError> {
        match self.format {
            Format::Text => text::render(families, self.escaping),
            Format::OpenMetrics => openmetrics::render(families, self.escaping),
        }
    }

    /// Gathers all metrics from `registry` and renders them in the negotiated format.
    ///
    /// ## Errors
    ///
    /// If gathering fails, or if any sample fails to render, an error is returned.
    pub fn generate(&self, registry: &Registry) -> Result<Vec<u8>, ExpositionError> {
        match self.format {
            Format::Text => text::generate_latest(registry, self.escaping),
            Format::OpenMetrics => openmetrics::generate_latest(registry, self.escaping),
        }
    }
}

/// Chooses a wire format for the given `Accept` header.
///
/// The header may list several comma-separated media types; the first one that is understood
/// wins. Anything unrecognized, or no header at all, yields the Prometheus text format 0.0.4.
/// This never fails.
pub fn negotiate(accept: Option<&str>) -> Negotiated {
    let Some(accept) = accept else {
        return Negotiated::fallback();
    };

    for candidate in accept.split(',') {
        let mut parts = candidate.split(';');
        let media_type = parts.next().unwrap_or_default().trim();
        let params = parts.filter_map(parse_param).collect::<Vec<_>>();
        let param = |key: &str| params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        let versioned = param("version").is_some_and(is_at_least_1_0_0);

        if media_type.eq_ignore_ascii_case(MEDIA_TYPE_OPENMETRICS) {
            if !versioned {
                return Negotiated {
                    format: Format::OpenMetrics,
                    escaping: EscapingScheme::Underscores,
                    content_type: OPENMETRICS_CONTENT_TYPE_LATEST.to_string(),
                };
            }
            let escaping = requested_scheme(param("escaping"));
            return Negotiated {
                format: Format::OpenMetrics,
                escaping,
                content_type: format!("{OPENMETRICS_CONTENT_TYPE_LATEST}; escaping={escaping}"),
            };
        }

        if media_type.eq_ignore_ascii_case(MEDIA_TYPE_PLAIN) && versioned {
            let escaping = requested_scheme(param("escaping"));
            return Negotiated {
                format: Format::Text,
                escaping,
                content_type: format!("{CONTENT_TYPE_PLAIN_1_0_0}; escaping={escaping}"),
            };
        }
    }

    Negotiated::fallback()
}

fn parse_param(param: &str) -> Option<(String, String)> {
    let (key, value) = param.split_once('=')?;
    let value = value.trim().trim_matches('"');
    Some((key.trim().to_ascii_lowercase(), value.to_string()))
}

/// Maps an `escaping` parameter to a scheme. Only the schemes a scraper can ask for are honored.
fn requested_scheme(token: Option<&str>) -> EscapingScheme {
    match token {
        Some("allow-utf-8") => EscapingScheme::AllowUtf8,
        Some("dots") => EscapingScheme::Dots,
        _ => EscapingScheme::Underscores,
    }
}

fn is_at_least_1_0_0(version: &str) -> bool {
    let mut parsed = [0u64; 3];
    let mut parts = version.split('.');
    for slot in &mut parsed {
        match parts.next() {
            Some(part) => match part.parse() {
                Ok(number) => *slot = number,
                Err(_) => return false,
            },
            None => break,
        }
    }
    if parts.next().is_some() {
        return false;
    }
    parsed >= [1, 0, 0]
}
