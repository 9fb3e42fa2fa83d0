use thiserror::Error as ThisError;

use crate::model::MetricFamily;

/// Errors that could occur while turning a single sample into text.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SampleError {
    /// The value has no numeric interpretation at all.
    #[error("sample value must be a number, got {0}")]
    Type(&'static str),

    /// The value is textual and does not parse as a number.
    #[error("could not convert string to float: {0:?}")]
    Value(String),

    /// The sample does not fit the shape its family requires.
    #[error("malformed sample: {0}")]
    Shape(&'static str),
}

/// Errors that could occur while rendering metric families.
///
/// Rendering is all or nothing: when a family fails, no output is produced at all, and the
/// offending family is carried here for diagnosis.
#[derive(Debug, ThisError)]
#[error("failed to render sample `{sample}` of metric family `{}`: {source}", .family.name)]
pub struct RenderError {
    /// The name of the sample that failed to render.
    pub sample: String,
    /// Why it failed.
    #[source]
    pub source: SampleError,
    /// The family the sample belongs to.
    pub family: Box<MetricFamily>,
}

impl RenderError {
    pub(crate) fn new(sample: &str, source: SampleError, family: &MetricFamily) -> Self {
        RenderError { sample: sample.to_string(), source, family: Box::new(family.clone()) }
    }
}

/// Errors that could occur while registering collectors or gathering families.
#[derive(Debug, ThisError)]
pub enum RegistryError {
    /// Two metric families expose the same time series names.
    #[error("duplicated timeseries in registry: {}", .names.join(", "))]
    Duplicate {
        /// The colliding exposed names.
        names: Vec<String>,
        /// The family that collided with an earlier one.
        family: Box<MetricFamily>,
    },
}

/// Errors that could occur while producing a full exposition from a registry.
#[derive(Debug, ThisError)]
pub enum ExpositionError {
    /// Gathering from the registry failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Rendering the gathered families failed.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Errors that could occur while talking to a push gateway.
#[cfg(feature = "_push-gateway-common")]
#[derive(Debug, ThisError)]
pub enum PushError {
    /// The metrics could not be rendered.
    #[error("failed to produce exposition: {0}")]
    Exposition(#[from] ExpositionError),

    /// The gateway, job or grouping key produced an unusable URL.
    #[error("invalid push gateway URL: {0}")]
    InvalidUrl(String),

    /// The request could not be sent, or the response could not be read.
    #[error("push gateway request failed: {0}")]
    Request(String),

    /// The request did not complete within its timeout.
    #[error("push gateway request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The gateway answered with a non-success status.
    #[error("push gateway returned {status}: {body}")]
    Status {
        /// The final status code.
        status: hyper::StatusCode,
        /// The response body, lossily decoded.
        body: String,
    },

    /// The TLS client configuration could not be built.
    #[error("invalid TLS configuration: {0}")]
    Tls(String),

    /// The gateway kept redirecting.
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),
}

/// Errors that could occur while building or installing an exporter.
#[derive(Debug, ThisError)]
pub enum BuildError {
    /// The push gateway endpoint could not be used.
    #[error("push gateway endpoint is not valid: {0}")]
    InvalidPushGatewayEndpoint(String),

    /// The given allowlist address could not be parsed.
    #[error("failed to parse address as a valid IP address/subnet: {0}")]
    InvalidAllowlistAddress(String),

    /// The TLS material for the push gateway could not be loaded.
    #[error("failed to load TLS material: {0}")]
    InvalidTlsMaterial(String),

    /// The builder was not given anything to export to.
    #[error("no exporter configured: set an HTTP listener or a push gateway")]
    MissingExporter,

    /// Binding to the listen address failed.
    #[error("failed to bind to given listen address: {0}")]
    FailedToBind(std::io::Error),

    /// Creating the background runtime did not succeed.
    #[error("failed to spawn Tokio runtime for exporter: {0}")]
    FailedToCreateRuntime(String),
}
