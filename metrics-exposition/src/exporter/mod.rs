//! Exporters that serve or push metrics from a [`Registry`][crate::Registry].
#[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
use std::future::Future;
#[cfg(feature = "http-listener")]
use std::net::SocketAddr;
#[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
use std::pin::Pin;
#[cfg(feature = "_push-gateway-common")]
use std::time::Duration;

#[cfg(feature = "_push-gateway-common")]
use crate::model::Labels;

/// Error types possible from an exporter.
#[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    /// The HTTP listener stopped serving.
    #[cfg(feature = "http-listener")]
    #[error("HTTP listener failed: {0}")]
    HttpListener(std::io::Error),
}

/// Convenience type for Future implementing an exporter.
#[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
pub type ExporterFuture = Pin<Box<dyn Future<Output = Result<(), ExporterError>> + Send + 'static>>;

#[derive(Clone)]
enum ExporterConfig {
    // Run an HTTP listener on the given `listen_address`.
    #[cfg(feature = "http-listener")]
    HttpListener { listen_address: SocketAddr },

    // Push the registry to `gateway` under `job` every `interval`, forever.
    #[cfg(feature = "_push-gateway-common")]
    PushGateway {
        gateway: push_gateway::PushGateway,
        job: String,
        grouping_key: Labels,
        interval: Duration,
    },

    #[allow(dead_code)]
    Unconfigured,
}

impl ExporterConfig {
    #[cfg_attr(
        not(any(feature = "http-listener", feature = "_push-gateway-common")),
        allow(dead_code)
    )]
    fn as_type_str(&self) -> &'static str {
        match self {
            #[cfg(feature = "http-listener")]
            Self::HttpListener { .. } => "http-listener",
            #[cfg(feature = "_push-gateway-common")]
            Self::PushGateway { .. } => "push-gateway",
            Self::Unconfigured => "unconfigured",
        }
    }
}

#[cfg(feature = "http-listener")]
mod http_listener;

#[cfg(feature = "_push-gateway-common")]
pub mod handler;

#[cfg(feature = "_push-gateway-common")]
pub mod push_gateway;

pub(crate) mod builder;
