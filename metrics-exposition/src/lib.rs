//! Exposes metrics in the Prometheus text and OpenMetrics exposition formats.
//!
//! Metrics are described as [`MetricFamily`] values, produced on demand by [`Collector`]s that are
//! registered in a [`Registry`]. Gathering a registry and rendering it is split into two steps:
//! [`Registry::gather`] collects the families, and the generators in [`exposition`] turn them
//! into text.
//!
//! ## Content negotiation
//!
//! Scrapers advertise the formats they understand through their `Accept` header. [`negotiate`]
//! picks one of the Prometheus text format or OpenMetrics, along with the [`EscapingScheme`] to
//! apply to names that are not valid legacy Prometheus names:
//!
//! ```
//! use metrics_exposition::{negotiate, Format, MetricFamily, Registry};
//!
//! let registry = Registry::new();
//! registry
//!     .register(|| {
//!         let mut family = MetricFamily::counter("requests", "Requests handled.");
//!         family.add_counter(&[], 42.0, None);
//!         vec![family]
//!     })
//!     .unwrap();
//!
//! let negotiated = negotiate(Some("application/openmetrics-text; version=1.0.0"));
//! assert_eq!(negotiated.format, Format::OpenMetrics);
//!
//! let output = negotiated.generate(&registry).unwrap();
//! assert!(String::from_utf8(output).unwrap().ends_with("# EOF\n"));
//! ```
//!
//! ## Exporters
//!
//! An [`ExporterBuilder`] can either expose a registry over an HTTP [scrape endpoint], or push it
//! to a Prometheus [push gateway] on an interval. The push gateway client is also usable on its
//! own through [`PushGateway`], with pluggable request [handlers](crate::handler).
//!
//! ## Features
//!
//! - `http-listener`: the HTTP scrape endpoint. Enabled by default.
//! - `push-gateway`: the push gateway client, with TLS provided by `aws-lc-rs`. Enabled by default.
//! - `push-gateway-no-tls-provider`: the push gateway client, using the process-wide `rustls`
//!   crypto provider installed by the application.
//!
//! [scrape endpoint]: https://prometheus.io/docs/instrumenting/exposition_formats/#text-based-format
//! [push gateway]: https://prometheus.io/docs/instrumenting/pushing/
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
mod common;
pub use self::common::{BuildError, ExpositionError, RegistryError, RenderError, SampleError};

#[cfg(feature = "_push-gateway-common")]
pub use self::common::PushError;

mod escaping;
pub use self::escaping::{
    escape_label_name, escape_metric_name, is_valid_legacy_label_name,
    is_valid_legacy_metric_name, unescape_name, EscapingScheme, UnknownSchemeError,
};

mod model;
pub use self::model::{
    Bucket, Exemplar, Labels, MetricFamily, MetricType, Sample, Timestamp, Value,
};

mod registry;
pub use self::registry::{default_registry, Collector, CollectorId, Families, Registry};

mod negotiation;
pub use self::negotiation::{
    negotiate, Format, Negotiated, CONTENT_TYPE_LATEST, CONTENT_TYPE_PLAIN_0_0_4,
    CONTENT_TYPE_PLAIN_1_0_0, OPENMETRICS_CONTENT_TYPE_LATEST,
};

pub mod exposition;
pub mod formatting;

mod exporter;
pub use self::exporter::builder::ExporterBuilder;

#[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
pub use self::exporter::{ExporterError, ExporterFuture};

#[cfg(feature = "_push-gateway-common")]
#[cfg_attr(docsrs, doc(cfg(feature = "push-gateway")))]
pub use self::exporter::handler;

#[cfg(feature = "_push-gateway-common")]
#[cfg_attr(docsrs, doc(cfg(feature = "push-gateway")))]
pub use self::exporter::push_gateway::{instance_ip_grouping_key, PushGateway};
