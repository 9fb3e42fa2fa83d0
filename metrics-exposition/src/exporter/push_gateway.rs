//! A client for the Prometheus [push gateway].
//!
//! [push gateway]: https://github.com/prometheus/pushgateway
use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

use base64::prelude::BASE64_URL_SAFE;
use base64::Engine as _;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Method};
use tracing::{debug, error};
use url::Url;

use super::handler::{default_handler, Handler, PushRequest};
use super::ExporterFuture;
use crate::common::PushError;
use crate::escaping::EscapingScheme;
use crate::exposition::text;
use crate::model::Labels;
use crate::negotiation::CONTENT_TYPE_PLAIN_0_0_4;
use crate::registry::Registry;

/// The default timeout of a push request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pushes metrics to, or deletes metrics from, a push gateway.
#[derive(Clone)]
pub struct PushGateway {
    gateway: String,
    timeout: Duration,
    handler: Handler,
}

impl PushGateway {
    /// Creates a client for the gateway at the given address.
    ///
    /// The address may omit the scheme, in which case `http://` is assumed. Trailing slashes are
    /// removed.
    pub fn new(gateway: impl AsRef<str>) -> Self {
        let gateway = gateway.as_ref();
        let has_scheme = ["http://", "https://"].iter().any(|scheme| {
            gateway.get(..scheme.len()).is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        });
        let gateway = if has_scheme {
            gateway.to_string()
        } else {
            format!("http://{gateway}")
        };
        PushGateway {
            gateway: gateway.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            handler: default_handler(),
        }
    }

    /// Sets the timeout of each push request.
    ///
    /// Defaults to 30 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the handler that performs push requests.
    ///
    /// Defaults to [`default_handler`].
    #[must_use]
    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = handler;
        self
    }

    /// Gets the normalized gateway address.
    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    /// Builds the URL that metrics for `job` and `grouping_key` are pushed to.
    ///
    /// Grouping key values are form-encoded, except for values that cannot stand alone as a path
    /// segment (empty, `.`, `..`, or containing a slash), which are base64-encoded.
    ///
    /// ## Errors
    ///
    /// If the resulting URL is not valid, an error is returned.
    pub fn url(&self, job: &str, grouping_key: &Labels) -> Result<Url, PushError> {
        let mut url = format!("{}/metrics/", self.gateway);
        push_path_segment(&mut url, "job", job);
        for (name, value) in grouping_key {
            url.push('/');
            push_path_segment(&mut url, name, value);
        }
        Url::parse(&url).map_err(|e| PushError::InvalidUrl(format!("{url}: {e}")))
    }

    /// Replaces all metrics of the grouping key with the metrics from `registry`.
    ///
    /// This uses the `PUT` method.
    ///
    /// ## Errors
    ///
    /// If the metrics cannot be rendered or the request fails, an error is returned.
    pub async fn push(
        &self,
        job: &str,
        grouping_key: &Labels,
        registry: &Registry,
    ) -> Result<(), PushError> {
        self.send(Method::PUT, job, grouping_key, Some(registry)).await
    }

    /// Replaces metrics of the grouping key that share a name with metrics from `registry`.
    ///
    /// This uses the `POST` method.
    ///
    /// ## Errors
    ///
    /// If the metrics cannot be rendered or the request fails, an error is returned.
    pub async fn push_add(
        &self,
        job: &str,
        grouping_key: &Labels,
        registry: &Registry,
    ) -> Result<(), PushError> {
        self.send(Method::POST, job, grouping_key, Some(registry)).await
    }

    /// Deletes all metrics of the grouping key.
    ///
    /// This uses the `DELETE` method.
    ///
    /// ## Errors
    ///
    /// If the request fails, an error is returned.
    pub async fn delete(&self, job: &str, grouping_key: &Labels) -> Result<(), PushError> {
        self.send(Method::DELETE, job, grouping_key, None).await
    }

    async fn send(
        &self,
        method: Method,
        job: &str,
        grouping_key: &Labels,
        registry: Option<&Registry>,
    ) -> Result<(), PushError> {
        let url = self.url(job, grouping_key)?;
        let body = match registry {
            Some(registry) => Bytes::from(text::generate_latest(registry, EscapingScheme::Underscores)?),
            None => Bytes::new(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_PLAIN_0_0_4));

        debug!(%method, %url, bytes = body.len(), "sending request to push gateway");
        let request = PushRequest { url, method, timeout: self.timeout, headers, body };
        (self.handler)(request).await?;
        Ok(())
    }
}

fn push_path_segment(url: &mut String, name: &str, value: &str) {
    url.push_str(name);
    if value.is_empty() {
        url.push_str("@base64/=");
    } else if value == "." || value == ".." || value.contains('/') {
        url.push_str("@base64/");
        url.push_str(&BASE64_URL_SAFE.encode(value));
    } else {
        url.push('/');
        url.extend(url::form_urlencoded::byte_serialize(value.as_bytes()));
    }
}

/// Gets a grouping key with an `instance` label holding this host's IP address.
///
/// ## Errors
///
/// If no local address can be determined, an error is returned.
pub fn instance_ip_grouping_key() -> std::io::Result<Labels> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((Ipv4Addr::LOCALHOST, 0))?;
    let address = socket.local_addr()?;

    let mut labels = Labels::new();
    labels.insert("instance".to_string(), address.ip().to_string());
    Ok(labels)
}

// Creates an ExporterFuture implementing a push gateway.
pub(super) fn new_push_gateway(
    gateway: PushGateway,
    job: String,
    grouping_key: Labels,
    interval: Duration,
    registry: std::sync::Arc<Registry>,
) -> ExporterFuture {
    Box::pin(async move {
        loop {
            // Sleep for `interval` amount of time, and then do a push.
            tokio::time::sleep(interval).await;

            if let Err(e) = gateway.push(&job, &grouping_key, &registry).await {
                error!(error = %e, gateway = gateway.gateway(), %job, "failed to push metrics to push gateway");
            }
        }
    })
}
