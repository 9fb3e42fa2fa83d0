#[cfg(feature = "http-listener")]
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
#[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
use std::thread;
#[cfg(feature = "_push-gateway-common")]
use std::time::Duration;

#[cfg(feature = "http-listener")]
use ipnet::IpNet;

use crate::common::BuildError;
#[cfg(feature = "_push-gateway-common")]
use crate::exporter::handler::Handler;
#[cfg(feature = "_push-gateway-common")]
use crate::exporter::push_gateway::PushGateway;
#[cfg(feature = "_push-gateway-common")]
use crate::model::Labels;
use crate::registry::Registry;

use super::ExporterConfig;
#[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
use super::ExporterFuture;

/// Builder for creating and installing an exporter for a [`Registry`].
pub struct ExporterBuilder {
    #[cfg_attr(
        not(any(feature = "http-listener", feature = "_push-gateway-common")),
        allow(dead_code)
    )]
    registry: Arc<Registry>,
    #[cfg_attr(
        not(any(feature = "http-listener", feature = "_push-gateway-common")),
        allow(dead_code)
    )]
    exporter_config: ExporterConfig,
    #[cfg(feature = "http-listener")]
    allowed_addresses: Option<Vec<IpNet>>,
}

impl ExporterBuilder {
    /// Creates a new [`ExporterBuilder`] exporting the given registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        #[cfg(feature = "http-listener")]
        let exporter_config = ExporterConfig::HttpListener {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 9000),
        };
        #[cfg(not(feature = "http-listener"))]
        let exporter_config = ExporterConfig::Unconfigured;

        Self {
            registry,
            exporter_config,
            #[cfg(feature = "http-listener")]
            allowed_addresses: None,
        }
    }

    /// Configures the exporter to expose an HTTP listener that functions as a [scrape endpoint].
    ///
    /// The listener negotiates the exposition format with each scraper through its `Accept`
    /// header, honors `name[]` query parameters by only exposing the requested metrics, and
    /// answers `/health` with `OK`.
    ///
    /// Running in HTTP listener mode is mutually exclusive with the push gateway i.e. enabling the
    /// HTTP listener will disable the push gateway, and vise versa.
    ///
    /// Defaults to enabled, listening at `0.0.0.0:9000`.
    ///
    /// [scrape endpoint]: https://prometheus.io/docs/instrumenting/exposition_formats/#text-based-format
    #[cfg(feature = "http-listener")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http-listener")))]
    #[must_use]
    pub fn with_http_listener(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.exporter_config = ExporterConfig::HttpListener { listen_address: addr.into() };
        self
    }

    /// Configures the exporter to push the registry to a Prometheus [push gateway] every
    /// `interval`, under the given job name.
    ///
    /// Failed pushes are logged and retried at the next interval.
    ///
    /// Running in push gateway mode is mutually exclusive with the HTTP listener i.e. enabling the
    /// push gateway will disable the HTTP listener, and vise versa.
    ///
    /// Defaults to disabled.
    ///
    /// ## Errors
    ///
    /// If the given gateway and job do not form a valid URL, an error variant will be returned
    /// describing the error.
    ///
    /// [push gateway]: https://prometheus.io/docs/instrumenting/pushing/
    #[cfg(feature = "_push-gateway-common")]
    #[cfg_attr(docsrs, doc(cfg(feature = "push-gateway")))]
    pub fn with_push_gateway<T, J>(
        mut self,
        gateway: T,
        job: J,
        interval: Duration,
    ) -> Result<Self, BuildError>
    where
        T: AsRef<str>,
        J: Into<String>,
    {
        let gateway = PushGateway::new(gateway);
        let job = job.into();
        gateway
            .url(&job, &Labels::new())
            .map_err(|e| BuildError::InvalidPushGatewayEndpoint(e.to_string()))?;

        self.exporter_config =
            ExporterConfig::PushGateway { gateway, job, grouping_key: Labels::new(), interval };
        Ok(self)
    }

    /// Adds a label to the grouping key used by the push gateway.
    ///
    /// Has no effect unless the push gateway is configured.
    #[cfg(feature = "_push-gateway-common")]
    #[cfg_attr(docsrs, doc(cfg(feature = "push-gateway")))]
    #[must_use]
    pub fn add_grouping_key<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        if let ExporterConfig::PushGateway { grouping_key, .. } = &mut self.exporter_config {
            grouping_key.insert(key.into(), value.into());
        }
        self
    }

    /// Sets the handler used to send requests to the push gateway.
    ///
    /// Has no effect unless the push gateway is configured.
    #[cfg(feature = "_push-gateway-common")]
    #[cfg_attr(docsrs, doc(cfg(feature = "push-gateway")))]
    #[must_use]
    pub fn with_push_handler(mut self, handler: Handler) -> Self {
        if let ExporterConfig::PushGateway { gateway, .. } = &mut self.exporter_config {
            *gateway = gateway.clone().with_handler(handler);
        }
        self
    }

    /// Authenticates to the push gateway with a TLS client certificate.
    ///
    /// `cert_path` and `key_path` point to PEM files holding the certificate chain and its private
    /// key. Has no effect unless the push gateway is configured.
    ///
    /// ## Errors
    ///
    /// If the certificate or key cannot be loaded, an error variant will be returned describing
    /// the error.
    #[cfg(feature = "_push-gateway-common")]
    #[cfg_attr(docsrs, doc(cfg(feature = "push-gateway")))]
    pub fn with_push_tls_auth<C, K>(self, cert_path: C, key_path: K) -> Result<Self, BuildError>
    where
        C: AsRef<std::path::Path>,
        K: AsRef<std::path::Path>,
    {
        let handler = crate::exporter::handler::tls_auth_handler(cert_path, key_path)
            .map_err(|e| BuildError::InvalidTlsMaterial(e.to_string()))?;
        Ok(self.with_push_handler(handler))
    }

    /// Adds an IP address or subnet to the allowlist for the scrape endpoint.
    ///
    /// If a client makes a request to the scrape endpoint and their IP is not present in the
    /// allowlist, either directly or within any of the allowed subnets, they will receive a 403
    /// Forbidden response.
    ///
    /// Defaults to allowing all IPs.
    ///
    /// ## Security Considerations
    ///
    /// On its own, an IP allowlist is insufficient for access control, if the exporter is running
    /// in an environment alongside applications (such as web browsers) that are susceptible to [DNS
    /// rebinding](https://en.wikipedia.org/wiki/DNS_rebinding) attacks.
    ///
    /// ## Errors
    ///
    /// If the given address cannot be parsed into an IP address or subnet, an error variant will be
    /// returned describing the error.
    #[cfg(feature = "http-listener")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http-listener")))]
    pub fn add_allowed_address<A>(mut self, address: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        use std::str::FromStr;

        let address = address.as_ref();
        let address = IpNet::from_str(address)
            .or_else(|_| IpAddr::from_str(address).map(IpNet::from))
            .map_err(|e| BuildError::InvalidAllowlistAddress(e.to_string()))?;
        self.allowed_addresses.get_or_insert(vec![]).push(address);

        Ok(self)
    }

    /// Builds the exporter and spawns it.
    ///
    /// When called from within a Tokio runtime, the exporter future is spawned directly
    /// into the runtime.  Otherwise, a new single-threaded Tokio runtime is created
    /// on a background thread, and the exporter is spawned there.
    ///
    /// ## Errors
    ///
    /// If there is an error while building or spawning the exporter, an error variant will be
    /// returned describing the error.
    #[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "http-listener", feature = "push-gateway"))))]
    pub fn install(self) -> Result<(), BuildError> {
        use tokio::runtime;

        if let Ok(handle) = runtime::Handle::try_current() {
            let exporter = {
                let _g = handle.enter();
                self.build()?
            };

            handle.spawn(exporter);
        } else {
            let thread_name =
                format!("metrics-exposition-{}", self.exporter_config.as_type_str());

            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            let exporter = {
                let _g = runtime.enter();
                self.build()?
            };

            thread::Builder::new()
                .name(thread_name)
                .spawn(move || runtime.block_on(exporter))
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;
        }

        Ok(())
    }

    /// Builds the exporter and returns it.
    ///
    /// In most cases, users should prefer to use [`install`][ExporterBuilder::install] to spawn
    /// the exporter automatically. If a caller needs to schedule the exporter to run in a
    /// particular way, this method provides the flexibility to do so.
    ///
    /// ## Errors
    ///
    /// If there is an error while building the exporter, an error variant will be returned
    /// describing the error.
    #[cfg(any(feature = "http-listener", feature = "_push-gateway-common"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "http-listener", feature = "push-gateway"))))]
    #[cfg_attr(not(feature = "http-listener"), allow(unused_mut))]
    pub fn build(mut self) -> Result<ExporterFuture, BuildError> {
        #[cfg(feature = "http-listener")]
        let allowed_addresses = self.allowed_addresses.take();

        match self.exporter_config {
            ExporterConfig::Unconfigured => Err(BuildError::MissingExporter),

            #[cfg(feature = "http-listener")]
            ExporterConfig::HttpListener { listen_address } => {
                super::http_listener::new_http_listener(
                    self.registry,
                    listen_address,
                    allowed_addresses,
                )
            }

            #[cfg(feature = "_push-gateway-common")]
            ExporterConfig::PushGateway { gateway, job, grouping_key, interval } => {
                Ok(super::push_gateway::new_push_gateway(
                    gateway,
                    job,
                    grouping_key,
                    interval,
                    self.registry,
                ))
            }
        }
    }
}
