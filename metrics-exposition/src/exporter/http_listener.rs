use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use http_body_util::Full;
use hyper::{
    body::{self, Bytes, Incoming},
    header::{ACCEPT, CONTENT_TYPE},
    server::conn::http1::Builder as HyperHttpBuilder,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use ipnet::IpNet;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use super::{ExporterError, ExporterFuture};
use crate::common::BuildError;
use crate::negotiation::negotiate;
use crate::registry::Registry;

struct HttpListeningExporter {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<Registry>,
    allowed_addresses: Option<Vec<IpNet>>,
}

impl HttpListeningExporter {
    async fn serve(&self, listener: std::net::TcpListener) -> Result<(), ExporterError> {
        let listener = TcpListener::from_std(listener).map_err(ExporterError::HttpListener)?;

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Error accepting connection. Ignoring request. Error: {:?}", e);
                    continue;
                }
            };

            let remote_addr = match stream.peer_addr() {
                Ok(remote_address) => remote_address.ip(),
                Err(e) => {
                    warn!("Error obtaining remote address. Ignoring request. Error: {:?}", e);
                    continue;
                }
            };

            self.process_stream(stream, remote_addr);
        }
    }

    fn process_stream(&self, stream: TcpStream, remote_address: IpAddr) {
        let inner = self.inner.clone();
        let service = service_fn(move |req: Request<body::Incoming>| {
            let inner = inner.clone();
            async move { Ok::<_, hyper::Error>(Self::handle_http_request(&inner, remote_address, &req)) }
        });

        tokio::task::spawn(async move {
            if let Err(err) =
                HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await
            {
                warn!("Error serving connection.  Error: {:?}", err);
            };
        });
    }

    fn handle_http_request(
        inner: &Inner,
        remote_address: IpAddr,
        req: &Request<Incoming>,
    ) -> Response<Full<Bytes>> {
        let is_allowed = match &inner.allowed_addresses {
            Some(addresses) => addresses.iter().any(|address| address.contains(&remote_address)),
            None => true,
        };
        if !is_allowed {
            return Self::new_response(StatusCode::FORBIDDEN, None, Bytes::new());
        }

        match req.uri().path() {
            "/health" => Self::new_response(StatusCode::OK, None, Bytes::from_static(b"OK")),
            "/favicon.ico" => Self::new_response(StatusCode::OK, None, Bytes::new()),
            _ => Self::render(inner, req),
        }
    }

    fn render(inner: &Inner, req: &Request<Incoming>) -> Response<Full<Bytes>> {
        let accept = req.headers().get(ACCEPT).and_then(|value| value.to_str().ok());
        let negotiated = negotiate(accept);

        let names = req
            .uri()
            .query()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .filter(|(key, _)| key == "name[]")
                    .map(|(_, value)| value.into_owned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let families = if names.is_empty() {
            inner.registry.gather()
        } else {
            inner.registry.gather_restricted(names)
        };
        let output = families
            .map_err(|e| e.to_string())
            .and_then(|families| negotiated.render(&families).map_err(|e| e.to_string()));

        match output {
            Ok(output) => {
                debug!(content_type = %negotiated.content_type, bytes = output.len(), "served scrape");
                Self::new_response(StatusCode::OK, Some(&negotiated.content_type), output.into())
            }
            Err(e) => {
                warn!("Error producing exposition: {}", e);
                Self::new_response(StatusCode::INTERNAL_SERVER_ERROR, None, e.into())
            }
        }
    }

    fn new_response(
        status: StatusCode,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        if let Some(value) = content_type.and_then(|value| value.parse().ok()) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }
}

/// Creates an `ExporterFuture` implementing a http listener that serves metrics from `registry`.
///
/// # Errors
/// Will return Err if it cannot bind to the listen address
pub(crate) fn new_http_listener(
    registry: Arc<Registry>,
    listen_address: SocketAddr,
    allowed_addresses: Option<Vec<IpNet>>,
) -> Result<ExporterFuture, BuildError> {
    let listener = std::net::TcpListener::bind(listen_address)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(BuildError::FailedToBind)?;

    let exporter = HttpListeningExporter { inner: Arc::new(Inner { registry, allowed_addresses }) };

    Ok(Box::pin(async move { exporter.serve(listener).await }))
}
