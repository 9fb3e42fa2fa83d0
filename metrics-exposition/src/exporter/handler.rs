//! Pluggable request handlers for the push gateway client.
//!
//! A [`Handler`] performs a single push request and reports the final response. Handlers can be
//! wrapped to add authentication, or swapped out entirely, e.g. to route pushes through a proxy.
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use http_body_util::{BodyExt, Collected, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, AUTHORIZATION, LOCATION};
use hyper::{HeaderMap, Method, Request, StatusCode};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use once_cell::sync::OnceCell;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};
use url::Url;

use crate::common::PushError;

/// The most redirects [`passthrough_redirect_handler`] follows for a single push.
pub const MAX_REDIRECTS: usize = 10;

type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// A single request to a push gateway.
#[derive(Clone, Debug)]
pub struct PushRequest {
    /// The full target URL, including job and grouping key.
    pub url: Url,
    /// `PUT`, `POST` or `DELETE`.
    pub method: Method,
    /// How long the request may take, including reading the response.
    pub timeout: Duration,
    /// Request headers.
    pub headers: HeaderMap,
    /// The request body.
    pub body: Bytes,
}

/// The final response of a push request.
#[derive(Clone, Debug)]
pub struct PushResponse {
    /// The status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body.
    pub body: Bytes,
}

/// Future returned by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<PushResponse, PushError>> + Send>>;

/// Performs a push request.
pub type Handler = Arc<dyn Fn(PushRequest) -> HandlerFuture + Send + Sync>;

/// Creates the default handler.
///
/// The request is sent over HTTP or HTTPS, verifying servers against the platform's native root
/// certificates. Redirects are not followed, and any final status other than 2xx is an error.
pub fn default_handler() -> Handler {
    let client = Arc::new(OnceCell::new());
    Arc::new(move |request: PushRequest| -> HandlerFuture {
        let client = Arc::clone(&client);
        Box::pin(async move {
            let client = client.get_or_try_init(|| build_client(None))?.clone();
            check_status(send(&client, request).await?)
        })
    })
}

/// Wraps `inner` so that every request carries HTTP basic authentication.
pub fn basic_auth_handler(
    username: impl Into<String>,
    password: impl Into<String>,
    inner: Handler,
) -> Handler {
    let header = basic_auth(&username.into(), Some(&password.into()));
    Arc::new(move |mut request: PushRequest| -> HandlerFuture {
        request.headers.insert(AUTHORIZATION, header.clone());
        inner(request)
    })
}

/// Creates a handler that authenticates to the gateway with a TLS client certificate.
///
/// `cert_path` and `key_path` point to PEM files holding the certificate chain and its private
/// key.
///
/// ## Errors
///
/// If the files cannot be read or parsed, or if the key does not match the certificate, an error
/// is returned.
pub fn tls_auth_handler(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Handler, PushError> {
    let certs = CertificateDer::pem_file_iter(cert_path.as_ref())
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| PushError::Tls(format!("failed to load client certificate: {e}")))?;
    if certs.is_empty() {
        return Err(PushError::Tls(format!(
            "no client certificate found in {}",
            cert_path.as_ref().display()
        )));
    }
    let key = PrivateKeyDer::from_pem_file(key_path.as_ref())
        .map_err(|e| PushError::Tls(format!("failed to load client key: {e}")))?;

    let client = build_client(Some((certs, key)))?;
    Ok(Arc::new(move |request: PushRequest| -> HandlerFuture {
        let client = client.clone();
        Box::pin(async move { check_status(send(&client, request).await?) })
    }))
}

/// Creates a handler that follows redirects, replaying the method, headers and body.
///
/// At most [`MAX_REDIRECTS`] redirects are followed for a single push.
pub fn passthrough_redirect_handler() -> Handler {
    let client = Arc::new(OnceCell::new());
    Arc::new(move |request: PushRequest| -> HandlerFuture {
        let client = Arc::clone(&client);
        Box::pin(async move {
            let client = client.get_or_try_init(|| build_client(None))?.clone();
            let mut request = request;
            for _ in 0..=MAX_REDIRECTS {
                let response = send(&client, request.clone()).await?;
                let Some(location) = redirect_location(&response) else {
                    return check_status(response);
                };
                let url = request
                    .url
                    .join(location)
                    .map_err(|e| PushError::InvalidUrl(format!("bad redirect location: {e}")))?;
                debug!(status = %response.status, from = %request.url, to = %url, "following push gateway redirect");
                request.url = url;
            }
            Err(PushError::TooManyRedirects(MAX_REDIRECTS))
        })
    })
}

fn redirect_location(response: &PushResponse) -> Option<&str> {
    if !response.status.is_redirection() {
        return None;
    }
    response.headers.get(LOCATION).and_then(|location| location.to_str().ok())
}

fn check_status(response: PushResponse) -> Result<PushResponse, PushError> {
    if response.status.is_success() {
        Ok(response)
    } else {
        Err(PushError::Status {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        })
    }
}

async fn send(client: &HttpClient, request: PushRequest) -> Result<PushResponse, PushError> {
    let PushRequest { url, method, timeout, headers, body } = request;

    let mut req = Request::builder()
        .method(method)
        .uri(url.as_str())
        .body(Full::new(body))
        .map_err(|e| PushError::Request(format!("failed to build push gateway request: {e}")))?;
    req.headers_mut().extend(headers);

    let exchange = async {
        let response = client
            .request(req)
            .await
            .map_err(|e| PushError::Request(format!("error sending request to push gateway: {e}")))?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map(Collected::to_bytes)
            .map_err(|e| PushError::Request(format!("failed to read response body: {e}")))?;
        Ok::<_, PushError>(PushResponse { status: parts.status, headers: parts.headers, body })
    };

    tokio::time::timeout(timeout, exchange).await.map_err(|_| PushError::Timeout(timeout))?
}

fn build_client(
    client_auth: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
) -> Result<HttpClient, PushError> {
    let builder = ClientConfig::builder_with_provider(crypto_provider()?)
        .with_safe_default_protocol_versions()
        .map_err(|e| PushError::Tls(e.to_string()))?;
    let builder = match builder.clone().with_native_roots() {
        Ok(builder) => builder,
        Err(e) => {
            // Plain HTTP gateways stay reachable; HTTPS ones will fail verification.
            warn!(error = %e, "no native root CA certificates found");
            builder.with_root_certificates(RootCertStore::empty())
        }
    };
    let config = match client_auth {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| PushError::Tls(format!("invalid client certificate: {e}")))?,
        None => builder.with_no_client_auth(),
    };

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_http1()
        .build();
    Ok(Client::builder(TokioExecutor::new()).pool_idle_timeout(Duration::from_secs(30)).build(https))
}

fn crypto_provider() -> Result<Arc<CryptoProvider>, PushError> {
    if let Some(provider) = CryptoProvider::get_default() {
        return Ok(Arc::clone(provider));
    }

    #[cfg(feature = "push-gateway")]
    {
        Ok(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
    }
    #[cfg(not(feature = "push-gateway"))]
    {
        Err(PushError::Tls("no process-level rustls crypto provider is installed".to_string()))
    }
}

fn basic_auth(username: &str, password: Option<&str>) -> HeaderValue {
    let credentials = format!("{username}:{}", password.unwrap_or_default());
    let encoded = format!("Basic {}", BASE64_STANDARD.encode(credentials));
    // Base64 output and the "Basic " prefix are always visible ASCII.
    let mut header = HeaderValue::try_from(encoded).unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    header.set_sensitive(true);
    header
}

#[cfg(test)]
mod tests {
    use hyper::body::Bytes;
    use hyper::header::LOCATION;
    use hyper::{HeaderMap, StatusCode};

    use super::{basic_auth, check_status, redirect_location, tls_auth_handler, PushResponse};
    use crate::common::PushError;

    fn tls_error(cert: &std::path::Path, key: &std::path::Path) -> String {
        match tls_auth_handler(cert, key) {
            Err(PushError::Tls(message)) => message,
            Err(e) => panic!("unexpected error: {e:?}"),
            Ok(_) => panic!("loading {} should fail", cert.display()),
        }
    }

    fn response(status: StatusCode, location: Option<&'static str>) -> PushResponse {
        let mut headers = HeaderMap::new();
        if let Some(location) = location {
            headers.insert(LOCATION, location.parse().unwrap());
        }
        PushResponse { status, headers, body: Bytes::from_static(b"nope") }
    }

    #[test]
    #[allow(clippy::similar_names)] // reader vs header, sheesh clippy
    pub fn test_basic_auth() {
        use base64::prelude::BASE64_STANDARD;
        use base64::read::DecoderReader;
        use std::io::Read;

        const BASIC: &str = "Basic ";

        // username only
        let header = basic_auth("metrics", None);
        let reader = &header.as_ref()[BASIC.len()..];
        let mut decoder = DecoderReader::new(reader, &BASE64_STANDARD);
        let mut result = Vec::new();
        decoder.read_to_end(&mut result).unwrap();
        assert_eq!(b"metrics:", &result[..]);
        assert!(header.is_sensitive());

        // username/password
        let header = basic_auth("foo", Some("bar"));
        assert_eq!(header.to_str().unwrap(), "Basic Zm9vOmJhcg==");
        assert!(header.is_sensitive());
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(response(StatusCode::CREATED, None)).is_ok());
        assert!(check_status(response(StatusCode::ACCEPTED, None)).is_ok());

        match check_status(response(StatusCode::UNAUTHORIZED, None)) {
            Err(PushError::Status { status, body }) => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "nope");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(check_status(response(StatusCode::MOVED_PERMANENTLY, Some("/x"))).is_err());
    }

    #[test]
    fn test_tls_auth_handler_bad_material() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");
        let garbage = dir.path().join("garbage.pem");
        std::fs::write(&garbage, "this is not a certificate\n").unwrap();

        let message = tls_error(&missing, &missing);
        assert!(message.starts_with("failed to load client certificate"), "{message}");

        let message = tls_error(&garbage, &garbage);
        assert!(message.starts_with("no client certificate found"), "{message}");
    }

    #[cfg(feature = "push-gateway")]
    #[test]
    fn test_tls_auth_handler_loads_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
        std::fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();

        assert!(tls_auth_handler(&cert_path, &key_path).is_ok());

        let message = tls_error(&cert_path, &cert_path);
        assert!(message.starts_with("failed to load client key"), "{message}");
    }

    #[test]
    fn test_redirect_location() {
        let moved = response(StatusCode::MOVED_PERMANENTLY, Some("http://localhost/flag"));
        assert_eq!(redirect_location(&moved), Some("http://localhost/flag"));
        assert_eq!(redirect_location(&response(StatusCode::MOVED_PERMANENTLY, None)), None);
        assert_eq!(redirect_location(&response(StatusCode::OK, Some("/elsewhere"))), None);
    }
}
