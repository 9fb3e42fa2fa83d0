#[cfg(all(test, feature = "_push-gateway-common", feature = "http-listener"))]
mod push_gateway_test {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use http_body_util::{BodyExt, Collected, Full};
    use hyper::{
        body::{Bytes, Incoming},
        header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, LOCATION},
        server::conn::http1::Builder as HyperHttpBuilder,
        service::service_fn,
        HeaderMap, Method, Request, Response, StatusCode,
    };
    use hyper_util::rt::TokioIo;
    use metrics_exposition::handler::{
        basic_auth_handler, default_handler, passthrough_redirect_handler, HandlerFuture,
        PushRequest,
    };
    #[cfg(feature = "push-gateway")]
    use metrics_exposition::handler::tls_auth_handler;
    use metrics_exposition::{
        Labels, MetricFamily, PushError, PushGateway, Registry, CONTENT_TYPE_PLAIN_0_0_4,
    };
    use tokio::net::TcpListener;

    const REDIRECT_FLAG: &str = "testFlag";
    const EXPECTED_BODY: &[u8] = b"# HELP g help\n# TYPE g gauge\ng 0.0\n";

    #[derive(Clone, Debug)]
    struct Recorded {
        method: Method,
        path: String,
        headers: HeaderMap,
        body: Bytes,
    }

    type Requests = Arc<Mutex<Vec<Recorded>>>;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .register(|| {
                let mut gauge = MetricFamily::gauge("g", "help");
                gauge.add_gauge(&[], 0.0);
                vec![gauge]
            })
            .unwrap();
        registry
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap_or_else(|e| panic!("Failed to create test runtime: {:?}", e))
    }

    fn key(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    // Accepts pushes the way a gateway would, answering 401 to unauthenticated requests for
    // `with_basic_auth` jobs and redirecting `redirect` jobs to `redirect_to`.
    async fn spawn_gateway(requests: Requests, redirect_to: Option<String>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { continue };
                let requests = Arc::clone(&requests);
                let redirect_to = redirect_to.clone();
                let service = service_fn(move |req: Request<Incoming>| {
                    let requests = Arc::clone(&requests);
                    let redirect_to = redirect_to.clone();
                    async move {
                        let response = record(req, &requests, redirect_to.as_deref()).await;
                        Ok::<_, hyper::Error>(response)
                    }
                });
                tokio::spawn(async move {
                    let _ = HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });

        address
    }

    async fn record(
        req: Request<Incoming>,
        requests: &Requests,
        redirect_to: Option<&str>,
    ) -> Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await.map(Collected::to_bytes).unwrap_or_default();
        let path = parts.uri.path().to_string();

        let authorized = parts.headers.get(AUTHORIZATION).is_some_and(|v| v == "Basic Zm9vOmJhcg==");
        let mut response = Response::new(Full::new(Bytes::new()));
        if path.contains("with_basic_auth") && !authorized {
            *response.status_mut() = StatusCode::UNAUTHORIZED;
        } else if path.contains("redirect") && !path.contains(REDIRECT_FLAG) {
            *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
            if let Some(location) = redirect_to {
                response.headers_mut().insert(LOCATION, location.parse().unwrap());
            }
        } else {
            *response.status_mut() = StatusCode::CREATED;
        }

        requests.lock().unwrap().push(Recorded {
            method: parts.method,
            path,
            headers: parts.headers,
            body,
        });
        response
    }

    fn assert_pushed(recorded: &Recorded, method: Method, path: &str) {
        assert_eq!(recorded.method, method);
        assert_eq!(recorded.path, path);
        assert_eq!(recorded.headers[CONTENT_TYPE], CONTENT_TYPE_PLAIN_0_0_4);
        if method == Method::DELETE {
            assert!(recorded.body.is_empty());
        } else {
            assert_eq!(&recorded.body[..], EXPECTED_BODY);
        }
    }

    #[test]
    fn test_push() {
        let runtime = runtime();
        runtime.block_on(async {
            let requests = Requests::default();
            let address = spawn_gateway(Arc::clone(&requests), None).await;
            let registry = registry();

            let gateway = PushGateway::new(format!("http://{address}"));
            gateway.push("my_job", &Labels::new(), &registry).await.unwrap();
            gateway.push("my_job", &key(&[("a", "9")]), &registry).await.unwrap();
            gateway.push("my_job", &key(&[("a", "")]), &registry).await.unwrap();
            gateway.push("my_job", &key(&[("a", "9"), ("b", "a/ z")]), &registry).await.unwrap();
            gateway.push("my/job", &Labels::new(), &registry).await.unwrap();

            let requests = requests.lock().unwrap();
            assert_eq!(requests.len(), 5);
            assert_pushed(&requests[0], Method::PUT, "/metrics/job/my_job");
            assert_pushed(&requests[1], Method::PUT, "/metrics/job/my_job/a/9");
            assert_pushed(&requests[2], Method::PUT, "/metrics/job/my_job/a@base64/=");
            assert_pushed(&requests[3], Method::PUT, "/metrics/job/my_job/a/9/b@base64/YS8geg==");
            assert_pushed(&requests[4], Method::PUT, "/metrics/job@base64/bXkvam9i");
        });
    }

    #[test]
    fn test_push_schemeless_url_and_trailing_slash() {
        let runtime = runtime();
        runtime.block_on(async {
            let requests = Requests::default();
            let address = spawn_gateway(Arc::clone(&requests), None).await;
            let registry = registry();

            PushGateway::new(address.to_string())
                .push("my_job", &Labels::new(), &registry)
                .await
                .unwrap();
            PushGateway::new(format!("http://{address}/"))
                .push("my_job_with_trailing_slash", &Labels::new(), &registry)
                .await
                .unwrap();

            let requests = requests.lock().unwrap();
            assert_pushed(&requests[0], Method::PUT, "/metrics/job/my_job");
            assert!(!requests[1].path.contains("//"));
        });
    }

    #[test]
    fn test_push_add_and_delete() {
        let runtime = runtime();
        runtime.block_on(async {
            let requests = Requests::default();
            let address = spawn_gateway(Arc::clone(&requests), None).await;
            let registry = registry();

            let gateway = PushGateway::new(format!("http://{address}"));
            gateway.push_add("my_job", &Labels::new(), &registry).await.unwrap();
            gateway.push_add("my_job", &key(&[("a", "9")]), &registry).await.unwrap();
            gateway.delete("my_job", &Labels::new()).await.unwrap();
            gateway.delete("my_job", &key(&[("a", "9")])).await.unwrap();

            let requests = requests.lock().unwrap();
            assert_pushed(&requests[0], Method::POST, "/metrics/job/my_job");
            assert_pushed(&requests[1], Method::POST, "/metrics/job/my_job/a/9");
            assert_pushed(&requests[2], Method::DELETE, "/metrics/job/my_job");
            assert_pushed(&requests[3], Method::DELETE, "/metrics/job/my_job/a/9");
        });
    }

    #[test]
    fn test_push_dot_segments_stay_in_their_group() {
        let runtime = runtime();
        runtime.block_on(async {
            let requests = Requests::default();
            let address = spawn_gateway(Arc::clone(&requests), None).await;
            let registry = registry();

            let gateway = PushGateway::new(format!("http://{address}"));
            gateway.push("..", &Labels::new(), &registry).await.unwrap();
            gateway.push("x", &key(&[("instance", ".")]), &registry).await.unwrap();
            gateway.delete("x", &key(&[("a", ".."), ("b", "c")])).await.unwrap();

            let requests = requests.lock().unwrap();
            assert_pushed(&requests[0], Method::PUT, "/metrics/job@base64/Li4=");
            assert_pushed(&requests[1], Method::PUT, "/metrics/job/x/instance@base64/Lg==");
            assert_pushed(&requests[2], Method::DELETE, "/metrics/job/x/a@base64/Li4=/b/c");
        });
    }

    #[test]
    fn test_push_with_handler() {
        let runtime = runtime();
        runtime.block_on(async {
            let requests = Requests::default();
            let address = spawn_gateway(Arc::clone(&requests), None).await;

            let inner = default_handler();
            let handler = Arc::new(move |mut request: PushRequest| -> HandlerFuture {
                assert_eq!(request.timeout, Duration::from_secs(30));
                request.headers.insert("x-test-header", HeaderValue::from_static("foobar"));
                inner(request)
            });

            PushGateway::new(format!("http://{address}"))
                .with_handler(handler)
                .push("my_job", &Labels::new(), &registry())
                .await
                .unwrap();

            let requests = requests.lock().unwrap();
            assert_pushed(&requests[0], Method::PUT, "/metrics/job/my_job");
            assert_eq!(requests[0].headers["x-test-header"], "foobar");
        });
    }

    #[test]
    fn test_push_with_basic_auth_handler() {
        let runtime = runtime();
        runtime.block_on(async {
            let requests = Requests::default();
            let address = spawn_gateway(Arc::clone(&requests), None).await;
            let registry = registry();

            let result = PushGateway::new(format!("http://{address}"))
                .push("my_job_with_basic_auth", &Labels::new(), &registry)
                .await;
            match result {
                Err(PushError::Status { status, .. }) => assert_eq!(status, StatusCode::UNAUTHORIZED),
                other => panic!("unexpected result: {other:?}"),
            }

            PushGateway::new(format!("http://{address}"))
                .with_handler(basic_auth_handler("foo", "bar", default_handler()))
                .push("my_job_with_basic_auth", &Labels::new(), &registry)
                .await
                .unwrap();

            let requests = requests.lock().unwrap();
            assert_pushed(&requests[1], Method::PUT, "/metrics/job/my_job_with_basic_auth");
        });
    }

    #[cfg(feature = "push-gateway")]
    #[test]
    fn test_push_with_tls_auth_handler() {
        let dir = tempfile::tempdir().unwrap();
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
        std::fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();

        let runtime = runtime();
        runtime.block_on(async {
            let requests = Requests::default();
            let address = spawn_gateway(Arc::clone(&requests), None).await;

            PushGateway::new(format!("http://{address}"))
                .with_handler(tls_auth_handler(&cert_path, &key_path).unwrap())
                .push("my_job_with_tls_auth", &Labels::new(), &registry())
                .await
                .unwrap();

            let requests = requests.lock().unwrap();
            assert_pushed(&requests[0], Method::PUT, "/metrics/job/my_job_with_tls_auth");
        });
    }

    #[test]
    fn test_push_with_redirect_handler() {
        let runtime = runtime();
        runtime.block_on(async {
            let requests = Requests::default();
            let redirect_address = spawn_gateway(Arc::clone(&requests), None).await;
            let address = spawn_gateway(
                Arc::clone(&requests),
                Some(format!("http://{redirect_address}/{REDIRECT_FLAG}")),
            )
            .await;
            let registry = registry();

            let result = PushGateway::new(format!("http://{address}"))
                .push("my_job_with_redirect", &Labels::new(), &registry)
                .await;
            match result {
                Err(PushError::Status { status, .. }) => {
                    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
                }
                other => panic!("unexpected result: {other:?}"),
            }
            requests.lock().unwrap().clear();

            PushGateway::new(format!("http://{address}"))
                .with_handler(passthrough_redirect_handler())
                .push("my_job_with_redirect", &Labels::new(), &registry)
                .await
                .unwrap();

            let requests = requests.lock().unwrap();
            assert_eq!(requests.len(), 2);
            assert_pushed(&requests[0], Method::PUT, "/metrics/job/my_job_with_redirect");
            assert_pushed(&requests[1], Method::PUT, &format!("/{REDIRECT_FLAG}"));
            assert_eq!(requests[0].body, requests[1].body);
        });
    }

    #[test]
    fn test_push_timeout() {
        let runtime = runtime();
        runtime.block_on(async {
            // Accepts connections but never answers.
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            });

            let result = PushGateway::new(format!("http://{address}"))
                .with_timeout(Duration::from_millis(200))
                .push("my_job", &Labels::new(), &registry())
                .await;
            assert!(matches!(result, Err(PushError::Timeout(_))));
        });
    }
}
