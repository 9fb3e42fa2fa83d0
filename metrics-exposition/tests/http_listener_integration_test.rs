#[cfg(all(test, feature = "http-listener"))]
mod http_listener_test {
    use http_body_util::{BodyExt, Collected, Empty};
    use hyper::{
        body::{Buf, Bytes},
        header::{ACCEPT, CONTENT_TYPE},
        Request, StatusCode, Uri,
    };
    use hyper_util::client::legacy::{connect::HttpConnector, Client};
    use metrics_exposition::{
        ExporterBuilder, MetricFamily, Registry, CONTENT_TYPE_PLAIN_0_0_4,
        OPENMETRICS_CONTENT_TYPE_LATEST,
    };
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn registry() -> Arc<Registry> {
        let registry = Registry::new();
        registry
            .register(|| {
                let mut gauge = MetricFamily::gauge("basic_gauge", "A basic gauge.")
                    .with_label_names(["wutang"]);
                gauge.add_gauge(&["forever"], -1.23);

                let mut counter = MetricFamily::counter("requests", "Requests handled.");
                counter.add_counter(&[], 7.0, None);

                vec![gauge, counter]
            })
            .unwrap();
        Arc::new(registry)
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap_or_else(|e| panic!("Failed to create test runtime: {:?}", e))
    }

    #[test]
    fn test_http_listener() {
        let runtime = runtime();

        runtime.block_on(async {
            let local = [127, 0, 0, 1];
            let port = get_available_port(local).await;
            let socket_address = SocketAddr::from((local, port));

            let exporter = ExporterBuilder::new(registry())
                .with_http_listener(socket_address)
                .build()
                .unwrap_or_else(|e| panic!("failed to create http listener: {:?}", e));

            runtime.spawn(exporter);
            tokio::time::sleep(Duration::from_millis(200)).await;

            let uri = format!("http://{socket_address}")
                .parse::<Uri>()
                .unwrap_or_else(|e| panic!("Error parsing URI: {:?}", e));

            let (status, body, content_type) = read_from(uri, None).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(content_type, CONTENT_TYPE_PLAIN_0_0_4);
            let body = String::from_utf8(body).unwrap();
            assert!(body.contains("# TYPE basic_gauge gauge\n"));
            assert!(body.contains("basic_gauge{wutang=\"forever\"} -1.23\n"));
            assert!(body.contains("requests_total 7.0\n"));
        });
    }

    #[test]
    fn test_http_listener_openmetrics() {
        let runtime = runtime();

        runtime.block_on(async {
            let local = [127, 0, 0, 1];
            let port = get_available_port(local).await;
            let socket_address = SocketAddr::from((local, port));

            let exporter = ExporterBuilder::new(registry())
                .with_http_listener(socket_address)
                .build()
                .unwrap_or_else(|e| panic!("failed to create http listener: {:?}", e));

            runtime.spawn(exporter);
            tokio::time::sleep(Duration::from_millis(200)).await;

            let uri = format!("http://{socket_address}/metrics")
                .parse::<Uri>()
                .unwrap_or_else(|e| panic!("Error parsing URI: {:?}", e));

            let (status, body, content_type) =
                read_from(uri, Some("application/openmetrics-text; version=1.0.0")).await;

            assert_eq!(status, StatusCode::OK);
            assert!(content_type.starts_with(OPENMETRICS_CONTENT_TYPE_LATEST));
            let body = String::from_utf8(body).unwrap();
            assert!(body.contains("# TYPE requests counter\n"));
            assert!(body.contains("requests_total 7.0\n"));
            assert!(body.ends_with("# EOF\n"));
        });
    }

    #[test]
    fn test_http_listener_name_restriction_and_health() {
        let runtime = runtime();

        runtime.block_on(async {
            let local = [127, 0, 0, 1];
            let port = get_available_port(local).await;
            let socket_address = SocketAddr::from((local, port));

            let exporter = ExporterBuilder::new(registry())
                .with_http_listener(socket_address)
                .build()
                .unwrap_or_else(|e| panic!("failed to create http listener: {:?}", e));

            runtime.spawn(exporter);
            tokio::time::sleep(Duration::from_millis(200)).await;

            let uri = format!("http://{socket_address}/metrics?name%5B%5D=requests_total")
                .parse::<Uri>()
                .unwrap_or_else(|e| panic!("Error parsing URI: {:?}", e));
            let (status, body, _) = read_from(uri, None).await;
            assert_eq!(status, StatusCode::OK);
            let body = String::from_utf8(body).unwrap();
            assert!(body.contains("requests_total 7.0\n"));
            assert!(!body.contains("basic_gauge"));

            let uri = format!("http://{socket_address}/health")
                .parse::<Uri>()
                .unwrap_or_else(|e| panic!("Error parsing URI: {:?}", e));
            let (status, body, _) = read_from(uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"OK");
        });
    }

    #[test]
    fn test_http_listener_allowlist() {
        let runtime = runtime();

        runtime.block_on(async {
            let local = [127, 0, 0, 1];
            let port = get_available_port(local).await;
            let socket_address = SocketAddr::from((local, port));

            let exporter = ExporterBuilder::new(registry())
                .with_http_listener(socket_address)
                .add_allowed_address("10.0.0.0/8")
                .and_then(ExporterBuilder::build)
                .unwrap_or_else(|e| panic!("failed to create http listener: {:?}", e));

            runtime.spawn(exporter);
            tokio::time::sleep(Duration::from_millis(200)).await;

            let uri = format!("http://{socket_address}")
                .parse::<Uri>()
                .unwrap_or_else(|e| panic!("Error parsing URI: {:?}", e));
            let (status, body, _) = read_from(uri, None).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert!(body.is_empty());
        });
    }

    async fn get_available_port(listen_address: [u8; 4]) -> u16 {
        let socket_address = SocketAddr::from((listen_address, 0));
        TcpListener::bind(socket_address)
            .await
            .unwrap_or_else(|e| {
                panic!("Unable to bind to an available port on address {socket_address}: {:?}", e);
            })
            .local_addr()
            .expect("Unable to obtain local address from TcpListener")
            .port()
    }

    async fn read_from(
        endpoint: Uri,
        accept_header: Option<&str>,
    ) -> (StatusCode, Vec<u8>, String) {
        let client =
            Client::builder(hyper_util::rt::TokioExecutor::new()).build(HttpConnector::new());

        let req = Request::builder().uri(endpoint.to_string());

        let req = if let Some(accept) = accept_header { req.header(ACCEPT, accept) } else { req };

        let req = req
            .body(Empty::<Bytes>::new())
            .unwrap_or_else(|e| panic!("Failed building request: {:?}", e));

        let response = client
            .request(req)
            .await
            .unwrap_or_else(|e| panic!("Failed requesting data from {endpoint}: {:?}", e));

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body = response
            .into_body()
            .collect()
            .await
            .map(Collected::aggregate)
            .unwrap_or_else(|e| panic!("Error reading response: {:?}", e));

        let body_bytes = body.copy_to_bytes(body.remaining()).to_vec();

        (status, body_bytes, content_type)
    }
}
