use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::query::MetricKind;

use axum::Router;
use ringlog::*;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;

use std::future::Future;
use std::sync::Arc;

mod api;

/// Shared by every request. Holds nothing mutable.
pub struct AppState {
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Route, metric kind and averaging flag for every endpoint.
pub const ROUTES: &[(&str, MetricKind, bool)] = &[
    ("/metrics/app/traffic", MetricKind::AppTraffic, false),
    ("/metrics/app/cpu", MetricKind::AppCpu, false),
    ("/metrics/app/memory", MetricKind::AppMemory, false),
    ("/metrics/node/latencies", MetricKind::NodeLatency, false),
    ("/metrics/node/available-memory", MetricKind::NodeAvailableMemory, false),
    ("/metrics/node/available-cpu", MetricKind::NodeAvailableCpu, false),
    ("/metrics/app/traffic/avg", MetricKind::AppTraffic, true),
    ("/metrics/app/cpu/avg", MetricKind::AppCpu, true),
    ("/metrics/app/memory/avg", MetricKind::AppMemory, true),
    ("/metrics/node/latencies/avg", MetricKind::NodeLatency, true),
    ("/metrics/node/available-memory/avg", MetricKind::NodeAvailableMemory, true),
    ("/metrics/node/available-cpu/avg", MetricKind::NodeAvailableCpu, true),
];

/// Create the router serving every metric endpoint
pub fn app(state: Arc<AppState>) -> Router {
    ROUTES
        .iter()
        .fold(Router::new(), |router, (path, kind, averaged)| {
            router.route(path, api::endpoint(*kind, *averaged))
        })
        .with_state(state)
        .layer(ServiceBuilder::new().layer(CompressionLayer::new()))
}

/// Serve HTTP until `shutdown` resolves.
pub async fn run(
    config: &Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), String> {
    let dispatcher = Dispatcher::from_config(config).map_err(|e| e.to_string())?;
    let state = Arc::new(AppState::new(dispatcher));

    let listener = TcpListener::bind(config.general().listen())
        .await
        .map_err(|e| format!("failed to bind listener: {e}"))?;

    let addr = listener
        .local_addr()
        .map_err(|e| format!("failed to get local addr: {e}"))?;

    info!("listening on: http://{addr}");
    info!("querying metrics backend at: {}", config.backend().address());

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| format!("failed to run HTTP server: {e}"))?;

    info!("HTTP server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, Reply};
    use crate::backend::QueryError;
    use crate::reshape::{Sample, SampleSet};

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn router(config: &str, backend: Arc<MockBackend>) -> Router {
        let config = Config::parse(config).unwrap();
        app(Arc::new(AppState::new(Dispatcher::new(&config, backend))))
    }

    fn sample(labels: &[(&str, &str)], value: f64) -> Sample {
        Sample::new(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            value,
        )
    }

    fn traffic() -> SampleSet {
        vec![
            sample(&[("source_app", "A"), ("destination_app", "B")], 10.0),
            sample(&[("source_app", "C"), ("destination_app", "A")], 5.0),
        ]
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn traffic_single_app() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(traffic())));

        let (status, body) = get(
            router("", backend.clone()),
            "/metrics/app/traffic?app-group=shop&app=A",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"B": 10.0, "C": 5.0}));
        assert!(backend.queries()[0].contains("app=\"A\""));
    }

    #[tokio::test]
    async fn traffic_all_apps() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(traffic())));

        let (status, body) = get(
            router("", backend.clone()),
            "/metrics/app/traffic?app-group=shop",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"A": {"B": 10.0, "C": 5.0}, "B": {"A": 10.0}, "C": {"A": 5.0}})
        );
        assert!(backend.queries()[0].contains("reporter=\"source\""));
    }

    #[tokio::test]
    async fn cpu_single_app_is_scalar() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(vec![sample(
            &[("container", "shop-cart")],
            250.0,
        )])));

        let (status, body) = get(
            router("", backend),
            "/metrics/app/cpu?app-group=shop&app=cart&range-width=1m",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(250.0));
    }

    #[tokio::test]
    async fn memory_single_app_not_found() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(vec![])));

        let (status, body) = get(
            router("", backend),
            "/metrics/app/memory?app-group=shop&app=cart",
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"status": "error", "error": "memory usage metrics for app cart not found"})
        );
    }

    #[tokio::test]
    async fn cpu_all_apps_is_map() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(vec![
            sample(&[("container", "shop-cart")], 250.0),
            sample(&[("container", "shop-web")], 80.0),
        ])));

        let (status, body) = get(router("", backend), "/metrics/app/cpu?app-group=shop").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"shop-cart": 250.0, "shop-web": 80.0}));
    }

    #[tokio::test]
    async fn all_apps_empty_is_empty_map() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(vec![])));

        let (status, body) = get(router("", backend), "/metrics/app/memory?app-group=shop").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn node_latencies() {
        let samples = vec![
            sample(&[("origin_node", "n1"), ("destination_node", "n2")], 0.5),
            sample(&[("origin_node", "n1"), ("destination_node", "n3")], 1.5),
        ];

        let backend = Arc::new(MockBackend::new(Reply::Samples(samples.clone())));
        let (status, body) = get(router("", backend), "/metrics/node/latencies?node=n1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"n2": 0.5, "n3": 1.5}));

        let backend = Arc::new(MockBackend::new(Reply::Samples(samples)));
        let (status, body) = get(router("", backend), "/metrics/node/latencies").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"n1": {"n2": 0.5, "n3": 1.5}, "n2": {"n1": 0.5}, "n3": {"n1": 1.5}})
        );
    }

    #[tokio::test]
    async fn available_memory_averaged() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(vec![sample(
            &[("node_id", "n1")],
            2048.0,
        )])));

        let (status, body) = get(
            router("", backend.clone()),
            "/metrics/node/available-memory/avg?node=n1",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(2048.0));
        assert!(backend.queries()[0].starts_with("avg_over_time(("));
        assert!(backend.queries()[0].ends_with(")[1h:5m])"));
    }

    #[tokio::test]
    async fn available_cpu_all_nodes() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(vec![
            sample(&[("node_id", "n1")], 1500.0),
            sample(&[("node_id", "n2")], 300.0),
        ])));

        let (status, body) = get(router("", backend), "/metrics/node/available-cpu").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"n1": 1500.0, "n2": 300.0}));
    }

    #[tokio::test]
    async fn backend_failure_is_500() {
        let backend = Arc::new(MockBackend::new(Reply::Error(|| {
            QueryError::Backend("bad_data: boom".to_string())
        })));

        let (status, body) = get(router("", backend.clone()), "/metrics/node/latencies").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({"status": "error", "error": "query execution failed"})
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_is_500() {
        let backend = Arc::new(MockBackend::new(Reply::Stall(std::time::Duration::from_secs(30))));

        let (status, _) = get(
            router("[backend]\ntimeout = \"50ms\"\n", backend.clone()),
            "/metrics/app/traffic?app-group=shop",
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_parameters_are_400() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(vec![])));

        let (status, body) = get(router("", backend.clone()), "/metrics/app/cpu?app=cart").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"status": "error", "error": "missing required parameter: app-group"})
        );

        let (status, _) = get(
            router("", backend.clone()),
            "/metrics/node/latencies?range-width=5m%5D",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_query_string_is_json_400() {
        let backend = Arc::new(MockBackend::new(Reply::Samples(traffic())));

        let (status, body) = get(
            router("", backend.clone()),
            "/metrics/app/traffic?app-group=shop&app=a&app=b",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid query string"));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn every_route_is_served() {
        for (path, _, _) in ROUTES {
            let backend = Arc::new(MockBackend::new(Reply::Samples(vec![])));

            let (status, _) = get(
                router("", backend.clone()),
                &format!("{path}?app-group=shop"),
            )
            .await;

            assert_eq!(status, StatusCode::OK, "{path}");
            assert_eq!(backend.calls(), 1, "{path}");
        }
    }
}
