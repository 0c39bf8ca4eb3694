use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use nofly_core::{ArcGisFetcher, FeatureSource, FetchError, FetcherConfig, LayerDescriptor};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ENDPOINT: &str = "/UAV_fs/FeatureServer/3";

#[derive(Default)]
struct MockState {
    script: VecDeque<(StatusCode, Value)>,
    seen: Vec<HashMap<String, String>>,
}

type Shared = Arc<Mutex<MockState>>;

async fn query(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, axum::Json<Value>) {
    let mut state = state.lock().unwrap();
    state.seen.push(params);
    let (status, body) = state
        .script
        .pop_front()
        .unwrap_or((StatusCode::NOT_FOUND, json!({})));
    (status, axum::Json(body))
}

/// Serve a scripted feature service; returns its base URL and the shared request log.
async fn mock(script: Vec<(StatusCode, Value)>) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(MockState {
        script: script.into(),
        seen: Vec::new(),
    }));
    let app = Router::new()
        .route(&format!("{ENDPOINT}/query"), get(query))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn page(start: usize, count: usize, exceeded: bool) -> (StatusCode, Value) {
    let features: Vec<Value> = (start..start + count)
        .map(|i| {
            json!({
                "attributes": {"OBJECTID": i, "空域名稱": format!("zone {i}")},
                "geometry": {"rings": [[[121.0, 25.0], [121.1, 25.0], [121.1, 25.1], [121.0, 25.0]]]}
            })
        })
        .collect();
    (
        StatusCode::OK,
        json!({"features": features, "exceededTransferLimit": exceeded}),
    )
}

fn fetcher(base_url: String, max_retries: u32) -> ArcGisFetcher {
    ArcGisFetcher::new(FetcherConfig {
        base_url,
        page_size: 2000,
        request_timeout: Duration::from_secs(5),
        max_retries,
        retry_backoff: Duration::from_millis(1),
        accept_invalid_certs: false,
    })
    .unwrap()
}

fn layer() -> LayerDescriptor {
    LayerDescriptor::new("UAV", ENDPOINT, "uav", Some("空域名稱"))
}

fn offsets(state: &Shared) -> Vec<String> {
    state
        .lock()
        .unwrap()
        .seen
        .iter()
        .map(|p| p.get("resultOffset").cloned().unwrap_or_default())
        .collect()
}

fn object_ids(features: &[nofly_core::RawFeature]) -> Vec<u64> {
    features
        .iter()
        .map(|f| f.attributes["OBJECTID"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn pages_until_transfer_limit_clears() {
    let (base, state) = mock(vec![
        page(0, 2000, true),
        page(2000, 2000, true),
        page(4000, 437, false),
    ])
    .await;

    let features = fetcher(base, 0).fetch_layer(&layer()).await.unwrap();

    assert_eq!(features.len(), 4437);
    assert_eq!(object_ids(&features), (0..4437).collect::<Vec<u64>>());
    assert_eq!(offsets(&state), vec!["0", "2000", "4000"]);
}

#[tokio::test]
async fn sends_full_query_parameters() {
    let (base, state) = mock(vec![page(0, 1, false)]).await;

    fetcher(base, 0).fetch_layer(&layer()).await.unwrap();

    let seen = state.lock().unwrap().seen.clone();
    assert_eq!(seen.len(), 1);
    let params = &seen[0];
    assert_eq!(params["where"], "1=1");
    assert_eq!(params["outFields"], "*");
    assert_eq!(params["returnGeometry"], "true");
    assert_eq!(params["outSR"], "4326");
    assert_eq!(params["resultOffset"], "0");
    assert_eq!(params["resultRecordCount"], "2000");
    assert_eq!(params["f"], "json");
}

#[tokio::test]
async fn empty_page_with_limit_flag_terminates() {
    let (base, state) = mock(vec![page(0, 3, true), page(3, 0, true)]).await;

    let features = fetcher(base, 0).fetch_layer(&layer()).await.unwrap();

    assert_eq!(features.len(), 3);
    assert_eq!(offsets(&state), vec!["0", "3"]);
}

#[tokio::test]
async fn server_error_fails_the_layer() {
    let (base, _state) = mock(vec![
        page(0, 2000, true),
        (StatusCode::INTERNAL_SERVER_ERROR, json!({})),
    ])
    .await;

    let err = fetcher(base, 0).fetch_layer(&layer()).await.unwrap_err();

    match err {
        FetchError::Status {
            layer,
            page,
            status,
        } => {
            assert_eq!(layer, "UAV");
            assert_eq!(page, 2);
            assert_eq!(status, 500);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn retry_recovers_without_duplicates() {
    let (base, state) = mock(vec![
        page(0, 2000, true),
        (StatusCode::SERVICE_UNAVAILABLE, json!({})),
        page(2000, 5, false),
    ])
    .await;

    let features = fetcher(base, 2).fetch_layer(&layer()).await.unwrap();

    assert_eq!(features.len(), 2005);
    assert_eq!(object_ids(&features), (0..2005).collect::<Vec<u64>>());
    assert_eq!(offsets(&state), vec!["0", "2000", "2000"]);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (base, state) = mock(vec![(StatusCode::BAD_REQUEST, json!({})), page(0, 1, false)]).await;

    let err = fetcher(base, 3).fetch_layer(&layer()).await.unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 400, .. }));
    assert_eq!(state.lock().unwrap().seen.len(), 1);
}

#[tokio::test]
async fn error_body_is_reported_not_treated_as_empty() {
    let (base, _state) = mock(vec![(
        StatusCode::OK,
        json!({"error": {"code": 400, "message": "Invalid query parameters."}}),
    )])
    .await;

    let err = fetcher(base, 0).fetch_layer(&layer()).await.unwrap_err();

    match err {
        FetchError::Service { code, message, .. } => {
            assert_eq!(code, Some(400));
            assert_eq!(message, "Invalid query parameters.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (base, _state) = mock(vec![(StatusCode::OK, json!({"features": "nope"}))]).await;

    let err = fetcher(base, 0).fetch_layer(&layer()).await.unwrap_err();

    assert!(matches!(err, FetchError::Decode { .. }), "{err:?}");
}
