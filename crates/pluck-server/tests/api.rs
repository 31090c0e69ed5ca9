//! Router-level tests: every endpoint driven through `tower::ServiceExt`
//! with an in-memory store and a canned fetcher.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use assert_json_diff::assert_json_include;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use pluck::MemoryMappingStore;
use pluck_server::config::ServerConfig;
use pluck_server::error::{ServiceError, ServiceResult};
use pluck_server::events::{EventBus, PluckEvent};
use pluck_server::fetcher::{FetchedPage, PageFetcher};
use pluck_server::rate_limit::RateLimiter;
use pluck_server::rest::{router, AppState};
use pluck_server::service::PluckService;
use serde_json::{json, Value};
use tower::ServiceExt;
use url::Url;

// ─────────────────────── fixtures ───────────────────────

const WIDGET_URL: &str = "https://shop.example.com/products/widget";
const BENCH_URL: &str = "https://shop.example.com/products/bench";
const LIST_URL: &str = "https://shop.example.com/sale/all";
const SLOW_URL: &str = "https://slow.example.com/item";

const WIDGET: &str = r#"<html><head>
<script type="application/ld+json">{"@type":"Product","name":"Widget","offers":{"price":"19.99","priceCurrency":"USD"}}</script>
</head><body><h1>Something else</h1></body></html>"#;

const BENCH: &str = r#"<html><head><title>Bench</title></head><body>
<div class="pdp"><h2>Teak Bench</h2><i class="amt">$310</i></div></body></html>"#;

const LIST: &str = r#"<html><body><ul class="items">
<li><span class="n">One</span><span class="p">$1</span></li>
<li><span class="n">Two</span><span class="p">$2</span></li>
<li><span class="n">Three</span><span class="p">$3</span></li>
</ul></body></html>"#;

/// Serves canned pages; anything unknown is an upstream 404.
struct CannedFetcher {
    pages: HashMap<&'static str, &'static str>,
}

#[async_trait]
impl PageFetcher for CannedFetcher {
    async fn fetch(&self, url: &Url) -> ServiceResult<FetchedPage> {
        if url.as_str() == SLOW_URL {
            return Err(ServiceError::FetchTimeout(12_000));
        }
        match self.pages.get(url.as_str()) {
            Some(body) => Ok(FetchedPage {
                url: url.clone(),
                final_url: url.clone(),
                status: 200,
                body: body.to_string(),
            }),
            None => Err(ServiceError::UpstreamStatus(404)),
        }
    }
}

struct Harness {
    app: Router,
    events: EventBus,
}

fn harness(token: Option<&str>, rate_limit: u32) -> Harness {
    let config = ServerConfig {
        api_token: token.map(str::to_string),
        ..ServerConfig::default()
    };
    let fetcher = CannedFetcher {
        pages: HashMap::from([(WIDGET_URL, WIDGET), (BENCH_URL, BENCH), (LIST_URL, LIST)]),
    };
    let events = EventBus::new(64);
    let service = PluckService::new(
        config,
        Arc::new(MemoryMappingStore::new()),
        Arc::new(fetcher),
        events.clone(),
    );
    let limiter = RateLimiter::new(rate_limit, Duration::from_secs(60));
    let state = AppState::new(Arc::new(service), Arc::new(limiter));
    Harness {
        app: router(Arc::new(state)),
        events,
    }
}

fn app() -> Router {
    harness(None, 0).app
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn bench_selectors() -> Value {
    json!({"title": "div.pdp h2", "price": "div.pdp .amt"})
}

// ─────────────────────── extraction ───────────────────────

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_extract_widget_end_to_end() {
    let (status, body) = send(&app(), post("/api/v1/extract", json!({"url": WIDGET_URL}), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_json_include!(
        actual: body.clone(),
        expected: json!({
            "success": true,
            "suggestTeaching": false,
            "strategiesAttempted": ["structured-data"],
            "product": {
                "source": "structured-data",
                "confidence": 0.95,
                "title": "Widget",
                "price": 19.99,
                "currency": "USD",
                "url": WIDGET_URL
            }
        })
    );
    assert!(body.get("html").is_none());
    assert!(body.get("mappingId").is_none());
}

#[tokio::test]
async fn test_extract_rejects_private_address() {
    let (status, body) = send(
        &app(),
        post("/api/v1/extract", json!({"url": "http://169.254.169.254/latest/meta-data"}), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "E_INVALID_INPUT");
}

#[tokio::test]
async fn test_extract_rejects_unparseable_and_missing_url() {
    let (status, _) = send(&app(), post("/api/v1/extract", json!({"url": "not a url"}), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = send(&app(), post("/api/v1/extract", json!({}), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "E_INVALID_INPUT");
}

#[tokio::test]
async fn test_fetch_failures_map_to_gateway_errors() {
    let (status, body) = send(
        &app(),
        post("/api/v1/extract", json!({"url": "https://shop.example.com/missing"}), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "E_FETCH_FAILED");

    let (status, body) = send(&app(), post("/api/v1/extract", json!({"url": SLOW_URL}), None)).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "E_FETCH_TIMEOUT");
}

#[tokio::test]
async fn test_unmapped_page_without_signals_suggests_teaching() {
    let (status, body) = send(&app(), post("/api/v1/extract", json!({"url": LIST_URL}), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["suggestTeaching"], true);
    if body["success"] == false {
        assert!(body["html"].as_str().unwrap().contains("class=\"items\""));
    }
}

// ─────────────────────── mappings ───────────────────────

#[tokio::test]
async fn test_submit_requires_identity() {
    let req = post(
        "/api/v1/mappings",
        json!({"domain": "shop.example.com", "selectors": bench_selectors()}),
        None,
    );
    let (status, body) = send(&app(), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "E_UNAUTHORIZED");
}

#[tokio::test]
async fn test_submit_with_token_configured() {
    let h = harness(Some("s3cret"), 0);
    let submission = json!({"domain": "shop.example.com", "selectors": bench_selectors()});

    let (status, _) = send(&h.app, post("/api/v1/mappings", submission.clone(), Some("alice"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut req = post("/api/v1/mappings", submission, Some("alice"));
    req.headers_mut()
        .insert("authorization", "Bearer s3cret".parse().unwrap());
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_submit_creates_then_updates() {
    let app = app();
    let submission = json!({
        "domain": "www.Shop.Example.com",
        "pathPattern": "/products/*",
        "selectors": bench_selectors()
    });
    let (status, first) = send(&app, post("/api/v1/mappings", submission.clone(), Some("alice"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "created");
    assert_eq!(first["mapping"]["domain"], "shop.example.com");
    assert_eq!(first["mapping"]["confidence"], 0.5);
    assert_eq!(first["mapping"]["createdBy"], "alice");

    let (status, second) = send(&app, post("/api/v1/mappings", submission, Some("bob"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "updated");
    assert_eq!(second["mapping"]["id"], first["mapping"]["id"]);
    assert_eq!(second["mapping"]["createdBy"], "bob");
}

#[tokio::test]
async fn test_submit_validation_is_400_not_401() {
    let app = app();
    let cases = [
        json!({"domain": "https://shop.example.com", "selectors": bench_selectors()}),
        json!({"domain": "shop.example.com/products", "selectors": bench_selectors()}),
        json!({"domain": "shop.example.com", "selectors": {}}),
        json!({"domain": "shop.example.com", "selectors": {"title": ""}}),
        json!({"domain": "shop.example.com", "selectors": {"title": []}}),
        json!({"domain": "shop.example.com", "selectors": {"colour": "span"}}),
        json!({"domain": "shop.example.com", "selectors": {"title": 7}}),
    ];
    for case in cases {
        let (status, body) = send(&app, post("/api/v1/mappings", case.clone(), Some("alice"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{case}");
        assert_eq!(body["error"]["code"], "E_INVALID_INPUT", "{case}");
    }
}

#[tokio::test]
async fn test_taught_mapping_drives_extraction_and_votes() {
    let app = app();
    let (_, created) = send(
        &app,
        post(
            "/api/v1/mappings",
            json!({"domain": "shop.example.com", "pathPattern": "/products/*", "selectors": bench_selectors()}),
            Some("alice"),
        ),
    )
    .await;
    let id = created["mapping"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, post("/api/v1/extract", json!({"url": BENCH_URL}), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["product"]["source"], "site-mapping");
    assert_eq!(body["product"]["title"], "Teak Bench");
    assert_eq!(body["product"]["price"], 310.0);
    assert_eq!(body["mappingId"], id.as_str());
    assert_eq!(body["suggestTeaching"], false);

    let (status, voted) = send(
        &app,
        post(&format!("/api/v1/mappings/{id}/vote"), json!({"vote": "up"}), Some("bob")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(voted["mapping"]["upvotes"], 2);
    let after_up = voted["mapping"]["confidence"].as_f64().unwrap();
    assert!((after_up - pluck::wilson_lower_bound(2, 0)).abs() < 1e-12);

    let (_, voted) = send(
        &app,
        post(&format!("/api/v1/mappings/{id}/vote"), json!({"vote": "down"}), Some("carol")),
    )
    .await;
    assert!(voted["mapping"]["confidence"].as_f64().unwrap() < after_up);

    let (status, listed) = send(&app, get("/api/v1/mappings?domain=www.shop.example.com")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["domain"], "shop.example.com");
    assert_eq!(listed["mappings"].as_array().unwrap().len(), 1);
    assert_eq!(listed["mappings"][0]["downvotes"], 1);
}

#[tokio::test]
async fn test_vote_errors() {
    let app = app();
    let (status, _) = send(
        &app,
        post("/api/v1/mappings/not-a-uuid/vote", json!({"vote": "up"}), Some("a")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = uuid::Uuid::new_v4();
    let (status, body) = send(
        &app,
        post(&format!("/api/v1/mappings/{unknown}/vote"), json!({"vote": "up"}), Some("a")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "E_NOT_FOUND");

    let (status, _) = send(
        &app,
        post(&format!("/api/v1/mappings/{unknown}/vote"), json!({"vote": "sideways"}), Some("a")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        post(&format!("/api/v1/mappings/{unknown}/vote"), json!({"vote": "up"}), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_requires_domain() {
    let (status, _) = send(&app(), get("/api/v1/mappings")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = send(&app(), get("/api/v1/mappings?domain=nobody.example")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mappings"], json!([]));
}

#[tokio::test]
async fn test_catalog_mapping_returns_rows() {
    let app = app();
    let (status, _) = send(
        &app,
        post(
            "/api/v1/mappings",
            json!({
                "domain": "shop.example.com",
                "pathPattern": "/sale/*",
                "selectors": {"row": "ul.items > li", "title": "span.n", "price": "span.p"}
            }),
            Some("alice"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = send(&app, post("/api/v1/extract", json!({"url": LIST_URL}), None)).await;
    let rows = body["catalog"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["title"], "Three");
    assert_eq!(rows[2]["price"], 3.0);
}

// ─────────────────────── sandbox, limits, events ───────────────────────

#[tokio::test]
async fn test_sandbox_injects_base() {
    let resp = app()
        .oneshot(get(&format!("/api/v1/sandbox?url={BENCH_URL}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains(&format!(r#"<base href="{BENCH_URL}">"#)));

    let (status, _) = send(&app(), get("/api/v1/sandbox")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limit_applies_without_peer_info() {
    let h = harness(None, 2);
    for _ in 0..2 {
        let (status, _) = send(&h.app, get("/api/v1/mappings?domain=shop.example.com")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let resp = h
        .app
        .clone()
        .oneshot(get("/api/v1/mappings?domain=shop.example.com"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));

    // Health is outside the limiter.
    let (status, _) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rotating_identity_headers_share_one_bucket() {
    let h = harness(None, 2);
    let peer: SocketAddr = "198.51.100.7:41000".parse().unwrap();
    let mut statuses = Vec::new();
    for i in 0..4 {
        let mut req = Request::builder()
            .uri("/api/v1/mappings?domain=shop.example.com")
            .header("x-user-id", format!("user-{i}"))
            .header("x-forwarded-for", format!("10.0.0.{i}"))
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        statuses.push(h.app.clone().oneshot(req).await.unwrap().status());
    }
    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );
}

#[tokio::test]
async fn test_events_emitted_for_extraction_and_failures() {
    let h = harness(None, 0);
    let mut rx = h.events.subscribe();

    send(&h.app, post("/api/v1/extract", json!({"url": WIDGET_URL}), None)).await;
    match rx.recv().await.unwrap() {
        PluckEvent::ExtractionCompleted { domain, source, .. } => {
            assert_eq!(domain, "shop.example.com");
            assert_eq!(source, "structured-data");
        }
        other => panic!("unexpected event {other:?}"),
    }

    send(&h.app, post("/api/v1/extract", json!({"url": "ftp://shop.example.com/x"}), None)).await;
    assert!(matches!(
        rx.recv().await.unwrap(),
        PluckEvent::ExtractionFailed { domain: None, .. }
    ));
}
