pub mod routes;
pub mod state;

use axum::Router;
use lens_core::config::AppConfig;
use lens_core::store::TransactionStore;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = state.config.server.cors;

    let mut app = Router::new()
        .merge(routes::health_routes())
        .merge(routes::metric_routes())
        .merge(routes::ask_routes())
        .merge(routes::session_routes())
        .with_state(state);

    app = app.layer(TraceLayer::new_for_http());

    // The dashboard is read-only, so a permissive policy is enough for local use.
    if cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}

/// Start the HTTP server.
pub async fn serve(config: AppConfig, store: Arc<dyn TransactionStore>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, store);
    let router = build_router(state);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use async_trait::async_trait;
    use lens_analytics::MetricAggregator;
    use lens_core::config::AssistantConfig;
    use lens_core::resolver::{QueryResolver, Resolution};
    use lens_core::session::{SessionManager, SessionState};
    use lens_core::store::{InMemoryStore, JsonFileStore};
    use lens_core::types::{QueryFilter, Segment, Transaction, TransactionStatus};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    fn tx(id: &str, corridor: &str, amount: f64, status: TransactionStatus, day: u32) -> Transaction {
        Transaction::new(
            id,
            corridor,
            amount,
            status,
            Segment::Retail,
            Utc.with_ymd_and_hms(2025, 12, day, 12, 0, 0).unwrap(),
        )
        .with_user(format!("u-{}", id))
    }

    fn sample() -> Vec<Transaction> {
        use TransactionStatus::{Completed, Failed};
        vec![
            tx("m1", "USD_MXN", 1200.0, Failed, 1),
            tx("m2", "USD_MXN", 800.0, Failed, 2),
            tx("m3", "USD_MXN", 3000.0, Failed, 2),
            tx("m4", "USD_MXN", 1000.0, Completed, 3),
            tx("c1", "USD_COP", 500.0, Completed, 1),
            tx("c2", "USD_COP", 700.0, Completed, 20),
        ]
    }

    fn test_router() -> Router {
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryStore::new(sample()));
        build_router(AppState::new(AppConfig::default(), store))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let resp = test_router().oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_corridor_metrics_endpoint() {
        let resp = test_router()
            .oneshot(get("/v1/metrics/corridors"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = body_json(resp).await;
        assert_eq!(rows[0]["corridor"], "USD_MXN");
        assert_eq!(rows[0]["failure_rate"], 0.75);
        assert_eq!(rows.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_metrics_filter_params() {
        let resp = test_router()
            .oneshot(get("/v1/metrics/trend?corridor=usd_cop&window=7d"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        // Latest day is 2025-12-20; only c2 falls in the last 7 days.
        let rows = body_json(resp).await;
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["date"], "2025-12-20");
    }

    #[tokio::test]
    async fn test_bad_window_is_400() {
        let resp = test_router()
            .oneshot(get("/v1/metrics/segments?window=90d"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_overview_contains_every_view() {
        let resp = test_router()
            .oneshot(get("/v1/metrics/overview?corridor=USD_MXN"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        for key in ["summary", "corridors", "segments", "trend", "amounts"] {
            assert!(body.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(body["summary"]["total_transactions"], 4);
    }

    #[tokio::test]
    async fn test_report_is_markdown() {
        let resp = test_router()
            .oneshot(get("/v1/metrics/report"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/markdown"));
    }

    #[tokio::test]
    async fn test_ask_opens_session_and_answers() {
        let app = test_router();
        let resp = app
            .clone()
            .oneshot(post_json(
                "/v1/ask",
                serde_json::json!({"message": "¿Cuál es el corredor con mayor tasa de fallo?"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert!(body["answer_text"].as_str().unwrap().contains("USD_MXN"));
        assert_eq!(body["trace"]["intent"], "worst_corridor");

        let session_id = body["session_id"].as_str().unwrap().to_string();
        let resp = app
            .oneshot(get(&format!("/v1/sessions/{}/messages", session_id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let messages = body_json(resp).await;
        assert_eq!(messages.as_array().unwrap().len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[tokio::test]
    async fn test_ask_empty_message_is_400() {
        let resp = test_router()
            .oneshot(post_json("/v1/ask", serde_json::json!({"message": "   "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ask_unknown_session_is_404() {
        let resp = test_router()
            .oneshot(post_json(
                "/v1/ask",
                serde_json::json!({"message": "hola", "session_id": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let app = test_router();

        let resp = app
            .clone()
            .oneshot(post_json("/v1/sessions", serde_json::json!({"name": "ops"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let id = body_json(resp).await["id"].as_str().unwrap().to_string();

        let resp = app.clone().oneshot(get("/v1/sessions")).await.unwrap();
        let list = body_json(resp).await;
        assert_eq!(list[0]["name"], "ops");
        assert_eq!(list[0]["state"], "idle");

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/v1/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .oneshot(get(&format!("/v1/sessions/{}/messages", id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_503_for_metrics() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn TransactionStore> =
            Arc::new(JsonFileStore::new(dir.path().join("missing.json")));
        let app = build_router(AppState::new(AppConfig::default(), store));

        let resp = app
            .clone()
            .oneshot(get("/v1/metrics/corridors"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        // The assistant apologizes instead of failing.
        let resp = app
            .oneshot(post_json("/v1/ask", serde_json::json!({"message": "resumen"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert!(body["answer_text"].as_str().unwrap().starts_with("Lo siento"));
        assert!(body.get("trace").is_none());
    }

    #[tokio::test]
    async fn test_ask_blank_message_registers_no_session() {
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryStore::new(sample()));
        let state = AppState::new(AppConfig::default(), store);
        let sessions = state.session_manager.clone();
        let app = build_router(state);

        let resp = app
            .oneshot(post_json("/v1/ask", serde_json::json!({"message": "  "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_asks_stay_within_session_cap() {
        let mut config = AppConfig::default();
        config.assistant.max_sessions = 2;
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryStore::new(sample()));
        let state = AppState::new(config, store);
        let sessions = state.session_manager.clone();
        let app = build_router(state);

        for _ in 0..5 {
            let resp = app
                .clone()
                .oneshot(post_json("/v1/ask", serde_json::json!({"message": "resumen"})))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(sessions.len(), 2);
    }

    /// Resolver that waits on a gate before declining to answer.
    struct GatedResolver(Arc<Notify>);

    #[async_trait]
    impl QueryResolver for GatedResolver {
        async fn resolve(
            &self,
            _question: &str,
            _context: &QueryFilter,
        ) -> lens_core::error::Result<Resolution> {
            self.0.notified().await;
            Ok(Resolution::Unresolved {
                clarification: "¿Puedes reformular?".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_ask_on_busy_session_is_409() {
        let gate = Arc::new(Notify::new());
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryStore::new(sample()));
        let manager = Arc::new(SessionManager::new(
            &AssistantConfig::default(),
            Arc::new(GatedResolver(gate.clone())),
        ));
        let state = AppState::with_sessions(
            AppConfig::default(),
            MetricAggregator::new(store),
            manager.clone(),
        );
        let app = build_router(state);

        let session = manager.create_session("ops").unwrap();
        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("primera").await })
        };
        while session.state().unwrap() != SessionState::Awaiting {
            tokio::task::yield_now().await;
        }

        let resp = app
            .oneshot(post_json(
                "/v1/ask",
                serde_json::json!({"message": "segunda", "session_id": session.id()}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        gate.notify_one();
        pending.await.unwrap().unwrap();
        assert_eq!(session.history().unwrap()[0].content, "primera");
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_generic_500() {
        let mut txs = sample();
        txs[0].amount = 0.0;
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryStore::new(txs));
        let app = build_router(AppState::new(AppConfig::default(), store));

        let resp = app
            .oneshot(get("/v1/metrics/corridors"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"Internal error");
    }
}
