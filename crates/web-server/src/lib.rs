use axum::{
    routing::{get, post},
    Router,
};
use configuration::Config;
use engine::Services;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer, ExposeHeaders},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;

/// The shared application state that all handlers can access.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

/// Builds the HTTP router over the given services.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any())
        .expose_headers(ExposeHeaders::any());

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/v1/indices", get(handlers::list_indices))
        .route("/api/v1/indices/:code", get(handlers::get_index).put(handlers::upsert_index))
        .route("/api/v1/indices/:code/observations", post(handlers::append_observation))
        .route("/api/v1/stats/heatmap", get(handlers::heatmap))
        .route("/api/v1/stats/distribution", get(handlers::distribution))
        .route("/api/v1/tasks/refresh", post(handlers::trigger_refresh))
        .route("/api/v1/tasks/refresh/:task_id", get(handlers::get_refresh_task))
        .with_state(state)
        .layer(cors)
        // Logs every incoming request.
        .layer(TraceLayer::new_for_http())
}

/// Bootstraps the engine, starts the background refreshes and serves until Ctrl-C.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    // Tracing is initialized by the caller.
    let services = Services::bootstrap(&config).await?;
    let scheduler = services.start_background(&config).await?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = router(Arc::new(AppState { services }));

    tracing::info!("Web server started and listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal.");
            }
        })
        .await?;

    if let Some(handle) = scheduler {
        handle.abort();
    }
    tracing::info!("Web server stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use configuration::DatabaseSettings;
    use database::DbRepository;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> (Router, Services) {
        let settings = DatabaseSettings { url: "sqlite::memory:".to_string(), max_connections: 1 };
        let pool = database::connect(&settings).await.unwrap();
        database::run_migrations(&pool).await.unwrap();
        let services = Services::from_repo(DbRepository::new(pool), &Config::default()).unwrap();
        let router = router(Arc::new(AppState { services: services.clone() }));
        (router, services)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn seed(app: &Router, code: &str, prices: &[f64]) {
        let (status, _) =
            send(app, Method::PUT, &format!("/api/v1/indices/{code}"), Some(json!({ "name": code }))).await;
        assert_eq!(status, StatusCode::OK);
        for (day, price) in prices.iter().enumerate() {
            let body = json!({ "timestamp": format!("2024-01-{:02}T00:00:00Z", day + 1), "price": price });
            let (status, _) =
                send(app, Method::POST, &format!("/api/v1/indices/{code}/observations"), Some(body)).await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    async fn refresh(app: &Router, services: &Services) {
        let (status, task) = send(app, Method::POST, "/api/v1/tasks/refresh", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(task["status"], "pending");
        let task_id = task["task_id"].as_str().unwrap();
        services.refresh.wait(task_id, Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn health_check() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn lists_first_page_sorted_by_code() {
        let (app, _) = app().await;
        for code in ["C", "A", "B"] {
            seed(&app, code, &[]).await;
        }

        let (status, body) =
            send(&app, Method::GET, "/api/v1/indices?page=1&page_size=2&sort_by=code&sort_order=asc", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["page"], 1);
        assert_eq!(body["page_size"], 2);
        let codes: Vec<&str> = body["items"].as_array().unwrap().iter().map(|i| i["code"].as_str().unwrap()).collect();
        assert_eq!(codes, vec!["A", "B"]);
        assert!(body["items"][0]["percentile_since_inception"].is_null());
    }

    #[tokio::test]
    async fn bad_requests_use_json_errors() {
        let (app, _) = app().await;

        let (status, body) = send(&app, Method::GET, "/api/v1/indices?sort_by=volume", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("volume"));

        let (status, body) = send(&app, Method::GET, "/api/v1/indices?page=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = send(&app, Method::PUT, "/api/v1/indices/A", Some(json!({ "title": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn observation_errors_map_to_status_codes() {
        let (app, _) = app().await;
        let obs = |ts: &str, price: f64| Some(json!({ "timestamp": ts, "price": price }));

        let (status, _) =
            send(&app, Method::POST, "/api/v1/indices/NOPE/observations", obs("2024-01-01T00:00:00Z", 1.0)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        seed(&app, "A", &[10.0]).await;
        let (status, body) =
            send(&app, Method::POST, "/api/v1/indices/A/observations", obs("2024-01-01T00:00:00Z", 11.0)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());

        let (status, _) =
            send(&app, Method::POST, "/api/v1/indices/A/observations", obs("2024-02-01T00:00:00Z", -1.0)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn created_observation_echoes_the_stored_timestamp() {
        let (app, _) = app().await;
        seed(&app, "A", &[]).await;
        let body = json!({ "timestamp": "2024-01-01T00:00:00.000100400Z", "price": 10.0 });

        let (status, created) = send(&app, Method::POST, "/api/v1/indices/A/observations", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let echoed: chrono::DateTime<chrono::Utc> = created["timestamp"].as_str().unwrap().parse().unwrap();
        let expected: chrono::DateTime<chrono::Utc> = "2024-01-01T00:00:00.000100Z".parse().unwrap();
        assert_eq!(echoed, expected);
    }

    #[tokio::test]
    async fn refresh_then_read_detail_heatmap_and_distribution() {
        let (app, services) = app().await;
        seed(&app, "A", &[90.0, 95.0, 100.0, 110.0, 105.0]).await;
        seed(&app, "B", &[5.0]).await;
        refresh(&app, &services).await;

        let (status, detail) = send(&app, Method::GET, "/api/v1/indices/A", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["summary"]["percentile_since_inception"], json!(80.0));
        assert_eq!(detail["high_3y"], json!(110.0));
        assert_eq!(detail["low_3y"], json!(90.0));

        let (_, detail) = send(&app, Method::GET, "/api/v1/indices/B", None).await;
        assert!(detail["summary"]["percentile_1m"].is_null());
        assert!(detail["high_3y"].is_null());

        let (status, heatmap) = send(&app, Method::GET, "/api/v1/stats/heatmap", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(heatmap["metrics"].as_array().unwrap().len(), 5);
        assert!(heatmap["cells"].as_array().unwrap().iter().all(|c| c["index_code"] == "A"));

        let (_, distribution) = send(&app, Method::GET, "/api/v1/stats/distribution", None).await;
        assert_eq!(distribution["metric"], "since_inception");
        assert_eq!(distribution["excluded"], 1);
        assert_eq!(distribution["buckets"][8]["count"], 1);
    }

    #[tokio::test]
    async fn task_status_reports_progress_and_unknown_ids_404() {
        let (app, services) = app().await;
        seed(&app, "A", &[1.0, 2.0]).await;
        refresh(&app, &services).await;

        let task_id = services.refresh.latest_task_id().unwrap();
        let (status, view) = send(&app, Method::GET, &format!("/api/v1/tasks/refresh/{task_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["status"], "succeeded");
        assert_eq!(view["progress"]["processed_count"], 1);
        assert!(view["message"].as_str().unwrap().starts_with("Refresh completed"));

        let (status, body) = send(&app, Method::GET, "/api/v1/tasks/refresh/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }
}
