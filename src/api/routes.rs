//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::analysis::{
    AnalysisRequest, AnalysisWorker, Analyzer, CleanupError, SessionError, TurnDriver,
};
use crate::config::Config;
use crate::customer_db::{PostgresQueryRunner, QueryRunner, UnconfiguredRunner};
use crate::llm::{LlmClient, OpenAiClient};
use crate::optimizer::Optimizer;
use crate::suggestions::{create_suggestion_store, SuggestionStore};
use crate::tools::ToolRegistry;

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub analyzer: Analyzer,
    /// Durable suggestion cache consulted before scheduling
    pub suggestions: Arc<dyn SuggestionStore>,
    pub optimizer: Optimizer,
}

type ApiError = (StatusCode, String);

/// Wire up the production collaborators from `config`.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let llm: Arc<dyn LlmClient> = Arc::new(
        OpenAiClient::new(config.api_key.clone(), &config.llm_base_url)
            .with_request_timeout(config.llm_request_timeout),
    );

    let runner: Arc<dyn QueryRunner> = match &config.customer_database_url {
        Some(url) => Arc::new(PostgresQueryRunner::connect_lazy(url, config.max_result_rows)?),
        None => {
            tracing::warn!("CUSTOMER_DATABASE_URL not set; diagnostic queries will fail");
            Arc::new(UnconfiguredRunner)
        }
    };
    let tools = Arc::new(ToolRegistry::with_query_runner(runner));

    let suggestions = create_suggestion_store(
        config.suggestion_store,
        config.suggestion_db_path.clone(),
    )
    .await?;
    tracing::info!(
        persistent = suggestions.is_persistent(),
        "Suggestion store ready"
    );

    let driver = TurnDriver::new(
        Arc::clone(&llm),
        tools,
        config.default_model.clone(),
        config.analyzer.max_turns,
    );
    let worker = Arc::new(AnalysisWorker::new(driver, Arc::clone(&suggestions)));
    let analyzer = Analyzer::new(worker, config.analyzer.clone());
    let optimizer = Optimizer::new(llm, config.optimizer_model.clone());

    Ok(AppState {
        config,
        analyzer,
        suggestions,
        optimizer,
    })
}

/// Build the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/analyses", post(start_analysis))
        .route(
            "/api/analyses/:session_id",
            get(get_analysis).delete(delete_analysis),
        )
        .route("/api/optimize", post(optimize))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(build_state(config).await?);
    let _reaper = state.analyzer.spawn_reaper();

    let app = router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        max_concurrent_analyses: state.analyzer.max_concurrent(),
        model: state.config.default_model.clone(),
        customer_database_configured: state.config.customer_database_url.is_some(),
    })
}

/// Start a batch. Statements without a client-supplied suggestion are
/// looked up in the suggestion cache before scheduling.
async fn start_analysis(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartAnalysisRequest>,
) -> Result<Json<AnalysisSessionResponse>, ApiError> {
    if req.statements.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "statements must not be empty".to_string(),
        ));
    }
    if let Some(index) = req.statements.iter().position(|s| s.sql.trim().is_empty()) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("statement {} has empty sql", index),
        ));
    }

    let mut requests = Vec::with_capacity(req.statements.len());
    for statement in req.statements {
        let supplied = statement.suggestion.filter(|s| !s.trim().is_empty());
        let cached_suggestion = match supplied {
            Some(s) => Some(s),
            None => match state.suggestions.lookup(&statement.sql).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!("Suggestion lookup failed: {}", e);
                    None
                }
            },
        };
        requests.push(AnalysisRequest {
            sql: statement.sql,
            cached_suggestion,
        });
    }

    let handle = state
        .analyzer
        .start_batch(requests)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(AnalysisSessionResponse {
        session_id: handle.session_id,
        tasks: handle.tasks,
    }))
}

async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<AnalysisSessionResponse>, ApiError> {
    match state.analyzer.poll(&session_id).await {
        Ok(tasks) => Ok(Json(AnalysisSessionResponse { session_id, tasks })),
        Err(e @ SessionError::SessionNotFound(_)) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn delete_analysis(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<CleanupResponse>, ApiError> {
    match state.analyzer.cleanup(&session_id).await {
        Ok(()) => Ok(Json(CleanupResponse {
            session_id,
            status: "deleted".to_string(),
        })),
        Err(e @ CleanupError::NotAllComplete { .. }) => Err((StatusCode::CONFLICT, e.to_string())),
        Err(e @ CleanupError::NotFound(_)) => Err((StatusCode::NOT_FOUND, e.to_string())),
    }
}

async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, ApiError> {
    if req.sql.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "sql must not be empty".to_string()));
    }
    let rewrite = state.optimizer.optimize(&req.sql).await.map_err(|e| {
        tracing::error!("Optimize failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(OptimizeResponse {
        optimized_query: rewrite.optimized_query,
        explanation: rewrite.explanation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::{final_text, FakeRunner, ScriptedLlm, Step};
    use crate::config::AnalyzerConfig;
    use crate::suggestions::InMemorySuggestionStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state(llm: ScriptedLlm, cache: Arc<InMemorySuggestionStore>) -> (Arc<AppState>, Arc<ScriptedLlm>) {
        let llm = Arc::new(llm);
        let tools = Arc::new(ToolRegistry::with_query_runner(Arc::new(FakeRunner::default())));
        let driver = TurnDriver::new(llm.clone(), tools, "o3", 25);
        let worker = Arc::new(AnalysisWorker::new(driver, cache.clone()));
        let config = Config::new("sk-test".to_string(), "o3".to_string());
        let state = AppState {
            analyzer: Analyzer::new(worker, AnalyzerConfig::default()),
            optimizer: Optimizer::new(llm.clone(), "gpt-4o-mini"),
            suggestions: cache,
            config,
        };
        (Arc::new(state), llm)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()));
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_pool_size() {
        let (state, _) = test_state(ScriptedLlm::new(), Arc::new(InMemorySuggestionStore::new()));
        let (status, body) = send(router(state), "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["max_concurrent_analyses"], 5);
        assert_eq!(body["model"], "o3");
        assert_eq!(body["customer_database_configured"], false);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let (state, _) = test_state(ScriptedLlm::new(), Arc::new(InMemorySuggestionStore::new()));
        let (status, _) = send(
            router(state),
            "POST",
            "/api/analyses",
            Some(json!({ "statements": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn supplied_and_cached_suggestions_skip_analysis() {
        let cache = Arc::new(InMemorySuggestionStore::new());
        cache.store("SELECT 2", "from cache").await.unwrap();
        let (state, llm) = test_state(ScriptedLlm::new(), cache);

        let (status, body) = send(
            router(Arc::clone(&state)),
            "POST",
            "/api/analyses",
            Some(json!({
                "statements": [
                    { "sql": "SELECT 1", "suggestion": "from client" },
                    { "sql": "SELECT 2" }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let tasks = body["tasks"].as_array().unwrap();
        assert_eq!(tasks[0]["suggestion_text"], "from client");
        assert_eq!(tasks[1]["suggestion_text"], "from cache");
        assert!(tasks.iter().all(|t| t["status"] == "completed"));
        assert!(llm.requests().is_empty());

        let session_id = body["session_id"].as_str().unwrap().to_string();
        let uri = format!("/api/analyses/{}", session_id);
        let (status, polled) = send(router(Arc::clone(&state)), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polled["tasks"].as_array().unwrap().len(), 2);

        let (status, deleted) = send(router(Arc::clone(&state)), "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["status"], "deleted");

        let (status, _) = send(router(state), "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (state, _) = test_state(ScriptedLlm::new(), Arc::new(InMemorySuggestionStore::new()));
        let (status, _) = send(router(state), "GET", "/api/analyses/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_a_running_session_conflicts() {
        let llm = ScriptedLlm::new().script("slow_table", vec![Step::Hang]);
        let (state, _) = test_state(llm, Arc::new(InMemorySuggestionStore::new()));

        let (_, body) = send(
            router(Arc::clone(&state)),
            "POST",
            "/api/analyses",
            Some(json!({ "statements": [{ "sql": "SELECT * FROM slow_table" }] })),
        )
        .await;
        let uri = format!("/api/analyses/{}", body["session_id"].as_str().unwrap());

        let (status, message) = send(router(Arc::clone(&state)), "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(message.as_str().unwrap().contains("pending: 0"));

        let (status, _) = send(router(state), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn optimize_returns_tagged_sections() {
        let llm = ScriptedLlm::new().script(
            "FROM wide_table",
            vec![final_text(
                "<optimized_query>SELECT id FROM wide_table</optimized_query>\n<explanation>Fewer columns.</explanation>",
            )],
        );
        let (state, _) = test_state(llm, Arc::new(InMemorySuggestionStore::new()));
        let (status, body) = send(
            router(state),
            "POST",
            "/api/optimize",
            Some(json!({ "sql": "SELECT * FROM wide_table" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["optimized_query"], "SELECT id FROM wide_table");
        assert_eq!(body["explanation"], "Fewer columns.");
    }

    #[tokio::test]
    async fn optimize_model_failure_is_a_server_error() {
        let llm = ScriptedLlm::new().script("boom", vec![Step::Fail("quota exceeded".to_string())]);
        let (state, _) = test_state(llm, Arc::new(InMemorySuggestionStore::new()));
        let (status, body) = send(
            router(state),
            "POST",
            "/api/optimize",
            Some(json!({ "sql": "SELECT 'boom'" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, Value::String("quota exceeded".to_string()));
    }
}
