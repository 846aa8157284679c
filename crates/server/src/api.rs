//! JSON API for agent runs and their progress lines.
//!
//! - `POST /api/v1/agent/orders`                 run one instruction to completion
//! - `GET  /api/v1/runs/{run_id}/progress`        every line of a run, oldest first
//! - `GET  /api/v1/runs/{run_id}/progress/latest` most recent line of a run
//! - `GET  /api/v1/progress/latest?since=`        caller's most recent line in a window
//!
//! Every route expects `Authorization: Bearer <token>`. Progress routes only
//! answer for runs started by the calling user; anything else is a 404.
//!
//! Failures go through `ApplicationError -> InterfaceError`, which decides the
//! status code.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use orderly_agent::{AgentRuntime, CallerVerifier, RunRequest, RunResponse};
use orderly_core::domain::account::UserId;
use orderly_core::domain::progress::{ProgressEntry, RunId};
use orderly_core::errors::{ApplicationError, InterfaceError};
use orderly_db::repositories::{ProgressRepository, RepositoryError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Window used by `/api/v1/progress/latest` when `since` is omitted.
const DEFAULT_PROGRESS_WINDOW_MINUTES: i64 = 15;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<AgentRuntime>,
    pub verifier: Arc<dyn CallerVerifier>,
    pub progress: Arc<dyn ProgressRepository>,
    /// Parent of every run's cancellation token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub prompt: String,
    pub account_id: String,
    pub run_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LatestProgressQuery {
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub error_class: &'static str,
    /// Caller-safe summary of `error_class`.
    pub message: &'static str,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/agent/orders", post(create_order))
        .route("/api/v1/runs/{run_id}/progress", get(list_run_progress))
        .route("/api/v1/runs/{run_id}/progress/latest", get(latest_run_progress))
        .route("/api/v1/progress/latest", get(latest_caller_progress))
        .with_state(state)
}

async fn create_order(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderBody>,
) -> (StatusCode, Json<RunResponse>) {
    let request = RunRequest {
        prompt: body.prompt,
        account_id: body.account_id,
        caller_token: bearer_token(&headers).unwrap_or_default().to_string(),
        run_id: body
            .run_id
            .map(|run_id| run_id.trim().to_string())
            .filter(|run_id| !run_id.is_empty())
            .map(RunId),
    };

    let (status, response) = match state.runtime.execute(request, state.shutdown.child_token()).await {
        Ok(response) => (StatusCode::OK, response),
        Err(failure) => {
            let interface =
                ApplicationError::from(failure.error).into_interface(failure.response.run_id.0.clone());
            (status_for(&interface), failure.response)
        }
    };
    info!(
        event_name = "api.agent.order_run",
        correlation_id = %response.run_id,
        status = status.as_u16(),
        "agent order run answered"
    );
    (status, Json(response))
}

async fn list_run_progress(
    Path(run_id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Vec<ProgressEntry>> {
    let run_id = RunId(run_id);
    let user_id = authenticate(&state, &headers, &run_id.0).await?;

    let mut entries =
        state.progress.list_for_run(&run_id).await.map_err(|source| store_error(source, &run_id.0))?;
    entries.retain(|entry| entry.user_id == user_id);
    if entries.is_empty() {
        return Err(not_found(format!("no progress recorded for run `{run_id}`"), &run_id.0));
    }
    Ok(Json(entries))
}

async fn latest_run_progress(
    Path(run_id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<ProgressEntry> {
    let run_id = RunId(run_id);
    let user_id = authenticate(&state, &headers, &run_id.0).await?;

    match state.progress.latest_for_run(&run_id).await.map_err(|source| store_error(source, &run_id.0))? {
        Some(entry) if entry.user_id == user_id => Ok(Json(entry)),
        _ => Err(not_found(format!("no progress recorded for run `{run_id}`"), &run_id.0)),
    }
}

async fn latest_caller_progress(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<LatestProgressQuery>,
) -> ApiResult<ProgressEntry> {
    let correlation_id = RunId::generate().0;
    let user_id = authenticate(&state, &headers, &correlation_id).await?;
    let since = query
        .since
        .unwrap_or_else(|| Utc::now() - Duration::minutes(DEFAULT_PROGRESS_WINDOW_MINUTES));

    match state
        .progress
        .latest_for_user_since(&user_id, since)
        .await
        .map_err(|source| store_error(source, &correlation_id))?
    {
        Some(entry) => Ok(Json(entry)),
        None => Err(not_found(
            format!("no progress recorded since {}", since.to_rfc3339()),
            &correlation_id,
        )),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn authenticate(
    state: &ApiState,
    headers: &HeaderMap,
    correlation_id: &str,
) -> Result<UserId, (StatusCode, Json<ApiError>)> {
    let token = bearer_token(headers).unwrap_or_default();
    state
        .verifier
        .verify(token)
        .await
        .map_err(|error| error_response(ApplicationError::from(error), correlation_id))
}

fn not_found(message: String, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    error_response(ApplicationError::NotFound(message), correlation_id)
}

fn store_error(source: RepositoryError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    error!(
        event_name = "api.progress.store_error",
        correlation_id,
        error = %source,
        "progress query failed"
    );
    error_response(ApplicationError::Persistence(source.to_string()), correlation_id)
}

fn error_response(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id);
    let body = ApiError {
        error: interface.to_string(),
        error_class: interface_class(&interface),
        message: interface.user_message(),
        correlation_id: interface.correlation_id().to_string(),
    };
    (status_for(&interface), Json(body))
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn interface_class(error: &InterfaceError) -> &'static str {
    match error {
        InterfaceError::BadRequest { .. } => "bad_request",
        InterfaceError::Unauthorized { .. } => "unauthorized",
        InterfaceError::NotFound { .. } => "not_found",
        InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
        InterfaceError::Internal { .. } => "internal",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        extract::{Path, Query, State},
        http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Request, StatusCode},
        Json,
    };
    use chrono::{Duration, Utc};
    use orderly_agent::{
        ActionRequest, AgentRuntime, Message, ScriptedDecisionStep, StaticTokenVerifier,
    };
    use orderly_core::config::{AppConfig, CallerCredential};
    use orderly_core::domain::account::UserId;
    use orderly_core::domain::progress::{ProgressEntry, RunId};
    use orderly_db::repositories::{ProgressRepository, SqlProgressRepository};
    use orderly_db::{connect_with_settings, migrations, DbPool, DemoSeedDataset};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;

    const TOKEN: &str = "token-ops-1";
    const OTHER_TOKEN: &str = "token-audit-1";

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoSeedDataset::load(&pool).await.expect("seed");
        pool
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.callers = vec![
            CallerCredential { token: TOKEN.to_string().into(), user_id: "user-ops".to_string() },
            CallerCredential {
                token: OTHER_TOKEN.to_string().into(),
                user_id: "user-audit".to_string(),
            },
        ];
        config
    }

    fn state(pool: DbPool, script: Vec<Message>) -> ApiState {
        let config = config();
        let runtime = AgentRuntime::with_decision(
            &config,
            pool.clone(),
            Arc::new(ScriptedDecisionStep::new(script)),
        );
        ApiState {
            runtime: Arc::new(runtime),
            verifier: Arc::new(StaticTokenVerifier::from_config(&config.auth)),
            progress: Arc::new(SqlProgressRepository::new(pool)),
            shutdown: CancellationToken::new(),
        }
    }

    fn authorized() -> HeaderMap {
        bearer("Bearer token-ops-1")
    }

    fn bearer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    fn order_script() -> Vec<Message> {
        vec![
            Message::assistant_with_actions(
                "",
                vec![ActionRequest {
                    id: "call-1".to_string(),
                    name: "resolve_company".to_string(),
                    arguments: json!({"companyName": "Luxe Beauty Gallery"}),
                }],
            ),
            Message::assistant_with_actions(
                "",
                vec![ActionRequest {
                    id: "call-2".to_string(),
                    name: "create_order".to_string(),
                    arguments: json!({
                        "companyId": "co-luxe-001",
                        "items": [{"productId": "prod-sk001", "quantity": 300}]
                    }),
                }],
            ),
            Message::assistant("Order ORD-00001 created."),
        ]
    }

    #[tokio::test]
    async fn create_order_returns_ok_with_order_details() {
        let pool = pool().await;

        let (status, Json(response)) = create_order(
            State(state(pool.clone(), order_script())),
            authorized(),
            Json(CreateOrderBody {
                prompt: "Order 300 units of SK001 for Luxe Beauty Gallery".to_string(),
                account_id: "acct-demo".to_string(),
                run_id: Some("run-http-1".to_string()),
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert_eq!(response.run_id, RunId("run-http-1".to_string()));
        assert_eq!(response.order_number.map(|number| number.0), Some("ORD-00001".to_string()));

        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items")
            .fetch_one(&pool)
            .await
            .expect("count items");
        assert_eq!(items, 1);
    }

    #[tokio::test]
    async fn rejected_instruction_is_unprocessable() {
        let pool = pool().await;

        let (status, Json(response)) = create_order(
            State(state(pool, order_script())),
            authorized(),
            Json(CreateOrderBody {
                prompt: "   ".to_string(),
                account_id: "acct-demo".to_string(),
                run_id: None,
            }),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!response.success);
        assert_eq!(response.error_class.as_deref(), Some("precondition"));
    }

    #[tokio::test]
    async fn model_endpoint_failure_is_service_unavailable() {
        let pool = pool().await;

        let (status, Json(response)) = create_order(
            State(state(pool, Vec::new())),
            authorized(),
            Json(CreateOrderBody {
                prompt: "Order something".to_string(),
                account_id: "acct-demo".to_string(),
                run_id: None,
            }),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.success);
        assert_eq!(response.error_class.as_deref(), Some("decision"));
    }

    #[tokio::test]
    async fn create_order_without_bearer_is_unauthorized() {
        let pool = pool().await;
        let app = router(state(pool, order_script()));

        let response = app
            .oneshot(
                Request::post("/api/v1/agent/orders")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"prompt": "Order 1 Serum", "account_id": "acct-demo"}).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), 64 * 1024).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error_class"], "unauthorized");
    }

    #[tokio::test]
    async fn run_progress_routes_list_and_pick_latest() {
        let pool = pool().await;
        let state = state(pool, order_script());
        create_order(
            State(state.clone()),
            authorized(),
            Json(CreateOrderBody {
                prompt: "Order 300 units of SK001 for Luxe Beauty Gallery".to_string(),
                account_id: "acct-demo".to_string(),
                run_id: Some("run-http-2".to_string()),
            }),
        )
        .await;

        let Json(entries) = list_run_progress(
            Path("run-http-2".to_string()),
            State(state.clone()),
            authorized(),
        )
        .await
        .expect("list");
        let Json(latest) =
            latest_run_progress(Path("run-http-2".to_string()), State(state), authorized())
                .await
                .expect("latest");

        assert_eq!(entries.first().map(|entry| entry.content.as_str()), Some("Resolving the customer"));
        assert_eq!(latest.content, "Order ORD-00001 created");
    }

    #[tokio::test]
    async fn run_progress_is_hidden_from_other_callers() {
        let pool = pool().await;
        let state = state(pool, order_script());
        create_order(
            State(state.clone()),
            authorized(),
            Json(CreateOrderBody {
                prompt: "Order 300 units of SK001 for Luxe Beauty Gallery".to_string(),
                account_id: "acct-demo".to_string(),
                run_id: Some("run-http-3".to_string()),
            }),
        )
        .await;

        let listed = list_run_progress(
            Path("run-http-3".to_string()),
            State(state.clone()),
            bearer("Bearer token-audit-1"),
        )
        .await;
        let latest = latest_run_progress(
            Path("run-http-3".to_string()),
            State(state.clone()),
            bearer("Bearer token-audit-1"),
        )
        .await;

        let (status, Json(error)) = listed.expect_err("foreign run");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error.correlation_id, "run-http-3");
        assert_eq!(latest.expect_err("foreign run").0, StatusCode::NOT_FOUND);

        let Json(own) =
            list_run_progress(Path("run-http-3".to_string()), State(state), authorized())
                .await
                .expect("owner still sees the run");
        assert!(own.iter().all(|entry| entry.user_id == UserId("user-ops".to_string())));
    }

    #[tokio::test]
    async fn latest_run_progress_is_not_found_for_unknown_runs() {
        let pool = pool().await;

        let result =
            latest_run_progress(Path("run-missing".to_string()), State(state(pool, Vec::new())), authorized())
                .await;

        let (status, _) = result.expect_err("no entries");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn latest_caller_progress_respects_since_window() {
        let pool = pool().await;
        let state = state(pool, Vec::new());
        let mut old = ProgressEntry::new(
            RunId("run-old".to_string()),
            UserId("user-ops".to_string()),
            "Finished",
        );
        old.created_at = Utc::now() - Duration::hours(2);
        state.progress.append(old).await.expect("append");

        let default_window =
            latest_caller_progress(State(state.clone()), authorized(), Query(LatestProgressQuery::default()))
                .await;
        let Json(wide) = latest_caller_progress(
            State(state),
            authorized(),
            Query(LatestProgressQuery { since: Some(Utc::now() - Duration::hours(3)) }),
        )
        .await
        .expect("entry inside the window");

        assert_eq!(default_window.expect_err("outside default window").0, StatusCode::NOT_FOUND);
        assert_eq!(wide.run_id, RunId("run-old".to_string()));
    }

    #[tokio::test]
    async fn progress_routes_reject_unknown_tokens() {
        let pool = pool().await;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer nope-nope-nope"));

        let result =
            list_run_progress(Path("run-1".to_string()), State(state(pool, Vec::new())), headers).await;

        let (status, Json(error)) = result.expect_err("unauthorized");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.error_class, "unauthorized");
        assert_eq!(error.correlation_id, "run-1");
        assert_eq!(error.message, "The caller token was missing or not recognised.");
    }
}
