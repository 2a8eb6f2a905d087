//! The HTTP surface: negotiation CRUD-ish routes, the inbound email
//! webhook, and the advisor chat endpoint.
//!
//! Engine and connector calls are blocking, so every handler goes through
//! `spawn_blocking` rather than holding a runtime worker.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::workflow::types::DEFAULT_SLOT_MINUTES;
use crate::workflow::{CreateWorkflowRequest, WorkflowEngine, WorkflowError, WorkflowStore};

use super::config::ServiceConfig;
use super::connectors::build_collaborators;
use super::inbound::{InboundDispatcher, InboundEmail};
use super::state::AppState;
use super::sweeper::start_sweeper;
use super::tools::ChatTools;
use super::BoxError;

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let collaborators = build_collaborators(&config);
    let store = WorkflowStore::new(config.database_path.clone())?;
    let engine = Arc::new(WorkflowEngine::new(
        store,
        collaborators.calendar.clone(),
        collaborators.email.clone(),
        collaborators.crm.clone(),
        collaborators.llm.clone(),
    ));
    let dispatcher = Arc::new(InboundDispatcher::new(
        engine.clone(),
        collaborators.crm.clone(),
        collaborators.email.clone(),
    ));
    let chat = Arc::new(ChatTools::new(
        collaborators.calendar,
        collaborators.email,
        collaborators.crm,
        collaborators.llm,
        &config.advisor_email,
    ));

    let mut sweeper_control = start_sweeper(engine.clone(), config.sweep_interval);

    let state = AppState {
        config: config.clone(),
        engine,
        dispatcher,
        chat,
    };

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("negotiation service listening on {}", addr);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper_control.stop_and_join();
    serve_result?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/negotiations", post(create_negotiation).get(list_negotiations))
        .route("/negotiations/:id", get(get_negotiation))
        .route("/negotiations/:id/reply", post(post_reply))
        .route("/negotiations/:id/cancel", post(post_cancel))
        .route("/inbound/email", post(post_inbound_email))
        .route("/chat", post(post_chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Deserialize)]
struct CreateNegotiationBody {
    /// Free-text contact identifier, matched against the CRM.
    #[serde(alias = "contact_query")]
    contact: String,
    /// Calendar owner; defaults to the configured advisor.
    #[serde(default)]
    owner: Option<String>,
    #[serde(default, alias = "meeting_title")]
    title: Option<String>,
    #[serde(default)]
    duration_minutes: Option<i64>,
}

async fn create_negotiation(
    State(state): State<AppState>,
    Json(body): Json<CreateNegotiationBody>,
) -> Response {
    let engine = state.engine.clone();
    let owner = body
        .owner
        .unwrap_or_else(|| state.config.advisor_email.clone());
    let mut request = CreateWorkflowRequest::new(&owner, &body.contact);
    if let Some(title) = body.title {
        request.meeting_title = title;
    }
    request.duration_minutes = body.duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES);

    run_engine(move || engine.create_workflow(&request, Utc::now()), StatusCode::CREATED).await
}

#[derive(Debug, serde::Serialize)]
struct NegotiationSummary {
    id: Uuid,
    owner: String,
    contact_email: Option<String>,
    contact_name: Option<String>,
    status: crate::workflow::WorkflowStatus,
    updated_at: chrono::DateTime<Utc>,
}

async fn list_negotiations(State(state): State<AppState>) -> Response {
    let engine = state.engine.clone();
    let result = task::spawn_blocking(move || engine.store().list()).await;
    match result {
        Ok(Ok(workflows)) => {
            let summaries: Vec<NegotiationSummary> = workflows
                .into_iter()
                .map(|workflow| NegotiationSummary {
                    id: workflow.id,
                    owner: workflow.owner,
                    contact_email: workflow.contact_email,
                    contact_name: workflow.contact_name,
                    status: workflow.status,
                    updated_at: workflow.updated_at,
                })
                .collect();
            (StatusCode::OK, Json(summaries)).into_response()
        }
        Ok(Err(err)) => workflow_error_response(err),
        Err(err) => join_error_response(err),
    }
}

async fn get_negotiation(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let engine = state.engine.clone();
    let result = task::spawn_blocking(move || engine.store().load(id)).await;
    match result {
        Ok(Ok(workflow)) => (StatusCode::OK, Json(workflow)).into_response(),
        Ok(Err(err)) => workflow_error_response(err),
        Err(err) => join_error_response(err),
    }
}

/// Same shape the poller posts to `/inbound/email`; only the body feeds the
/// interpreter when the workflow is addressed directly.
#[derive(Debug, Deserialize)]
struct ReplyBody {
    body: String,
    #[serde(default)]
    from_address: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    received_at: Option<chrono::DateTime<Utc>>,
}

async fn post_reply(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(reply): Json<ReplyBody>,
) -> Response {
    let engine = state.engine.clone();
    info!(
        workflow_id = %id,
        from = reply.from_address.as_deref().unwrap_or("-"),
        subject = reply.subject.as_deref().unwrap_or("-"),
        "reply posted"
    );
    let now = reply.received_at.unwrap_or_else(Utc::now);
    run_engine(
        move || engine.handle_reply(id, &reply.body, now),
        StatusCode::OK,
    )
    .await
}

async fn post_cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let engine = state.engine.clone();
    run_engine(move || engine.cancel(id, Utc::now()), StatusCode::OK).await
}

async fn post_inbound_email(
    State(state): State<AppState>,
    Json(message): Json<InboundEmail>,
) -> Response {
    let dispatcher = state.dispatcher.clone();
    let result = task::spawn_blocking(move || dispatcher.dispatch(&message, Utc::now())).await;
    match result {
        Ok(Ok(outcome)) => {
            let body = match outcome {
                super::inbound::InboundOutcome::Reply { workflow_id } => {
                    json!({"outcome": "reply", "workflow_id": workflow_id})
                }
                super::inbound::InboundOutcome::NewSender { contact_id } => {
                    json!({"outcome": "new_sender", "contact_id": contact_id})
                }
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err(err)) => workflow_error_response(err),
        Err(err) => join_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
}

async fn post_chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let chat = state.chat.clone();
    let result = task::spawn_blocking(move || chat.respond(&body.message, Utc::now())).await;
    match result {
        Ok(Ok(reply)) => (StatusCode::OK, Json(json!({"reply": reply}))).into_response(),
        Ok(Err(err)) => {
            error!("chat turn failed: {err}");
            error_response(StatusCode::BAD_GATEWAY, &err.to_string())
        }
        Err(err) => join_error_response(err),
    }
}

async fn run_engine<F>(operation: F, success: StatusCode) -> Response
where
    F: FnOnce() -> Result<crate::workflow::NegotiationWorkflow, WorkflowError> + Send + 'static,
{
    let result = task::spawn_blocking(operation).await;
    match result {
        Ok(Ok(workflow)) => (success, Json(workflow)).into_response(),
        Ok(Err(err)) => workflow_error_response(err),
        Err(err) => join_error_response(err),
    }
}

fn workflow_error_response(err: WorkflowError) -> Response {
    let status = match &err {
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::StaleWrite => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("request failed: {err}");
    }
    error_response(status, &err.to_string())
}

fn join_error_response(err: task::JoinError) -> Response {
    error!("blocking task panicked: {err}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}
