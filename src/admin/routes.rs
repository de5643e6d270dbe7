//! Admin REST endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::contacts::import::{NewContact, import_contacts};
use crate::contacts::model::Sentiment;
use crate::error::{DatabaseError, OutreachError, ReplyError};
use crate::replies::ReplyIngestor;
use crate::sequence::SequenceEngine;
use crate::templates::model::TemplateInput;
use crate::templates::render::RenderedEmail;

/// Contacts returned by `GET /tracking`.
const TRACKING_LIMIT: usize = 50;

/// Shared state for admin routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SequenceEngine>,
    pub replies: Arc<ReplyIngestor>,
    /// Recipient for `POST /test-email`.
    pub test_recipient: Option<String>,
}

/// Build the admin router.
pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analytics", get(analytics))
        .route("/contacts", get(list_contacts))
        .route("/contacts/import", post(import))
        .route("/contacts/{email}/log", get(contact_log))
        .route("/tracking", get(tracking))
        .route("/templates", get(list_templates).post(create_template))
        .route("/templates/{id}", put(update_template))
        .route("/launch", post(launch))
        .route("/run-automation", post(run_automation))
        .route("/mark-replied/{email}", post(mark_replied))
        .route("/negative-reply/{email}", post(negative_reply))
        .route("/opt-out/{email}", post(opt_out))
        .route("/test-email", post(test_email))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn db_error(e: DatabaseError) -> Response {
    error!("Admin request failed: {e}");
    match e {
        DatabaseError::Constraint(msg) => error_response(StatusCode::CONFLICT, msg),
        DatabaseError::NotFound { .. } => error_response(StatusCode::NOT_FOUND, e),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other),
    }
}

fn reply_error(e: ReplyError) -> Response {
    match e {
        ReplyError::UnknownSender(_) => error_response(StatusCode::NOT_FOUND, "Contact not found"),
        other => {
            error!("Reply handling failed: {other}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other)
        }
    }
}

// ── Read-only ───────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "outreach-engine"
    }))
}

async fn analytics(State(state): State<AppState>) -> Response {
    match state.engine.store().count_contacts_by_stage().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => db_error(e),
    }
}

async fn list_contacts(State(state): State<AppState>) -> Response {
    match state.engine.store().list_contacts().await {
        Ok(contacts) => Json(contacts).into_response(),
        Err(e) => db_error(e),
    }
}

async fn tracking(State(state): State<AppState>) -> Response {
    match state.engine.store().list_replied_contacts(TRACKING_LIMIT).await {
        Ok(contacts) => Json(contacts).into_response(),
        Err(e) => db_error(e),
    }
}

async fn contact_log(State(state): State<AppState>, Path(email): Path<String>) -> Response {
    let store = state.engine.store();
    let contact = match store.get_contact_by_email(&email).await {
        Ok(Some(c)) => c,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Contact not found"),
        Err(e) => return db_error(e),
    };
    match store.list_log_for_contact(contact.id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => db_error(e),
    }
}

// ── Templates ───────────────────────────────────────────────────────

async fn list_templates(State(state): State<AppState>) -> Response {
    match state.engine.store().list_templates().await {
        Ok(templates) => Json(templates).into_response(),
        Err(e) => db_error(e),
    }
}

async fn create_template(
    State(state): State<AppState>,
    Json(body): Json<TemplateInput>,
) -> Response {
    let template = body.into_template(Uuid::new_v4());
    match state.engine.store().insert_template(&template).await {
        Ok(()) => {
            info!(template = %template.name, "Template created");
            (StatusCode::CREATED, Json(template)).into_response()
        }
        Err(e) => db_error(e),
    }
}

async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TemplateInput>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid template ID");
    };
    let template = body.into_template(id);
    match state.engine.store().update_template(&template).await {
        Ok(true) => Json(template).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Template not found"),
        Err(e) => db_error(e),
    }
}

// ── Contacts ────────────────────────────────────────────────────────

async fn import(State(state): State<AppState>, Json(rows): Json<Vec<NewContact>>) -> Response {
    match import_contacts(state.engine.store().as_ref(), rows).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => db_error(e),
    }
}

// ── Triggers ────────────────────────────────────────────────────────

/// Start a launch in the background and report how many contacts it targets.
async fn launch(State(state): State<AppState>) -> Response {
    let engine = &state.engine;
    match engine.store().get_template_by_order(0).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(StatusCode::BAD_REQUEST, OutreachError::WelcomeTemplateMissing);
        }
        Err(e) => return db_error(e),
    }

    let count = match engine.launch_candidates().await {
        Ok(candidates) => candidates.len(),
        Err(OutreachError::Database(e)) => return db_error(e),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    if count == 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "No new contacts to email. Import contacts first.",
        );
    }

    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        match engine.launch().await {
            Ok(report) => info!(sent = report.sent, failed = report.failed, "Background launch finished"),
            Err(e) => error!("Background launch failed: {e}"),
        }
    });

    Json(json!({
        "message": "Campaign started in background.",
        "count": count
    }))
    .into_response()
}

/// Launch, then run the scheduler once. Both complete before responding.
async fn run_automation(State(state): State<AppState>) -> Response {
    let launch = match state.engine.launch().await {
        Ok(report) => Some(report),
        Err(OutreachError::WelcomeTemplateMissing) => {
            warn!("Skipping launch: Welcome template missing");
            None
        }
        Err(e) => {
            error!("Automation launch failed: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
    };

    match state.engine.run_due().await {
        Ok(scheduler) => Json(json!({
            "message": "Automation run complete",
            "launch": launch,
            "scheduler": scheduler
        }))
        .into_response(),
        Err(e) => {
            error!("Automation scheduler run failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn mark_replied(State(state): State<AppState>, Path(email): Path<String>) -> Response {
    match state.replies.mark_replied(&email, Sentiment::Positive).await {
        Ok(report) => Json(json!({
            "message": "Marked positive reply and triggered flow",
            "report": report
        }))
        .into_response(),
        Err(e) => reply_error(e),
    }
}

async fn negative_reply(State(state): State<AppState>, Path(email): Path<String>) -> Response {
    match state.replies.mark_replied(&email, Sentiment::Negative).await {
        Ok(report) => Json(json!({
            "message": "Marked negative reply and triggered flow",
            "report": report
        }))
        .into_response(),
        Err(e) => reply_error(e),
    }
}

async fn opt_out(State(state): State<AppState>, Path(email): Path<String>) -> Response {
    match state.replies.opt_out(&email).await {
        Ok(true) => Json(json!({ "message": "Opted out" })).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Contact not found"),
        Err(e) => reply_error(e),
    }
}

/// Send a fixed message to the configured test recipient.
async fn test_email(State(state): State<AppState>) -> Response {
    let Some(recipient) = state.test_recipient.as_deref() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "No test recipient configured" })),
        )
            .into_response();
    };

    let transport = state.engine.transport();
    let email = RenderedEmail {
        subject: "Outreach transport active".into(),
        html_body: "<p>Your mail transport is configured and reachable.</p>".into(),
    };
    match state.engine.send_direct(recipient, &email).await {
        Ok(()) => {
            info!(to = %recipient, transport = transport.name(), "Test email sent");
            Json(json!({ "success": true, "message": "Test email sent." })).into_response()
        }
        Err(e) => {
            warn!(transport = transport.name(), "Test email failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
