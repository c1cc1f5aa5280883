//! REST endpoints for the webmail UI: inbox snapshot, send reply, suggestions.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{MailConfig, SuggestConfig};
use crate::llm::{AnthropicSuggester, FALLBACK_SUGGESTION, ReplySuggester};
use crate::mail::{ImapStore, MailStore, OutboundReply, ReplyDispatcher, SmtpRelay, SnapshotBuilder};

/// Hard cap on `?limit=` for the inbox endpoint.
pub const MAX_SNAPSHOT_LIMIT: usize = 50;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub snapshots: SnapshotBuilder,
    pub dispatcher: ReplyDispatcher,
    /// None if no suggestion provider is configured.
    pub suggester: Option<Arc<dyn ReplySuggester>>,
    pub default_limit: usize,
}

impl AppState {
    /// Live IMAP store, SMTP relay and, when configured, Anthropic suggestions.
    pub fn from_config(mail: &MailConfig, suggest: Option<&SuggestConfig>) -> crate::error::Result<Self> {
        let store: Arc<dyn MailStore> = Arc::new(ImapStore::new(mail.clone()));
        let relay = Arc::new(SmtpRelay::new(mail.clone()));
        let suggester = match suggest {
            Some(config) => Some(Arc::new(AnthropicSuggester::new(config)?) as Arc<dyn ReplySuggester>),
            None => None,
        };

        Ok(Self {
            snapshots: SnapshotBuilder::new(Arc::clone(&store), mail.timeout),
            dispatcher: ReplyDispatcher::new(relay, store, mail.timeout),
            suggester,
            default_limit: mail.fetch_limit,
        })
    }
}

/// Build the Axum router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/emails", get(list_emails))
        .route("/api/send-reply", post(send_reply))
        .route("/api/suggested-replies", post(suggested_replies))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inbox-assist"
    }))
}

// ── Inbox ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EmailsQuery {
    limit: Option<usize>,
}

async fn list_emails(State(state): State<AppState>, Query(query): Query<EmailsQuery>) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(state.default_limit)
        .clamp(1, MAX_SNAPSHOT_LIMIT);

    match state.snapshots.build(limit).await {
        Ok(messages) => (StatusCode::OK, Json(serde_json::json!(messages))),
        Err(e) => {
            error!(error = %e, transient = e.is_transient(), "Error fetching emails");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to fetch emails"})),
            )
        }
    }
}

// ── Send ────────────────────────────────────────────────────────────────

async fn send_reply(State(state): State<AppState>, Json(reply): Json<OutboundReply>) -> impl IntoResponse {
    if reply.to.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Recipient is required"})),
        );
    }

    let to = reply.to.clone();
    match state.dispatcher.send(reply).await {
        Ok(()) => {
            info!(to = %to, "Reply delivered");
            (StatusCode::OK, Json(serde_json::json!({"success": true})))
        }
        Err(e) => {
            error!(to = %to, error = %e, transient = e.is_transient(), "Error sending reply");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to send reply"})),
            )
        }
    }
}

// ── Suggestions ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestRequest {
    #[serde(default)]
    email_body: String,
    #[serde(default)]
    user_context: Option<String>,
}

async fn suggested_replies(
    State(state): State<AppState>,
    Json(body): Json<SuggestRequest>,
) -> impl IntoResponse {
    if body.email_body.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Email body is required"})),
        );
    }

    let Some(suggester) = &state.suggester else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "Reply suggestions are not configured"})),
        );
    };

    match suggester
        .suggest(&body.email_body, body.user_context.as_deref())
        .await
    {
        Ok(suggestions) => (StatusCode::OK, Json(serde_json::json!(suggestions))),
        Err(e) => {
            warn!(provider = suggester.name(), error = %e, "Error getting suggestions");
            (StatusCode::OK, Json(serde_json::json!([FALLBACK_SUGGESTION])))
        }
    }
}
