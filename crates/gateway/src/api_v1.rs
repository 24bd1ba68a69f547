//! Versioned chatbot API.
//!
//! - `POST /v1/chatbot/turn`: one chat turn from the legacy chatbot
//! - `POST /v1/chatbot/direct-answer`: a plain question, no conversation

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
};
use serde::{Deserialize, Serialize};
use tellerline_core::turn::{AgentReply, ChatbotMessage};
use tracing::{info, warn};
use crate::SharedState;

/// Build the `/v1` router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chatbot/turn", post(turn_handler))
        .route("/chatbot/direct-answer", post(direct_answer_handler))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

fn shutting_down() -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "Service is shutting down")
}

async fn turn_handler(
    State(state): State<SharedState>,
    Json(message): Json<ChatbotMessage>,
) -> Result<Json<AgentReply>, ApiError> {
    if message.chat_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "chat_id must not be empty"));
    }
    info!(
        chat_id = %message.chat_id,
        text_len = message.text.len(),
        private = message.is_private,
        "Chatbot turn received"
    );

    let cancel = state.shutdown.child_token();
    match state.orchestrator.handle_turn(&message, &cancel).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            warn!(chat_id = %message.chat_id, error = %e, "Turn aborted");
            Err(shutting_down())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DirectAnswerRequest {
    pub question: String,
    #[serde(default)]
    pub language: Option<String>,
}

async fn direct_answer_handler(
    State(state): State<SharedState>,
    Json(request): Json<DirectAnswerRequest>,
) -> Result<Json<AgentReply>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "question must not be empty"));
    }
    info!(question_len = request.question.len(), "Direct question received");

    let cancel = state.shutdown.child_token();
    state
        .orchestrator
        .answer_direct(&request.question, request.language.as_deref(), &cancel)
        .await
        .map(Json)
        .map_err(|_| shutting_down())
}
