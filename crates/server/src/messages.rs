use axum::{extract::State, http::StatusCode, Json};
use gestflow_core::domain::tenancy::CompanyId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::AppState;

/// Inbound chat text as delivered by the transport, without any provider envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundMessage {
    pub company_id: i64,
    pub chat_identity: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub reply: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    pub error: String,
}

pub async fn receive(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> Result<Json<ReplyMessage>, (StatusCode, Json<MessageError>)> {
    let chat_identity = message.chat_identity.trim();
    if chat_identity.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(MessageError { error: "chat_identity must not be empty".to_string() }),
        ));
    }

    info!(
        event_name = "server.message_received",
        company_id = message.company_id,
        text_chars = message.text.chars().count(),
        "inbound chat message"
    );
    let reply = state
        .conversation
        .handle_message(CompanyId(message.company_id), chat_identity, &message.text)
        .await;
    Ok(Json(ReplyMessage { reply }))
}
