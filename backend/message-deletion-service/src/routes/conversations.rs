use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::error::AppResult;
use crate::middleware::UserId;
use crate::services::OpenConversation;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct OpenConversationRequest {
    #[validate(length(min = 1, max = 256))]
    pub participant_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_group_chat: bool,
}

/// Create a conversation, or return the existing direct chat
pub async fn open_conversation(
    state: web::Data<AppState>,
    user: UserId,
    body: web::Json<OpenConversationRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let body = body.into_inner();

    let conversation = state
        .conversations
        .open_conversation(
            user.0,
            OpenConversation {
                participant_ids: body.participant_ids,
                is_group_chat: body.is_group_chat,
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(conversation))
}

/// Conversation as the caller sees it
pub async fn conversation_summary(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let summary = state
        .visibility
        .conversation_summary(path.into_inner(), user.0)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}
