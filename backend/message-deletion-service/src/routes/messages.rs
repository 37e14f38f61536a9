use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::error::AppResult;
use crate::middleware::UserId;
use crate::models::MessageView;
use crate::services::IngestMessage;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct PaginationParams {
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1))]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IngestMessageRequest {
    #[validate(length(max = 65536))]
    pub content: String,
    #[serde(default)]
    pub media_ref: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1, max = 31536000))]
    pub auto_delete_secs: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MarkReadRequest {
    #[validate(length(min = 1))]
    pub message_ids: Vec<Uuid>,
}

/// Page of messages visible to the caller, oldest first
pub async fn list_messages(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    query: web::Query<PaginationParams>,
) -> AppResult<HttpResponse> {
    validate(&*query)?;
    let page = state
        .visibility
        .list_visible_messages(path.into_inner(), user.0, query.page, query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Compose path hook: store a new message and advance the ledger
pub async fn ingest_message(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<IngestMessageRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let body = body.into_inner();

    let message = state
        .conversations
        .ingest_message(
            path.into_inner(),
            user.0,
            IngestMessage {
                content: body.content,
                media_ref: body.media_ref,
                auto_delete_secs: body.auto_delete_secs,
                created_at: body.created_at,
            },
        )
        .await?;

    Ok(HttpResponse::Created().json(MessageView::project(&message, user.0)))
}

pub async fn mark_read(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<MarkReadRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .visibility
        .mark_read(path.into_inner(), user.0, &body.message_ids)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}
