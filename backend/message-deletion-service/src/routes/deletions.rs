/// Deletion endpoints
///
/// Single-purpose operations fail on the first refused message. Bulk delete
/// reports refusals in `skipped` and carries on with the rest.
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::error::AppResult;
use crate::middleware::UserId;
use crate::policy::BulkMode;
use crate::services::{BulkOptions, DeletionOutcome, MediaDeleteOptions, SkippedMessage};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct MessageIdsRequest {
    #[validate(length(min = 1))]
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DeleteForEveryoneRequest {
    #[validate(length(min = 1))]
    pub message_ids: Vec<Uuid>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub time_window_override_secs: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct HardDeleteRequest {
    #[validate(length(min = 1))]
    pub message_ids: Vec<Uuid>,
    #[serde(default = "crate::services::deletion_service::default_true")]
    pub delete_media: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AutoDeleteRequest {
    #[validate(length(min = 1))]
    pub message_ids: Vec<Uuid>,
    #[validate(range(min = 1, max = 31536000))]
    pub duration_secs: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkDeleteRequest {
    #[validate(length(min = 1))]
    pub message_ids: Vec<Uuid>,
    pub mode: BulkMode,
    #[serde(default)]
    pub options: BulkOptions,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GraceDeleteRequest {
    #[validate(length(min = 1))]
    pub message_ids: Vec<Uuid>,
    #[validate(length(min = 1))]
    pub recipient_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DeletionResponse {
    pub deleted_count: usize,
    pub message_ids: Vec<Uuid>,
    pub already_satisfied: Vec<Uuid>,
    pub skipped: Vec<SkippedMessage>,
}

impl From<DeletionOutcome> for DeletionResponse {
    fn from(outcome: DeletionOutcome) -> Self {
        Self {
            deleted_count: outcome.deleted_count(),
            message_ids: outcome.message_ids,
            already_satisfied: outcome.already_satisfied,
            skipped: outcome.skipped,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AutoDeleteResponse {
    pub affected_count: usize,
    pub message_ids: Vec<Uuid>,
}

pub async fn delete_for_me(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<MessageIdsRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .delete_for_me(path.into_inner(), user.0, &body.message_ids)
        .await?;
    Ok(HttpResponse::Ok().json(DeletionResponse::from(outcome)))
}

pub async fn delete_for_everyone(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<DeleteForEveryoneRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .delete_for_everyone(
            path.into_inner(),
            user.0,
            &body.message_ids,
            body.time_window_override_secs,
        )
        .await?;
    Ok(HttpResponse::Ok().json(DeletionResponse::from(outcome)))
}

pub async fn hard_delete(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<HardDeleteRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .hard_delete(path.into_inner(), user.0, &body.message_ids, body.delete_media)
        .await?;
    Ok(HttpResponse::Ok().json(DeletionResponse::from(outcome)))
}

pub async fn soft_delete(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<MessageIdsRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .soft_delete(path.into_inner(), user.0, &body.message_ids)
        .await?;
    Ok(HttpResponse::Ok().json(DeletionResponse::from(outcome)))
}

/// Attach a disappearing-message timer
pub async fn auto_delete(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<AutoDeleteRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .set_auto_delete(path.into_inner(), user.0, &body.message_ids, body.duration_secs)
        .await?;
    Ok(HttpResponse::Ok().json(AutoDeleteResponse {
        affected_count: outcome.deleted_count(),
        message_ids: outcome.message_ids,
    }))
}

pub async fn admin_delete(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<MessageIdsRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .admin_delete(path.into_inner(), user.0, &body.message_ids)
        .await?;
    Ok(HttpResponse::Ok().json(DeletionResponse::from(outcome)))
}

pub async fn bulk_delete(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<BulkDeleteRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .bulk_delete(
            path.into_inner(),
            user.0,
            &body.message_ids,
            body.mode,
            body.options,
        )
        .await?;
    Ok(HttpResponse::Ok().json(DeletionResponse::from(outcome)))
}

pub async fn grace_delete(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<GraceDeleteRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .grace_delete(path.into_inner(), user.0, &body.message_ids, &body.recipient_ids)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn unsent_delete(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<MessageIdsRequest>,
) -> AppResult<HttpResponse> {
    validate(&*body)?;
    let outcome = state
        .deletion
        .unsent_delete(path.into_inner(), user.0, &body.message_ids)
        .await?;
    Ok(HttpResponse::Ok().json(DeletionResponse::from(outcome)))
}

/// Body is optional; an empty request releases the media and keeps the message.
pub async fn media_delete(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<(Uuid, Uuid)>,
    body: Option<web::Json<MediaDeleteOptions>>,
) -> AppResult<HttpResponse> {
    let (conversation_id, message_id) = path.into_inner();
    let options = body.map(|b| b.into_inner()).unwrap_or_default();
    let outcome = state
        .deletion
        .delete_media(conversation_id, user.0, message_id, options)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}
