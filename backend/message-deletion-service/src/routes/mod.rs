//! HTTP surface
//!
//! Every route is idempotent on retry with the same arguments; the caller is
//! identified by the gateway-forwarded `x-user-id` header.

pub mod admin;
pub mod conversations;
pub mod deletions;
pub mod grace;
pub mod messages;

use actix_web::{web, HttpResponse};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::metrics::metrics_handler;
use crate::state::AppState;

pub(crate) fn validate<T: Validate>(request: &T) -> AppResult<()> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    if let Some(pool) = &state.pg {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            return HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unhealthy",
                "error": format!("PostgreSQL connection failed: {}", e),
                "service": "message-deletion-service"
            }));
        }
    }

    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "message-deletion-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/conversations")
                        .route("", web::post().to(conversations::open_conversation))
                        .route("/{id}/summary", web::get().to(conversations::conversation_summary))
                        .route("/{id}/messages", web::get().to(messages::list_messages))
                        .route("/{id}/messages", web::post().to(messages::ingest_message))
                        .route("/{id}/messages/read", web::post().to(messages::mark_read))
                        .route(
                            "/{id}/messages/delete-for-me",
                            web::post().to(deletions::delete_for_me),
                        )
                        .route(
                            "/{id}/messages/delete-for-everyone",
                            web::post().to(deletions::delete_for_everyone),
                        )
                        .route("/{id}/messages/hard-delete", web::post().to(deletions::hard_delete))
                        .route("/{id}/messages/soft-delete", web::post().to(deletions::soft_delete))
                        .route("/{id}/messages/auto-delete", web::post().to(deletions::auto_delete))
                        .route("/{id}/messages/admin-delete", web::post().to(deletions::admin_delete))
                        .route("/{id}/messages/bulk-delete", web::post().to(deletions::bulk_delete))
                        .route("/{id}/messages/grace-delete", web::post().to(deletions::grace_delete))
                        .route(
                            "/{id}/messages/unsent-delete",
                            web::post().to(deletions::unsent_delete),
                        )
                        .route(
                            "/{id}/messages/{message_id}/media-delete",
                            web::post().to(deletions::media_delete),
                        ),
                )
                .route("/grace-queue/drain", web::post().to(grace::drain))
                .route("/admin/cleanup", web::post().to(admin::server_cleanup)),
        );
}
