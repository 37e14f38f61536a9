use actix_web::{web, HttpResponse};

use crate::error::AppResult;
use crate::middleware::UserId;
use crate::state::AppState;

/// Replay the caller's queued deletions. Invoked by the session service on reconnect.
pub async fn drain(state: web::Data<AppState>, user: UserId) -> AppResult<HttpResponse> {
    let outcome = state.deletion.drain_grace_queue(user.0).await?;
    Ok(HttpResponse::Ok().json(outcome))
}
