use actix_web::{web, HttpResponse};

use crate::error::AppResult;
use crate::jobs::CleanupOptions;
use crate::middleware::OperatorToken;
use crate::state::AppState;

/// Purge tombstones past the retention threshold
pub async fn server_cleanup(
    state: web::Data<AppState>,
    _operator: OperatorToken,
    body: Option<web::Json<CleanupOptions>>,
) -> AppResult<HttpResponse> {
    let options = body.map(|b| b.into_inner()).unwrap_or_default();
    let report = state.sweeper.server_cleanup(options).await?;
    Ok(HttpResponse::Ok().json(report))
}
