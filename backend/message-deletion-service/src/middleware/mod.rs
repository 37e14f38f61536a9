/// Request identity extractors
///
/// The API gateway authenticates callers and forwards the user id in
/// `x-user-id`. Operator endpoints additionally require the configured
/// bearer token.
use actix_web::{web, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

pub fn extract_user_id(req: &HttpRequest) -> Result<Uuid, AppError> {
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing user id".to_string()))?;

    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Unauthorized("invalid user id".to_string()))
}

impl FromRequest for UserId {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        ready(extract_user_id(req).map(UserId))
    }
}

/// Caller presented the operator token
#[derive(Debug, Clone, Copy)]
pub struct OperatorToken;

fn check_operator(req: &HttpRequest) -> Result<OperatorToken, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::Internal("application state missing".to_string()))?;

    let Some(expected) = state.config.admin_api_token.as_deref() else {
        return Err(AppError::AccessDenied("operator endpoints are disabled".to_string()));
    };

    let presented = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing operator token".to_string()))?;

    if presented != expected {
        return Err(AppError::AccessDenied("invalid operator token".to_string()));
    }
    Ok(OperatorToken)
}

impl FromRequest for OperatorToken {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        ready(check_operator(req))
    }
}
