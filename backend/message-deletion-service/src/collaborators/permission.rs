use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

use super::{PermissionDecision, PermissionService};
use crate::error::{AppError, AppResult};

/// Calls the social graph service: `GET {base}/api/v1/permissions/can-message?from=&to=`
#[derive(Clone)]
pub struct HttpPermissionService {
    client: Client,
    base_url: String,
}

impl HttpPermissionService {
    pub fn new(base_url: &str) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Config(format!("permission client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PermissionService for HttpPermissionService {
    async fn can_message(&self, from: Uuid, to: Uuid) -> AppResult<PermissionDecision> {
        let url = format!("{}/api/v1/permissions/can-message", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("from", from.to_string()), ("to", to.to_string())])
            .send()
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("permission service: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::StoreUnavailable(format!(
                "permission service returned {}",
                response.status()
            )));
        }

        response
            .json::<PermissionDecision>()
            .await
            .map_err(|e| AppError::Internal(format!("permission response: {}", e)))
    }
}

/// Development fallback when no permission service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPermissions;

#[async_trait]
impl PermissionService for AllowAllPermissions {
    async fn can_message(&self, _from: Uuid, _to: Uuid) -> AppResult<PermissionDecision> {
        Ok(PermissionDecision {
            allowed: true,
            reason: None,
        })
    }
}
