use crate::config::Config;
use crate::types::{ApprovalResolution, SurfaceActionRequest};
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("invalid action target: {0}")]
    InvalidTarget(String),
    #[error("action request to '{url}' failed: {reason}")]
    Request { url: String, reason: String },
    #[error("action endpoint '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Client-to-server side channel for decisions the event stream cannot carry.
#[async_trait]
pub trait ActionChannel: Send + Sync {
    async fn resolve_approval(
        &self,
        workflow_id: &str,
        resolution: &ApprovalResolution,
    ) -> Result<(), ActionError>;

    async fn submit_surface_action(
        &self,
        workflow_id: &str,
        action: &SurfaceActionRequest,
    ) -> Result<(), ActionError>;
}

/// POSTs JSON to `{base_url}/workflow/{id}/approval` and `/surface-action`.
#[derive(Debug, Clone)]
pub struct HttpActionChannel {
    http: reqwest::Client,
    config: Config,
}

impl HttpActionChannel {
    pub fn new(config: Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn post<T: Serialize + Sync>(&self, url: Url, body: &T) -> Result<(), ActionError> {
        let request_url = url.to_string();
        tracing::debug!(url = %request_url, "posting side-channel action");
        self.http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| ActionError::Request {
                url: request_url.clone(),
                reason: error.to_string(),
            })?
            .error_for_status()
            .map_err(|error| match error.status() {
                Some(status) => ActionError::Status {
                    url: request_url.clone(),
                    status: status.as_u16(),
                },
                None => ActionError::Request {
                    url: request_url.clone(),
                    reason: error.to_string(),
                },
            })?;
        Ok(())
    }

    fn target(&self, workflow_id: &str, action: &str) -> Result<Url, ActionError> {
        self.config
            .action_url(workflow_id, action)
            .map_err(|error| ActionError::InvalidTarget(error.to_string()))
    }
}

#[async_trait]
impl ActionChannel for HttpActionChannel {
    async fn resolve_approval(
        &self,
        workflow_id: &str,
        resolution: &ApprovalResolution,
    ) -> Result<(), ActionError> {
        let url = self.target(workflow_id, "approval")?;
        self.post(url, resolution).await
    }

    async fn submit_surface_action(
        &self,
        workflow_id: &str,
        action: &SurfaceActionRequest,
    ) -> Result<(), ActionError> {
        let url = self.target(workflow_id, "surface-action")?;
        self.post(url, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slashed_workflow_id_is_rejected_before_sending() {
        let channel = HttpActionChannel::new(Config::default());
        let resolution = ApprovalResolution {
            approval_id: "a1".to_string(),
            approved: true,
            reason: None,
        };

        let error = channel
            .resolve_approval("bad/id", &resolution)
            .await
            .expect_err("target must be rejected");
        assert!(matches!(error, ActionError::InvalidTarget(_)));
    }
}
