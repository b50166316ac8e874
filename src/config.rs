use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::runtime::timeout::InteractionTimeoutPolicy;
use crate::state::{ReducerPolicy, UnknownSurfacePolicy};
use crate::util::{is_local_endpoint_url, parse_bool_str};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const RECONNECT_ATTEMPTS_CEILING: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub base_url: String,
    pub workflow_id: Option<String>,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub unknown_surfaces: UnknownSurfacePolicy,
    pub interaction_timeouts: InteractionTimeoutPolicy,
    pub action_required_blocks: bool,
    /// Reconnects send the last seen event id as `Last-Event-ID`.
    pub resume_from_last_event_id: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            workflow_id: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            unknown_surfaces: UnknownSurfacePolicy::default(),
            interaction_timeouts: InteractionTimeoutPolicy::default(),
            action_required_blocks: false,
            resume_from_last_event_id: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let base_url = env_value("RUNWIRE_BASE_URL").unwrap_or(defaults.base_url);
        let workflow_id = env_value("RUNWIRE_WORKFLOW_ID");

        let max_reconnect_attempts = match env_value("RUNWIRE_MAX_RECONNECT_ATTEMPTS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("Invalid RUNWIRE_MAX_RECONNECT_ATTEMPTS '{raw}'"))?,
            None => defaults.max_reconnect_attempts,
        };
        let reconnect_delay_ms = match env_value("RUNWIRE_RECONNECT_DELAY_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("Invalid RUNWIRE_RECONNECT_DELAY_MS '{raw}'"))?,
            None => defaults.reconnect_delay_ms,
        };
        let unknown_surfaces = match env_value("RUNWIRE_UNKNOWN_SURFACES") {
            Some(raw) => raw.parse::<UnknownSurfacePolicy>().map_err(anyhow::Error::msg)?,
            None => defaults.unknown_surfaces,
        };
        let interaction_timeouts = match env_value("RUNWIRE_INTERACTION_TIMEOUTS") {
            Some(raw) => raw
                .parse::<InteractionTimeoutPolicy>()
                .map_err(anyhow::Error::msg)?,
            None => defaults.interaction_timeouts,
        };
        let action_required_blocks = match env_value("RUNWIRE_ACTION_REQUIRED_BLOCKS") {
            Some(raw) => match parse_bool_str(&raw) {
                Some(flag) => flag,
                None => bail!("Invalid RUNWIRE_ACTION_REQUIRED_BLOCKS '{raw}': expected a boolean"),
            },
            None => defaults.action_required_blocks,
        };
        let resume_from_last_event_id = match env_value("RUNWIRE_RESUME_LAST_EVENT_ID") {
            Some(raw) => match parse_bool_str(&raw) {
                Some(flag) => flag,
                None => bail!("Invalid RUNWIRE_RESUME_LAST_EVENT_ID '{raw}': expected a boolean"),
            },
            None => defaults.resume_from_last_event_id,
        };

        Ok(Self {
            base_url,
            workflow_id,
            max_reconnect_attempts,
            reconnect_delay_ms,
            unknown_surfaces,
            interaction_timeouts,
            action_required_blocks,
            resume_from_last_event_id,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let base_url = self.base_url.trim();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            bail!(
                "Invalid RUNWIRE_BASE_URL '{}': expected http:// or https:// URL",
                self.base_url
            );
        }
        if Url::parse(base_url).is_err() {
            bail!("Invalid RUNWIRE_BASE_URL '{}': not a valid URL", self.base_url);
        }
        if base_url.starts_with("http://") && !self.is_local_endpoint() {
            bail!(
                "Plain http is only allowed for local endpoints (url: '{}'); use https",
                self.base_url
            );
        }

        if let Some(workflow_id) = &self.workflow_id {
            validate_workflow_id(workflow_id)?;
        }

        if self.reconnect_delay_ms == 0 {
            bail!("RUNWIRE_RECONNECT_DELAY_MS must be greater than zero");
        }
        if self.max_reconnect_attempts > RECONNECT_ATTEMPTS_CEILING {
            bail!(
                "RUNWIRE_MAX_RECONNECT_ATTEMPTS {} exceeds the limit of {RECONNECT_ATTEMPTS_CEILING}",
                self.max_reconnect_attempts
            );
        }

        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reducer_policy(&self) -> ReducerPolicy {
        ReducerPolicy {
            unknown_surfaces: self.unknown_surfaces,
            action_required_blocks: self.action_required_blocks,
        }
    }

    /// `{base_url}/stream/workflow/{workflow_id}` with `query` appended.
    pub fn stream_url(&self, workflow_id: &str, query: &[(String, String)]) -> Result<Url> {
        validate_workflow_id(workflow_id)?;
        let mut url = self.endpoint(&["stream", "workflow", workflow_id])?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// `{base_url}/workflow/{workflow_id}/{action}` for side-channel posts.
    pub fn action_url(&self, workflow_id: &str, action: &str) -> Result<Url> {
        validate_workflow_id(workflow_id)?;
        self.endpoint(&["workflow", workflow_id, action])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(self.base_url.trim())
            .with_context(|| format!("Invalid RUNWIRE_BASE_URL '{}'", self.base_url))?;
        {
            let Ok(mut path) = url.path_segments_mut() else {
                bail!("RUNWIRE_BASE_URL '{}' cannot carry a path", self.base_url);
            };
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.base_url)
    }
}

fn validate_workflow_id(workflow_id: &str) -> Result<()> {
    if workflow_id.trim().is_empty() {
        bail!("Workflow id must not be empty");
    }
    if workflow_id.contains('/') {
        bail!("Invalid workflow id '{workflow_id}': must not contain '/'");
    }
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
