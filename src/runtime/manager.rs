use super::context::{ConnectionState, ConnectionStatus, StreamContext};
use super::event::StreamUpdate;
use super::r#loop::StreamTask;
use crate::api::{ActionChannel, ActionError, EventTransport};
use crate::config::Config;
use crate::state::{Notice, RunReducer, RunState};
use crate::types::{AgentEvent, ApprovalResolution, SurfaceActionRequest};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which workflow stream to open, plus optional continuation query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub workflow_id: String,
    pub query: Vec<(String, String)>,
}

impl ConnectParams {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid stream target: {0}")]
    InvalidTarget(String),
    #[error("not connected to a workflow")]
    NotConnected,
    #[error("no action channel configured")]
    NoActionChannel,
    #[error(transparent)]
    Action(#[from] ActionError),
}

struct ActiveStream {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns one workflow's event stream and the [`RunState`] folded from it.
pub struct ConnectionManager {
    config: Config,
    transport: Arc<dyn EventTransport>,
    actions: Option<Arc<dyn ActionChannel>>,
    reducer: RunReducer,
    context: Arc<StreamContext>,
    workflow_id: Option<String>,
    active: Option<ActiveStream>,
}

impl ConnectionManager {
    pub fn new(
        config: Config,
        transport: Arc<dyn EventTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamUpdate>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let manager = Self {
            reducer: RunReducer::new(config.reducer_policy()),
            config,
            transport,
            actions: None,
            context: Arc::new(StreamContext::new(update_tx)),
            workflow_id: None,
            active: None,
        };
        (manager, update_rx)
    }

    pub fn with_action_channel(mut self, channel: Arc<dyn ActionChannel>) -> Self {
        self.actions = Some(channel);
        self
    }

    /// Open the stream for `params.workflow_id`, replacing any current one.
    ///
    /// The run state starts fresh; the raw-event log is kept until
    /// [`clear_events`](Self::clear_events).
    pub async fn connect(&mut self, params: ConnectParams) -> Result<(), ManagerError> {
        let url = self
            .config
            .stream_url(&params.workflow_id, &params.query)
            .map_err(|error| ManagerError::InvalidTarget(error.to_string()))?;

        self.teardown().await;
        self.context
            .reset_run(RunState::for_workflow(params.workflow_id.clone()));
        self.context.set_connection(ConnectionState {
            status: ConnectionStatus::Connecting,
            reconnect_attempts: 0,
            error: None,
        });
        self.workflow_id = Some(params.workflow_id.clone());

        let cancel = CancellationToken::new();
        let task = StreamTask {
            transport: Arc::clone(&self.transport),
            actions: self.actions.clone(),
            context: Arc::clone(&self.context),
            reducer: self.reducer,
            url,
            workflow_id: params.workflow_id,
            max_reconnect_attempts: self.config.max_reconnect_attempts,
            reconnect_delay: self.config.reconnect_delay(),
            timeout_policy: self.config.interaction_timeouts,
            resume_from_last_event_id: self.config.resume_from_last_event_id,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());
        self.active = Some(ActiveStream { cancel, handle });
        Ok(())
    }

    /// Close the stream and stop reconnecting. Safe to call in any state.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        let attempts = self.context.connection_state().reconnect_attempts;
        self.context.set_connection(ConnectionState {
            status: ConnectionStatus::Closed,
            reconnect_attempts: attempts,
            error: None,
        });
    }

    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        if let Err(error) = active.handle.await {
            tracing::warn!(%error, "stream task ended abnormally");
        }
    }

    pub fn clear_events(&self) {
        self.context.clear_events();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.context.connection_state()
    }

    pub fn run_state(&self) -> RunState {
        self.context.run_state()
    }

    /// Raw events received since the last [`clear_events`](Self::clear_events), keep-alives excluded.
    pub fn events(&self) -> Vec<AgentEvent> {
        self.context.events()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.context.subscribe_connection()
    }

    pub fn subscribe_run_state(&self) -> watch::Receiver<RunState> {
        self.context.subscribe_run_state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send the caller's decision upstream, then apply it locally.
    ///
    /// Without an action channel only the local transition happens.
    pub async fn resolve_approval(
        &self,
        resolution: ApprovalResolution,
    ) -> Result<Vec<Notice>, ManagerError> {
        let workflow_id = self.workflow_id.as_deref().ok_or(ManagerError::NotConnected)?;
        if let Some(actions) = &self.actions {
            actions.resolve_approval(workflow_id, &resolution).await?;
        }
        let notices = self
            .context
            .transition(|state| self.reducer.resolve_approval(state, &resolution));
        self.publish_notices(&notices);
        Ok(notices)
    }

    /// Mark a queued ACTION_REQUIRED as handled.
    pub fn resolve_action(&self, action_id: &str) -> Vec<Notice> {
        let notices = self
            .context
            .transition(|state| self.reducer.resolve_action(state, action_id));
        self.publish_notices(&notices);
        notices
    }

    pub async fn submit_surface_action(
        &self,
        action: SurfaceActionRequest,
    ) -> Result<(), ManagerError> {
        let workflow_id = self.workflow_id.as_deref().ok_or(ManagerError::NotConnected)?;
        let actions = self.actions.as_ref().ok_or(ManagerError::NoActionChannel)?;
        actions.submit_surface_action(workflow_id, &action).await?;
        Ok(())
    }

    fn publish_notices(&self, notices: &[Notice]) {
        for notice in notices {
            self.context.publish(StreamUpdate::Notice(notice.clone()));
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}
