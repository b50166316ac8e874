use super::event::StreamUpdate;
use crate::state::{Notice, RunState, Transition};
use crate::types::AgentEvent;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
    Closed,
}

/// Transport health, tracked separately from the run it carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State shared by the manager and its stream task.
///
/// Run-state writes go through [`StreamContext::transition`], which holds the
/// watch channel's lock for the whole fold so no two transitions interleave.
pub(crate) struct StreamContext {
    connection: watch::Sender<ConnectionState>,
    run_state: watch::Sender<RunState>,
    events: Mutex<Vec<AgentEvent>>,
    updates: mpsc::UnboundedSender<StreamUpdate>,
}

impl StreamContext {
    pub(crate) fn new(updates: mpsc::UnboundedSender<StreamUpdate>) -> Self {
        let (connection, _) = watch::channel(ConnectionState::default());
        let (run_state, _) = watch::channel(RunState::default());
        Self {
            connection,
            run_state,
            events: Mutex::new(Vec::new()),
            updates,
        }
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    pub(crate) fn run_state(&self) -> RunState {
        self.run_state.borrow().clone()
    }

    pub(crate) fn run_is_terminal(&self) -> bool {
        self.run_state.borrow().is_terminal()
    }

    pub(crate) fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub(crate) fn subscribe_run_state(&self) -> watch::Receiver<RunState> {
        self.run_state.subscribe()
    }

    pub(crate) fn set_connection(&self, next: ConnectionState) {
        let changed = self.connection.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next.clone();
            true
        });
        if changed {
            tracing::debug!(
                status = ?next.status,
                attempts = next.reconnect_attempts,
                error = next.error.as_deref().unwrap_or(""),
                "connection state changed"
            );
            self.publish(StreamUpdate::Connection(next));
        }
    }

    pub(crate) fn reset_run(&self, state: RunState) {
        self.run_state.send_replace(state);
    }

    /// Run one reducer step against the shared state and return its notices.
    pub(crate) fn transition<F>(&self, step: F) -> Vec<Notice>
    where
        F: FnOnce(RunState) -> Transition,
    {
        let mut notices = Vec::new();
        self.run_state.send_modify(|state| {
            let transition = step(std::mem::take(state));
            *state = transition.state;
            notices = transition.notices;
        });
        notices
    }

    pub(crate) fn record_event(&self, event: AgentEvent) {
        self.lock_events().push(event);
    }

    pub(crate) fn events(&self) -> Vec<AgentEvent> {
        self.lock_events().clone()
    }

    pub(crate) fn clear_events(&self) {
        self.lock_events().clear();
    }

    /// Updates are best-effort: a dropped receiver does not stop the stream.
    pub(crate) fn publish(&self, update: StreamUpdate) {
        let _ = self.updates.send(update);
    }

    fn lock_events(&self) -> MutexGuard<'_, Vec<AgentEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunReducer;
    use serde_json::json;

    #[test]
    fn test_set_connection_publishes_only_changes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let context = StreamContext::new(tx);
        let connecting = ConnectionState {
            status: ConnectionStatus::Connecting,
            ..ConnectionState::default()
        };

        context.set_connection(connecting.clone());
        context.set_connection(connecting.clone());

        assert!(matches!(rx.try_recv(), Ok(StreamUpdate::Connection(state)) if state == connecting));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_transition_updates_watchers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let context = StreamContext::new(tx);
        let watcher = context.subscribe_run_state();
        let event: AgentEvent = serde_json::from_value(json!({
            "type": "RUN_STARTED",
            "runId": "r1",
            "timestamp": "2024-05-01T12:00:00Z",
            "steps": []
        }))
        .expect("event");

        let notices = context.transition(|state| RunReducer::default().apply(state, &event));

        assert!(notices.is_empty());
        assert!(watcher.has_changed().expect("sender alive"));
        assert_eq!(context.run_state().run_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_event_log_survives_clear_independently_of_run_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let context = StreamContext::new(tx);
        context.record_event(AgentEvent::keep_alive());
        assert_eq!(context.events().len(), 1);

        context.clear_events();
        assert!(context.events().is_empty());
    }
}
