use super::super::run_state::{RunState, RunStatus};
use super::state::{Fold, Notice, RunReducer, Transition};
use crate::types::{AgentEvent, EventKind, EventMeta};

impl RunReducer {
    /// Fold `event` into `state`.
    ///
    /// Never panics on protocol violations: out-of-order events are reconciled
    /// and reported through [`Transition::notices`].
    pub fn apply(&self, state: RunState, event: &AgentEvent) -> Transition {
        let mut fold = Fold::new(state, &self.policy, event.type_name());
        fold.apply_event(event);
        fold.finish()
    }
}

impl Fold<'_> {
    fn apply_event(&mut self, event: &AgentEvent) {
        if matches!(event.kind, EventKind::KeepAlive) {
            return;
        }
        if self.state.is_terminal() {
            let status = self.state.status;
            self.ignore(format!("run is already terminal ({status:?})"));
            return;
        }
        if !self.accepts_run(&event.meta) {
            return;
        }
        self.track_timestamp(&event.meta);

        let meta = &event.meta;
        match &event.kind {
            EventKind::RunStarted { workflow_id, steps } => {
                self.run_started(meta, workflow_id.as_deref(), steps)
            }
            EventKind::RunFinished { result } => self.run_finished(meta, result.as_ref()),
            EventKind::RunError { error, code } => self.run_error(meta, error, code.as_deref()),
            EventKind::StepStarted {
                step_index,
                step_id,
                label,
            } => self.step_started(meta, *step_index, step_id.as_deref(), label.as_deref()),
            EventKind::StepFinished {
                step_index,
                step_id,
                duration_ms,
            } => self.step_finished(meta, *step_index, step_id.as_deref(), *duration_ms),
            EventKind::StepError {
                step_index,
                step_id,
                error,
            } => self.step_error(meta, *step_index, step_id.as_deref(), error),
            EventKind::TextMessageStart { message_id, role } => {
                self.text_message_start(message_id, role.as_deref())
            }
            EventKind::TextMessageContent {
                message_id,
                content,
            } => self.text_message_content(message_id, content),
            EventKind::TextMessageEnd {
                message_id,
                full_content,
            } => self.text_message_end(message_id, full_content.as_deref()),
            EventKind::ToolCallStart {
                tool_call_id,
                tool_name,
                parent_message_id,
            } => self.tool_call_start(tool_call_id, tool_name, parent_message_id.as_deref()),
            EventKind::ToolCallArgs {
                tool_call_id,
                delta,
            } => self.tool_call_args(tool_call_id, delta),
            EventKind::ToolCallEnd {
                tool_call_id,
                result,
            } => self.tool_call_end(tool_call_id, result.as_ref()),
            EventKind::StateSnapshot { snapshot } => self.state_snapshot(snapshot),
            EventKind::StateDelta { delta } => self.state_delta(delta),
            EventKind::ActionRequired {
                action_id,
                action_type,
                message,
                payload,
                timeout,
            } => self.action_required(
                meta,
                action_id,
                action_type.as_deref(),
                message.as_deref(),
                payload.as_ref(),
                *timeout,
            ),
            EventKind::ApprovalRequested {
                approval_id,
                title,
                description,
                details,
                timeout,
            } => self.approval_requested(
                meta,
                approval_id,
                title.as_deref(),
                description.as_deref(),
                details.as_ref(),
                *timeout,
            ),
            EventKind::RenderSurface { surface } => self.render_surface(surface),
            EventKind::KeepAlive => {}
        }
    }

    /// Adopt the run identity from the first event; drop events for other runs.
    fn accepts_run(&mut self, meta: &EventMeta) -> bool {
        if meta.run_id.is_empty() {
            return true;
        }
        match self.state.run_id.as_deref() {
            None => {
                self.state.run_id = Some(meta.run_id.clone());
                if !meta.session_id.is_empty() {
                    self.state.session_id = Some(meta.session_id.clone());
                }
                true
            }
            Some(current) if current == meta.run_id => true,
            Some(current) => {
                let reason = format!("event belongs to run {} while tracking {current}", meta.run_id);
                self.ignore(reason);
                false
            }
        }
    }

    fn track_timestamp(&mut self, meta: &EventMeta) {
        let Some(received) = meta.timestamp else {
            return;
        };
        match self.state.last_event_at {
            Some(previous) if received < previous => {
                tracing::warn!(%previous, %received, "event timestamp regressed");
                self.notices
                    .push(Notice::TimestampRegressed { previous, received });
            }
            _ => self.state.last_event_at = Some(received),
        }
    }

    /// Infer RUN_STARTED for events whose precondition is a running run.
    pub(super) fn ensure_started(&mut self, meta: &EventMeta) {
        if self.state.status != RunStatus::Idle {
            return;
        }
        self.repair("no RUN_STARTED seen; treating the run as started");
        self.state.status = RunStatus::Running;
        self.state.started_at = meta.timestamp;
    }

    /// Progress while paused means the interaction was resolved server-side.
    pub(super) fn resume_if_paused(&mut self) {
        if self.state.status != RunStatus::Paused {
            return;
        }
        self.repair("progress while paused; assuming the pending interaction was resolved");
        self.state.pending_approval = None;
        self.state.status = RunStatus::Running;
    }

    pub(super) fn require_running(&mut self, meta: &EventMeta) {
        self.ensure_started(meta);
        self.resume_if_paused();
    }
}
