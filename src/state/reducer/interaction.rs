use super::super::patch::{apply_patches, PatchOperation};
use super::super::run_state::{ActionRequest, ApprovalRequest, RunState, RunStatus};
use super::state::{Fold, Notice, RunReducer, Transition, UnknownSurfacePolicy};
use crate::types::{ApprovalResolution, EventMeta, Surface};
use serde_json::{Map, Value};

const APPROVAL_RESOLUTION: &str = "APPROVAL_RESOLUTION";
const ACTION_RESOLUTION: &str = "ACTION_RESOLUTION";

impl Fold<'_> {
    pub(super) fn state_snapshot(&mut self, snapshot: &Value) {
        self.state.custom_state = Some(snapshot.clone());
    }

    /// All-or-nothing: a failing op keeps the previous custom state.
    pub(super) fn state_delta(&mut self, delta: &[PatchOperation]) {
        if self.state.custom_state.is_none() {
            self.repair("STATE_DELTA before any STATE_SNAPSHOT; patching an empty object");
        }
        let empty = Value::Object(Map::new());
        let base = self.state.custom_state.as_ref().unwrap_or(&empty);
        match apply_patches(base, delta) {
            Ok(next) => self.state.custom_state = Some(next),
            Err(error) => {
                tracing::warn!(%error, precondition = error.is_precondition_failure(), "state delta rejected");
                self.notices.push(Notice::PatchRejected(error));
            }
        }
    }

    pub(super) fn action_required(
        &mut self,
        meta: &EventMeta,
        action_id: &str,
        action_type: Option<&str>,
        message: Option<&str>,
        payload: Option<&Value>,
        timeout: Option<u64>,
    ) {
        self.ensure_started(meta);
        let request = ActionRequest {
            action_id: action_id.to_string(),
            action_type: action_type.map(str::to_string),
            message: message.map(str::to_string),
            payload: payload.cloned(),
            timeout_ms: timeout,
            requested_at: meta.timestamp,
        };

        match self
            .state
            .pending_actions
            .iter_mut()
            .find(|queued| queued.action_id == action_id)
        {
            Some(queued) => *queued = request.clone(),
            None => self.state.pending_actions.push(request.clone()),
        }
        if self.policy.action_required_blocks && self.state.status == RunStatus::Running {
            self.state.status = RunStatus::Paused;
        }
        self.notify(Notice::ActionQueued(request));
    }

    pub(super) fn approval_requested(
        &mut self,
        meta: &EventMeta,
        approval_id: &str,
        title: Option<&str>,
        description: Option<&str>,
        details: Option<&Value>,
        timeout: Option<u64>,
    ) {
        self.ensure_started(meta);
        if let Some(previous) = &self.state.pending_approval {
            if previous.approval_id != approval_id {
                let detail = format!(
                    "approval {} superseded by {approval_id} before it was resolved",
                    previous.approval_id
                );
                self.repair(detail);
            }
        }

        let request = ApprovalRequest {
            approval_id: approval_id.to_string(),
            title: title.map(str::to_string),
            description: description.map(str::to_string),
            details: details.cloned(),
            timeout_ms: timeout,
            requested_at: meta.timestamp,
        };
        self.state.status = RunStatus::Paused;
        self.state.pending_approval = Some(request.clone());
        self.notify(Notice::ApprovalRequested(request));
    }

    pub(super) fn render_surface(&mut self, surface: &Surface) {
        let existing = self
            .state
            .surfaces
            .iter()
            .position(|existing| existing.id() == surface.id());

        if !surface.is_recognized() {
            let reason = if self.policy.unknown_surfaces == UnknownSurfacePolicy::Drop {
                Some("dropping surface of unknown type")
            } else if surface.id().is_empty() {
                Some("dropping unknown surface without an id")
            } else if existing.is_some_and(|index| self.state.surfaces[index].is_recognized()) {
                Some("unknown surface would replace a known one; keeping the known surface")
            } else {
                None
            };
            if let Some(reason) = reason {
                tracing::warn!(
                    surface_id = surface.id(),
                    surface_type = surface.type_name(),
                    "{reason}"
                );
                self.notices.push(Notice::SurfaceDropped {
                    surface_id: surface.id().to_string(),
                    surface_type: surface.type_name().to_string(),
                });
                return;
            }
        }

        match existing {
            Some(index) => self.state.surfaces[index] = surface.clone(),
            None => self.state.surfaces.push(surface.clone()),
        }
    }

    /// Blocking actions and approvals both hold the run paused; resume once neither remains.
    fn resume_when_unblocked(&mut self) {
        let blocked_on_actions =
            self.policy.action_required_blocks && !self.state.pending_actions.is_empty();
        if self.state.status == RunStatus::Paused
            && self.state.pending_approval.is_none()
            && !blocked_on_actions
        {
            self.state.status = RunStatus::Running;
        }
    }
}

impl RunReducer {
    /// Apply the caller's out-of-band approval decision locally.
    pub fn resolve_approval(&self, state: RunState, resolution: &ApprovalResolution) -> Transition {
        let mut fold = Fold::new(state, &self.policy, APPROVAL_RESOLUTION);
        if fold.state.is_terminal() {
            fold.ignore("run already ended");
            return fold.finish();
        }
        let matches_pending = fold
            .state
            .pending_approval
            .as_ref()
            .is_some_and(|pending| pending.approval_id == resolution.approval_id);
        if !matches_pending {
            fold.ignore(format!(
                "no pending approval with id {}",
                resolution.approval_id
            ));
            return fold.finish();
        }

        fold.state.pending_approval = None;
        fold.resume_when_unblocked();
        fold.notify(Notice::ApprovalResolved(resolution.clone()));
        fold.finish()
    }

    /// Mark a queued ACTION_REQUIRED as handled by the caller.
    pub fn resolve_action(&self, state: RunState, action_id: &str) -> Transition {
        let mut fold = Fold::new(state, &self.policy, ACTION_RESOLUTION);
        if fold.state.is_terminal() {
            fold.ignore("run already ended");
            return fold.finish();
        }
        let before = fold.state.pending_actions.len();
        fold.state
            .pending_actions
            .retain(|action| action.action_id != action_id);
        if fold.state.pending_actions.len() == before {
            fold.ignore(format!("no pending action with id {action_id}"));
            return fold.finish();
        }

        fold.resume_when_unblocked();
        fold.notify(Notice::ActionResolved {
            action_id: action_id.to_string(),
        });
        fold.finish()
    }
}
