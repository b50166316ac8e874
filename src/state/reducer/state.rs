use super::super::patch::PatchError;
use super::super::run_state::{ActionRequest, ApprovalRequest, RunState};
use crate::types::{AgentEvent, ApprovalResolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do with a RENDER_SURFACE whose type is outside the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSurfacePolicy {
    #[default]
    Drop,
    /// Keep the raw payload so a renderer can offer a generic fallback.
    Retain,
}

impl FromStr for UnknownSurfacePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "retain" | "keep" => Ok(Self::Retain),
            other => Err(format!(
                "unknown surface policy '{other}': expected 'drop' or 'retain'"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReducerPolicy {
    pub unknown_surfaces: UnknownSurfacePolicy,
    /// Pause the run while an ACTION_REQUIRED request is queued.
    pub action_required_blocks: bool,
}

/// Observable side effects of one reducer step. Every repair lands here.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Repaired {
        event_type: &'static str,
        detail: String,
    },
    Ignored {
        event_type: &'static str,
        reason: String,
    },
    TimestampRegressed {
        previous: DateTime<Utc>,
        received: DateTime<Utc>,
    },
    ContentMismatch {
        message_id: String,
        accumulated: String,
        reported: String,
    },
    ToolCallAnomaly {
        tool_call_id: String,
        detail: String,
    },
    PatchRejected(PatchError),
    SurfaceDropped {
        surface_id: String,
        surface_type: String,
    },
    ActionQueued(ActionRequest),
    ActionResolved {
        action_id: String,
    },
    ApprovalRequested(ApprovalRequest),
    ApprovalResolved(ApprovalResolution),
}

impl Notice {
    pub fn is_repair(&self) -> bool {
        matches!(
            self,
            Notice::Repaired { .. } | Notice::ToolCallAnomaly { .. } | Notice::ContentMismatch { .. }
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Repaired { event_type, detail } => write!(f, "repaired {event_type}: {detail}"),
            Notice::Ignored { event_type, reason } => write!(f, "ignored {event_type}: {reason}"),
            Notice::TimestampRegressed { previous, received } => {
                write!(f, "timestamp went backwards: {received} < {previous}")
            }
            Notice::ContentMismatch {
                message_id,
                accumulated,
                reported,
            } => write!(
                f,
                "message {message_id}: streamed {} bytes but END reported {} bytes",
                accumulated.len(),
                reported.len()
            ),
            Notice::ToolCallAnomaly {
                tool_call_id,
                detail,
            } => write!(f, "tool call {tool_call_id}: {detail}"),
            Notice::PatchRejected(error) => write!(f, "state delta rejected: {error}"),
            Notice::SurfaceDropped {
                surface_id,
                surface_type,
            } => write!(f, "dropped surface {surface_id} of unknown type '{surface_type}'"),
            Notice::ActionQueued(action) => write!(f, "action required: {}", action.action_id),
            Notice::ActionResolved { action_id } => write!(f, "action resolved: {action_id}"),
            Notice::ApprovalRequested(approval) => {
                write!(f, "approval requested: {}", approval.approval_id)
            }
            Notice::ApprovalResolved(resolution) => write!(
                f,
                "approval {} {}",
                resolution.approval_id,
                if resolution.approved { "approved" } else { "rejected" }
            ),
        }
    }
}

/// Result of folding one event: the next state plus what happened along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: RunState,
    pub notices: Vec<Notice>,
}

/// The protocol's state machine. Stateless apart from its policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunReducer {
    pub(super) policy: ReducerPolicy,
}

impl RunReducer {
    pub fn new(policy: ReducerPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ReducerPolicy {
        self.policy
    }
}

/// Fold one event with the default policy, discarding notices.
pub fn reduce(state: RunState, event: &AgentEvent) -> RunState {
    RunReducer::default().apply(state, event).state
}

/// Working set for one reducer step.
pub(super) struct Fold<'a> {
    pub(super) state: RunState,
    pub(super) notices: Vec<Notice>,
    pub(super) policy: &'a ReducerPolicy,
    pub(super) event_type: &'static str,
}

impl<'a> Fold<'a> {
    pub(super) fn new(state: RunState, policy: &'a ReducerPolicy, event_type: &'static str) -> Self {
        Self {
            state,
            notices: Vec::new(),
            policy,
            event_type,
        }
    }

    pub(super) fn finish(self) -> Transition {
        Transition {
            state: self.state,
            notices: self.notices,
        }
    }

    pub(super) fn repair(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(event_type = self.event_type, %detail, "reconciled out-of-order event");
        self.notices.push(Notice::Repaired {
            event_type: self.event_type,
            detail,
        });
    }

    pub(super) fn ignore(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(event_type = self.event_type, %reason, "event ignored");
        self.notices.push(Notice::Ignored {
            event_type: self.event_type,
            reason,
        });
    }

    pub(super) fn notify(&mut self, notice: Notice) {
        tracing::debug!(event_type = self.event_type, %notice, "reducer notice");
        self.notices.push(notice);
    }
}
