use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// What happens when an approval or action outlives its advisory `timeout`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionTimeoutPolicy {
    /// Resolve as rejected and resume the run.
    #[default]
    Reject,
    Approve,
    /// Log the expiry and keep waiting for the caller.
    Wait,
}

impl FromStr for InteractionTimeoutPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "approve" => Ok(Self::Approve),
            "wait" => Ok(Self::Wait),
            other => Err(format!(
                "unknown interaction timeout policy '{other}': expected 'reject', 'approve' or 'wait'"
            )),
        }
    }
}

impl InteractionTimeoutPolicy {
    /// `Some(approved)` when the policy settles the interaction, `None` to keep waiting.
    pub fn decision(self) -> Option<bool> {
        match self {
            Self::Reject => Some(false),
            Self::Approve => Some(true),
            Self::Wait => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Interaction {
    Approval(String),
    Action(String),
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interaction::Approval(id) => write!(f, "approval {id}"),
            Interaction::Action(id) => write!(f, "action {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutOutcome {
    Approved,
    Rejected,
    StillPending,
}

/// Deadlines for pending interactions, polled by the stream task.
#[derive(Debug, Default)]
pub struct InteractionTimers {
    deadlines: Vec<(Instant, Duration, Interaction)>,
}

impl InteractionTimers {
    /// (Re)arm `interaction` to expire `after` from now.
    pub fn arm(&mut self, interaction: Interaction, after: Duration) {
        self.disarm(&interaction);
        self.deadlines
            .push((Instant::now() + after, after, interaction));
    }

    pub fn disarm(&mut self, interaction: &Interaction) {
        self.deadlines.retain(|(_, _, armed)| armed != interaction);
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().map(|(deadline, _, _)| *deadline).min()
    }

    /// Remove and return every interaction due at `now`, with its configured timeout.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(Interaction, Duration)> {
        let mut expired = Vec::new();
        self.deadlines.retain(|(deadline, after, interaction)| {
            if *deadline <= now {
                expired.push((interaction.clone(), *after));
                false
            } else {
                true
            }
        });
        expired
    }
}
