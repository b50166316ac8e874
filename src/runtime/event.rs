use super::context::ConnectionState;
use super::timeout::{Interaction, TimeoutOutcome};
use crate::state::Notice;
use crate::types::AgentEvent;

/// Everything the stream task reports back to the caller, in order.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Connection(ConnectionState),
    /// A decoded event, delivered after it was folded into the run state.
    Event(AgentEvent),
    Notice(Notice),
    Unrecognized {
        event_type: String,
    },
    ParseFailure {
        event_type: Option<String>,
        error: String,
    },
    /// A non-fatal transport error; the stream stays open.
    TransportWarning(String),
    InteractionTimedOut {
        interaction: Interaction,
        outcome: TimeoutOutcome,
    },
    /// The stream task stopped on its own: the run ended or reconnection gave up.
    Finished(ConnectionState),
    /// The side channel refused a decision made locally.
    ActionFailed {
        interaction: Interaction,
        error: String,
    },
}
