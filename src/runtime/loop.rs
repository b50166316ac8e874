use super::context::{ConnectionState, ConnectionStatus, StreamContext};
use super::event::StreamUpdate;
use super::timeout::{Interaction, InteractionTimeoutPolicy, InteractionTimers, TimeoutOutcome};
use crate::api::logging::{emit_sse_parse_error, emit_unrecognized_event};
use crate::api::{ActionChannel, ByteStream, EventTransport, RawMessage, StreamParser};
use crate::state::{Notice, RunReducer};
use crate::types::{decode_message, ApprovalResolution, Decoded, EventKind};
use futures::StreamExt;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Why one connection stopped delivering.
#[derive(Debug)]
enum StreamEnd {
    Cancelled,
    RunEnded,
    Dropped(String),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    RunEnded,
}

/// The per-connection worker: open, pump, reconnect, until cancelled or done.
pub(crate) struct StreamTask {
    pub(crate) transport: Arc<dyn EventTransport>,
    pub(crate) actions: Option<Arc<dyn ActionChannel>>,
    pub(crate) context: Arc<StreamContext>,
    pub(crate) reducer: RunReducer,
    pub(crate) url: Url,
    pub(crate) workflow_id: String,
    pub(crate) max_reconnect_attempts: u32,
    pub(crate) reconnect_delay: Duration,
    pub(crate) timeout_policy: InteractionTimeoutPolicy,
    /// Send `Last-Event-ID` when reopening after a drop.
    pub(crate) resume_from_last_event_id: bool,
    pub(crate) cancel: CancellationToken,
}

impl StreamTask {
    pub(crate) async fn run(self) {
        self.stream().await;
        if !self.cancel.is_cancelled() {
            self.context
                .publish(StreamUpdate::Finished(self.context.connection_state()));
        }
    }

    async fn stream(&self) {
        let mut attempts: u32 = 0;
        let mut timers = InteractionTimers::default();
        let mut last_event_id: Option<String> = None;

        loop {
            self.set_status(ConnectionStatus::Connecting, attempts, None);
            let resume_from = last_event_id
                .as_deref()
                .filter(|_| self.resume_from_last_event_id);
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                opened = self.transport.open(&self.url, resume_from) => opened,
            };

            let end = match opened {
                Ok(stream) => {
                    attempts = 0;
                    self.set_status(ConnectionStatus::Connected, 0, None);
                    tracing::debug!(url = %self.url, "event stream connected");
                    self.pump(stream, &mut timers, &mut last_event_id).await
                }
                Err(error) => StreamEnd::Dropped(error.to_string()),
            };

            let reason = match end {
                StreamEnd::Cancelled => return,
                StreamEnd::RunEnded => {
                    tracing::debug!("run ended; closing event stream");
                    self.set_status(ConnectionStatus::Closed, attempts, None);
                    return;
                }
                StreamEnd::Dropped(reason) => reason,
            };

            if self.context.run_is_terminal() {
                tracing::debug!(%reason, "stream dropped after the run ended; not reconnecting");
                self.set_status(ConnectionStatus::Closed, attempts, None);
                return;
            }
            if attempts >= self.max_reconnect_attempts {
                tracing::error!(
                    attempts,
                    %reason,
                    "event stream lost; reconnection attempts exhausted"
                );
                let message = format!("gave up after {attempts} reconnection attempts: {reason}");
                self.set_status(ConnectionStatus::Error, attempts, Some(message));
                return;
            }

            attempts += 1;
            let delay = self.reconnect_delay * attempts;
            tracing::warn!(
                attempt = attempts,
                max = self.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "event stream lost; reconnecting"
            );
            self.set_status(ConnectionStatus::Error, attempts, Some(reason));
            if !self.backoff(delay, &mut timers).await {
                return;
            }
        }
    }

    /// Sleep for `delay`, still honoring interaction deadlines. False when cancelled.
    async fn backoff(&self, delay: Duration, timers: &mut InteractionTimers) -> bool {
        let wake_at = Instant::now() + delay;
        loop {
            let deadline = timers.next_deadline().filter(|deadline| *deadline < wake_at);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                _ = sleep_until_some(deadline) => self.expire_timers(timers),
                _ = sleep_until(wake_at) => return true,
            }
        }
    }

    async fn pump(
        &self,
        mut stream: ByteStream,
        timers: &mut InteractionTimers,
        last_event_id: &mut Option<String>,
    ) -> StreamEnd {
        let mut parser = StreamParser::new();
        loop {
            let deadline = timers.next_deadline();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                _ = sleep_until_some(deadline) => self.expire_timers(timers),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for message in parser.process(&bytes) {
                            if self.dispatch(message, timers) == Flow::RunEnded {
                                return StreamEnd::RunEnded;
                            }
                        }
                        if let Some(id) = parser.last_event_id() {
                            *last_event_id = Some(id.to_string());
                        }
                    }
                    Some(Err(error)) if !error.is_terminal() => {
                        tracing::warn!(%error, "transient transport error; stream still open");
                        let state = self.context.connection_state();
                        self.set_status(state.status, state.reconnect_attempts, Some(error.to_string()));
                        self.context.publish(StreamUpdate::TransportWarning(error.to_string()));
                    }
                    Some(Err(error)) => return StreamEnd::Dropped(error.to_string()),
                    None => {
                        let leftover = parser.flush();
                        if !leftover.trim().is_empty() {
                            tracing::warn!(bytes = leftover.len(), "stream closed mid-message; partial frame discarded");
                        }
                        return StreamEnd::Dropped("stream closed by server".to_string());
                    }
                },
            }
        }
    }

    fn dispatch(&self, message: RawMessage, timers: &mut InteractionTimers) -> Flow {
        match decode_message(message.event.as_deref(), &message.data) {
            Decoded::Event(event) => {
                if matches!(event.kind, EventKind::KeepAlive) {
                    tracing::trace!("keep-alive");
                    return Flow::Continue;
                }
                self.context.record_event(event.clone());
                let notices = self
                    .context
                    .transition(|state| self.reducer.apply(state, &event));
                let terminal_event = event.kind.is_terminal();
                self.context.publish(StreamUpdate::Event(event));
                for notice in notices {
                    track_interaction(&notice, timers);
                    self.context.publish(StreamUpdate::Notice(notice));
                }

                if terminal_event && self.context.run_is_terminal() {
                    timers.clear();
                    return Flow::RunEnded;
                }
                Flow::Continue
            }
            Decoded::Unrecognized { event_type } => {
                emit_unrecognized_event(&event_type);
                self.context
                    .publish(StreamUpdate::Unrecognized { event_type });
                Flow::Continue
            }
            Decoded::Malformed { event_type, error } => {
                emit_sse_parse_error(event_type.as_deref(), &message.data, &error);
                self.context
                    .publish(StreamUpdate::ParseFailure { event_type, error });
                Flow::Continue
            }
        }
    }

    fn expire_timers(&self, timers: &mut InteractionTimers) {
        for (interaction, after) in timers.take_expired(Instant::now()) {
            self.on_timeout(interaction, after);
        }
    }

    fn on_timeout(&self, interaction: Interaction, after: Duration) {
        let state = self.context.run_state();
        let still_pending = match &interaction {
            Interaction::Approval(id) => state
                .pending_approval
                .as_ref()
                .is_some_and(|pending| &pending.approval_id == id),
            Interaction::Action(id) => state
                .pending_actions
                .iter()
                .any(|pending| &pending.action_id == id),
        };
        if !still_pending || state.is_terminal() {
            return;
        }

        let Some(approved) = self.timeout_policy.decision() else {
            tracing::warn!(
                %interaction,
                timeout_ms = after.as_millis() as u64,
                "interaction timed out; waiting for the caller"
            );
            self.context.publish(StreamUpdate::InteractionTimedOut {
                interaction,
                outcome: TimeoutOutcome::StillPending,
            });
            return;
        };

        let outcome = if approved {
            TimeoutOutcome::Approved
        } else {
            TimeoutOutcome::Rejected
        };
        tracing::warn!(
            %interaction,
            timeout_ms = after.as_millis() as u64,
            ?outcome,
            "interaction timed out; resolving by policy"
        );

        let notices = match &interaction {
            Interaction::Approval(id) => {
                let resolution = ApprovalResolution {
                    approval_id: id.clone(),
                    approved,
                    reason: Some(format!("timed out after {} ms", after.as_millis())),
                };
                let notices = self
                    .context
                    .transition(|state| self.reducer.resolve_approval(state, &resolution));
                self.forward_approval(interaction.clone(), resolution);
                notices
            }
            Interaction::Action(id) => self
                .context
                .transition(|state| self.reducer.resolve_action(state, id)),
        };
        for notice in notices {
            self.context.publish(StreamUpdate::Notice(notice));
        }
        self.context
            .publish(StreamUpdate::InteractionTimedOut { interaction, outcome });
    }

    fn forward_approval(&self, interaction: Interaction, resolution: ApprovalResolution) {
        let Some(actions) = self.actions.clone() else {
            return;
        };
        let context = Arc::clone(&self.context);
        let workflow_id = self.workflow_id.clone();
        tokio::spawn(async move {
            if let Err(error) = actions.resolve_approval(&workflow_id, &resolution).await {
                tracing::warn!(%error, %interaction, "failed to forward timed-out approval");
                context.publish(StreamUpdate::ActionFailed {
                    interaction,
                    error: error.to_string(),
                });
            }
        });
    }

    fn set_status(&self, status: ConnectionStatus, reconnect_attempts: u32, error: Option<String>) {
        self.context.set_connection(ConnectionState {
            status,
            reconnect_attempts,
            error,
        });
    }
}

/// Arm timers for new interactions and drop them once resolved.
fn track_interaction(notice: &Notice, timers: &mut InteractionTimers) {
    match notice {
        Notice::ApprovalRequested(request) => {
            if let Some(timeout_ms) = request.timeout_ms {
                timers.arm(
                    Interaction::Approval(request.approval_id.clone()),
                    Duration::from_millis(timeout_ms),
                );
            }
        }
        Notice::ActionQueued(request) => {
            if let Some(timeout_ms) = request.timeout_ms {
                timers.arm(
                    Interaction::Action(request.action_id.clone()),
                    Duration::from_millis(timeout_ms),
                );
            }
        }
        Notice::ApprovalResolved(resolution) => {
            timers.disarm(&Interaction::Approval(resolution.approval_id.clone()))
        }
        Notice::ActionResolved { action_id } => {
            timers.disarm(&Interaction::Action(action_id.clone()))
        }
        _ => {}
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
