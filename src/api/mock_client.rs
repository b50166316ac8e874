use crate::api::actions::{ActionChannel, ActionError};
use crate::api::client::{ByteStream, EventTransport, TransportError};
use crate::types::{ApprovalResolution, SurfaceActionRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::Url;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What one `open()` call on a [`MockTransport`] yields.
#[derive(Debug, Clone)]
pub enum MockSession {
    /// The open itself fails.
    Refuse(TransportError),
    /// The stream yields `chunks`, then either ends or stays open forever.
    Stream {
        chunks: Vec<Result<String, TransportError>>,
        hold_open: bool,
    },
}

impl MockSession {
    /// Frames that end with the stream closing.
    pub fn frames(frames: Vec<String>) -> Self {
        Self::Stream {
            chunks: frames.into_iter().map(Ok).collect(),
            hold_open: false,
        }
    }

    /// Frames followed by a stream that never ends.
    pub fn held_open(frames: Vec<String>) -> Self {
        Self::Stream {
            chunks: frames.into_iter().map(Ok).collect(),
            hold_open: true,
        }
    }

    pub fn refused(reason: &str) -> Self {
        Self::Refuse(TransportError::Unreachable {
            url: "mock://transport".to_string(),
            reason: reason.to_string(),
        })
    }
}

/// Scripted [`EventTransport`]: each `open()` pops the next session.
/// Once the script runs out every open is refused.
#[derive(Clone, Default)]
pub struct MockTransport {
    sessions: Arc<Mutex<VecDeque<MockSession>>>,
    opened: Arc<Mutex<Vec<(Url, Option<String>)>>>,
}

impl MockTransport {
    pub fn new(sessions: Vec<MockSession>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into())),
            opened: Arc::default(),
        }
    }

    pub fn push(&self, session: MockSession) {
        lock(&self.sessions).push_back(session);
    }

    /// Number of `open()` calls so far, refused ones included.
    pub fn open_count(&self) -> usize {
        lock(&self.opened).len()
    }

    pub fn opened_urls(&self) -> Vec<Url> {
        lock(&self.opened).iter().map(|(url, _)| url.clone()).collect()
    }

    /// `Last-Event-ID` passed to each `open()` call, in order.
    pub fn resumed_from(&self) -> Vec<Option<String>> {
        lock(&self.opened).iter().map(|(_, id)| id.clone()).collect()
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn open(
        &self,
        url: &Url,
        last_event_id: Option<&str>,
    ) -> Result<ByteStream, TransportError> {
        lock(&self.opened).push((url.clone(), last_event_id.map(str::to_string)));
        let session = lock(&self.sessions).pop_front();
        match session {
            None => Err(TransportError::Unreachable {
                url: url.to_string(),
                reason: "MockTransport: no more sessions configured".to_string(),
            }),
            Some(MockSession::Refuse(error)) => Err(error),
            Some(MockSession::Stream { chunks, hold_open }) => {
                let chunks = stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| chunk.map(Bytes::from))
                        .collect::<Vec<_>>(),
                );
                if hold_open {
                    Ok(Box::pin(chunks.chain(stream::pending())))
                } else {
                    Ok(Box::pin(chunks))
                }
            }
        }
    }
}

/// One SSE frame: `event: {event_type}` plus the JSON body on a `data:` line.
pub fn frame(event_type: &str, data: &Value) -> String {
    format!("event: {event_type}\ndata: {data}\n\n")
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedAction {
    Approval {
        workflow_id: String,
        resolution: ApprovalResolution,
    },
    SurfaceAction {
        workflow_id: String,
        action: SurfaceActionRequest,
    },
}

/// [`ActionChannel`] that remembers what it was asked to send.
#[derive(Clone, Default)]
pub struct RecordingActionChannel {
    recorded: Arc<Mutex<Vec<RecordedAction>>>,
    fail_with: Option<ActionError>,
}

impl RecordingActionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: ActionError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<RecordedAction> {
        lock(&self.recorded).clone()
    }

    fn record(&self, action: RecordedAction) -> Result<(), ActionError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        lock(&self.recorded).push(action);
        Ok(())
    }
}

#[async_trait]
impl ActionChannel for RecordingActionChannel {
    async fn resolve_approval(
        &self,
        workflow_id: &str,
        resolution: &ApprovalResolution,
    ) -> Result<(), ActionError> {
        self.record(RecordedAction::Approval {
            workflow_id: workflow_id.to_string(),
            resolution: resolution.clone(),
        })
    }

    async fn submit_surface_action(
        &self,
        workflow_id: &str,
        action: &SurfaceActionRequest,
    ) -> Result<(), ActionError> {
        self.record(RecordedAction::SurfaceAction {
            workflow_id: workflow_id.to_string(),
            action: action.clone(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
