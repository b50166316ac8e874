use runwire::api::mock_client::{frame, MockSession, MockTransport, RecordedAction, RecordingActionChannel};
use runwire::api::{ActionError, TransportError};
use runwire::runtime::{
    ConnectionState, ConnectionStatus, Interaction, InteractionTimeoutPolicy, ManagerError,
    TimeoutOutcome,
};
use runwire::state::{Notice, RunStatus};
use runwire::types::ApprovalResolution;
use runwire::{Config, ConnectParams, ConnectionManager, StreamUpdate};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

const GUARD: Duration = Duration::from_secs(600);

fn config(max_reconnect_attempts: u32) -> Config {
    Config {
        max_reconnect_attempts,
        reconnect_delay_ms: 1000,
        ..Config::default()
    }
}

/// SSE frame for run `run-1`, `second` seconds into the run.
fn ev(second: u32, event_type: &str, body: Value) -> String {
    let mut body = body;
    if let Some(object) = body.as_object_mut() {
        object.insert("runId".to_string(), json!("run-1"));
        object.insert("sessionId".to_string(), json!("session-1"));
        object.insert(
            "timestamp".to_string(),
            json!(format!("2024-05-01T12:00:{second:02}Z")),
        );
    }
    frame(event_type, &body)
}

fn run_started(second: u32) -> String {
    ev(
        second,
        "RUN_STARTED",
        json!({"workflowId": "wf-1", "steps": [{"id": "s1", "label": "Plan"}, {"id": "s2", "label": "Act"}]}),
    )
}

/// Collect updates until the stream task reports it finished.
async fn until_finished(
    updates: &mut UnboundedReceiver<StreamUpdate>,
) -> (Vec<StreamUpdate>, ConnectionState) {
    let mut seen = Vec::new();
    let finished = tokio::time::timeout(GUARD, async {
        while let Some(update) = updates.recv().await {
            if let StreamUpdate::Finished(state) = update {
                return state;
            }
            seen.push(update);
        }
        panic!("update channel closed before the stream finished");
    })
    .await
    .expect("stream should finish");
    (seen, finished)
}

/// Wait for the first update matching `predicate`.
async fn until<F>(updates: &mut UnboundedReceiver<StreamUpdate>, predicate: F) -> StreamUpdate
where
    F: Fn(&StreamUpdate) -> bool,
{
    tokio::time::timeout(GUARD, async {
        loop {
            match updates.recv().await {
                Some(update) if predicate(&update) => return update,
                Some(_) => continue,
                None => panic!("update channel closed"),
            }
        }
    })
    .await
    .expect("expected update never arrived")
}

/// Paused time lands on timer ticks, so allow a few milliseconds of rounding.
fn assert_elapsed(since: Instant, expected: Duration) {
    let elapsed = since.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(10),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

fn connection_history(updates: &[StreamUpdate]) -> Vec<ConnectionState> {
    updates
        .iter()
        .filter_map(|update| match update {
            StreamUpdate::Connection(state) => Some(state.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_run_to_completion_closes_the_stream() {
    let transport = MockTransport::new(vec![MockSession::held_open(vec![
        run_started(0),
        ev(1, "STEP_STARTED", json!({"stepIndex": 0, "stepId": "s1"})),
        ev(2, "KEEP_ALIVE", json!({})),
        ev(3, "STEP_FINISHED", json!({"stepIndex": 0, "stepId": "s1"})),
        ev(4, "RUN_FINISHED", json!({"result": {"ok": true}})),
    ])]);
    let (mut manager, mut updates) = ConnectionManager::new(config(3), Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let (seen, finished) = until_finished(&mut updates).await;

    assert_eq!(finished.status, ConnectionStatus::Closed);
    assert_eq!(manager.connection_state().status, ConnectionStatus::Closed);
    assert_eq!(transport.open_count(), 1);
    assert_eq!(
        transport.opened_urls()[0].as_str(),
        "http://localhost:8000/stream/workflow/wf-1"
    );

    let state = manager.run_state();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.steps[0].status, runwire::state::StepStatus::Completed);
    assert_eq!(state.result, Some(json!({"ok": true})));
    assert_eq!(manager.events().len(), 4, "keep-alives are not logged");

    let statuses: Vec<_> = connection_history(&seen).iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![ConnectionStatus::Connecting, ConnectionStatus::Connected, ConnectionStatus::Closed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnection_is_bounded_and_linear() {
    let transport = MockTransport::new(vec![
        MockSession::refused("down"),
        MockSession::refused("still down"),
        MockSession::refused("gone"),
    ]);
    let (mut manager, mut updates) = ConnectionManager::new(config(2), Arc::new(transport.clone()));
    let started = Instant::now();

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let (seen, finished) = until_finished(&mut updates).await;

    // 1s before the first retry, 2s before the second.
    assert_elapsed(started, Duration::from_millis(3000));
    assert_eq!(transport.open_count(), 3);
    assert_eq!(finished.status, ConnectionStatus::Error);
    assert_eq!(finished.reconnect_attempts, 2);
    assert!(finished
        .error
        .as_deref()
        .is_some_and(|error| error.contains("gave up")));

    let max_attempts = connection_history(&seen)
        .iter()
        .map(|state| state.reconnect_attempts)
        .max();
    assert_eq!(max_attempts, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_zero_attempts_fails_without_retrying() {
    let transport = MockTransport::new(vec![MockSession::refused("down")]);
    let (mut manager, mut updates) = ConnectionManager::new(config(0), Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let (_, finished) = until_finished(&mut updates).await;

    assert_eq!(finished.status, ConnectionStatus::Error);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_successful_reopen_resets_attempts_and_keeps_run_state() {
    let transport = MockTransport::new(vec![
        MockSession::frames(vec![run_started(0)]),
        MockSession::frames(vec![ev(1, "STEP_STARTED", json!({"stepIndex": 0}))]),
        MockSession::held_open(vec![
            ev(2, "STEP_FINISHED", json!({"stepIndex": 0})),
            ev(3, "RUN_FINISHED", json!({})),
        ]),
    ]);
    let (mut manager, mut updates) = ConnectionManager::new(config(1), Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let (seen, finished) = until_finished(&mut updates).await;

    assert_eq!(finished.status, ConnectionStatus::Closed);
    assert_eq!(transport.open_count(), 3);
    let max_attempts = connection_history(&seen)
        .iter()
        .map(|state| state.reconnect_attempts)
        .max();
    assert_eq!(max_attempts, Some(1));

    let state = manager.run_state();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.steps.len(), 2);
    assert!(state.started_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_drop_after_terminal_run_does_not_reconnect() {
    // RUN_FINISHED arrives in the same chunk the server then closes.
    let transport = MockTransport::new(vec![MockSession::frames(vec![
        run_started(0),
        ev(1, "RUN_ERROR", json!({"error": "model overloaded", "code": "E_CAPACITY"})),
    ])]);
    let (mut manager, mut updates) = ConnectionManager::new(config(5), Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let (_, finished) = until_finished(&mut updates).await;

    assert_eq!(finished.status, ConnectionStatus::Closed);
    assert_eq!(transport.open_count(), 1);
    let state = manager.run_state();
    assert_eq!(state.status, RunStatus::Error);
    assert_eq!(
        state.error.map(|failure| failure.message),
        Some("model overloaded".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff_cancels_reconnect() {
    let transport = MockTransport::new(vec![MockSession::refused("down")]);
    let (mut manager, mut updates) = ConnectionManager::new(config(5), Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    until(&mut updates, |update| {
        matches!(update, StreamUpdate::Connection(state) if state.status == ConnectionStatus::Error)
    })
    .await;

    manager.disconnect().await;
    assert_eq!(manager.connection_state().status, ConnectionStatus::Closed);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(manager.connection_state().status, ConnectionStatus::Closed);

    manager.disconnect().await;
    assert_eq!(manager.connection_state().status, ConnectionStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replaces_previous_stream() {
    let transport = MockTransport::new(vec![
        MockSession::held_open(vec![run_started(0)]),
        MockSession::held_open(vec![]),
    ]);
    let (mut manager, mut updates) = ConnectionManager::new(config(3), Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-a")).await.expect("first connect");
    until(&mut updates, |update| matches!(update, StreamUpdate::Event(_))).await;
    assert_eq!(manager.run_state().status, RunStatus::Running);

    manager
        .connect(ConnectParams::new("wf-b").with_query("cursor", "42"))
        .await
        .expect("second connect");
    until(&mut updates, |update| {
        matches!(update, StreamUpdate::Connection(state) if state.status == ConnectionStatus::Connected)
    })
    .await;

    let urls = transport.opened_urls();
    assert_eq!(urls.len(), 2);
    assert_eq!(urls[1].as_str(), "http://localhost:8000/stream/workflow/wf-b?cursor=42");

    let state = manager.run_state();
    assert_eq!(state.status, RunStatus::Idle);
    assert_eq!(state.workflow_id.as_deref(), Some("wf-b"));
    assert_eq!(manager.events().len(), 1, "event log survives connect");

    manager.clear_events();
    assert!(manager.events().is_empty());
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_workflow_id_is_rejected() {
    let (mut manager, _updates) =
        ConnectionManager::new(config(1), Arc::new(MockTransport::default()));

    let error = manager
        .connect(ConnectParams::new("nested/path"))
        .await
        .expect_err("slashed id");
    assert!(matches!(error, ManagerError::InvalidTarget(_)));
    assert_eq!(manager.connection_state().status, ConnectionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_bad_messages_do_not_stop_the_stream() {
    let transport = MockTransport::new(vec![MockSession::held_open(vec![
        "event: STEP_STARTED\ndata: {not json\n\n".to_string(),
        frame("FUTURE_EVENT", &json!({"runId": "run-1"})),
        run_started(0),
        ev(1, "RUN_FINISHED", json!({})),
    ])]);
    let (mut manager, mut updates) = ConnectionManager::new(config(1), Arc::new(transport));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let (seen, finished) = until_finished(&mut updates).await;

    assert_eq!(finished.status, ConnectionStatus::Closed);
    assert!(seen.iter().any(|update| matches!(
        update,
        StreamUpdate::ParseFailure { event_type: Some(event_type), .. } if event_type == "STEP_STARTED"
    )));
    assert!(seen.iter().any(|update| matches!(
        update,
        StreamUpdate::Unrecognized { event_type } if event_type == "FUTURE_EVENT"
    )));
    assert_eq!(manager.run_state().status, RunStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_keeps_connection_open() {
    let transport = MockTransport::new(vec![MockSession::Stream {
        chunks: vec![
            Ok(run_started(0)),
            Err(TransportError::Transient("corrupt chunk".to_string())),
            Ok(ev(1, "RUN_FINISHED", json!({}))),
        ],
        hold_open: true,
    }]);
    let (mut manager, mut updates) = ConnectionManager::new(config(1), Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let (seen, finished) = until_finished(&mut updates).await;

    assert_eq!(finished.status, ConnectionStatus::Closed);
    assert_eq!(transport.open_count(), 1);
    assert!(seen
        .iter()
        .any(|update| matches!(update, StreamUpdate::TransportWarning(_))));
    assert!(connection_history(&seen)
        .iter()
        .any(|state| state.status == ConnectionStatus::Connected
            && state.error.as_deref().is_some_and(|e| e.contains("corrupt chunk"))));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_approval_is_rejected_after_timeout() {
    let transport = MockTransport::new(vec![MockSession::held_open(vec![
        run_started(0),
        ev(
            1,
            "APPROVAL_REQUESTED",
            json!({"approvalId": "a1", "title": "Ship it?", "timeout": 5000}),
        ),
    ])]);
    let actions = RecordingActionChannel::new();
    let (manager, mut updates) = ConnectionManager::new(config(1), Arc::new(transport));
    let mut manager = manager.with_action_channel(Arc::new(actions.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    until(&mut updates, |update| {
        matches!(update, StreamUpdate::Notice(Notice::ApprovalRequested(_)))
    })
    .await;
    assert_eq!(manager.run_state().status, RunStatus::Paused);
    let requested_at = Instant::now();

    let timed_out = until(&mut updates, |update| {
        matches!(update, StreamUpdate::InteractionTimedOut { .. })
    })
    .await;
    assert_elapsed(requested_at, Duration::from_millis(5000));
    assert!(matches!(
        timed_out,
        StreamUpdate::InteractionTimedOut {
            interaction: Interaction::Approval(ref id),
            outcome: TimeoutOutcome::Rejected,
        } if id == "a1"
    ));

    let state = manager.run_state();
    assert_eq!(state.status, RunStatus::Running);
    assert!(state.pending_approval.is_none());

    for _ in 0..10 {
        if !actions.recorded().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(matches!(
        actions.recorded().as_slice(),
        [RecordedAction::Approval { workflow_id, resolution }]
            if workflow_id == "wf-1" && !resolution.approved
    ));
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_policy_keeps_approval_pending() {
    let transport = MockTransport::new(vec![MockSession::held_open(vec![
        run_started(0),
        ev(1, "APPROVAL_REQUESTED", json!({"approvalId": "a1", "timeout": 1000})),
    ])]);
    let config = Config {
        interaction_timeouts: InteractionTimeoutPolicy::Wait,
        ..config(1)
    };
    let (mut manager, mut updates) = ConnectionManager::new(config, Arc::new(transport));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let timed_out = until(&mut updates, |update| {
        matches!(update, StreamUpdate::InteractionTimedOut { .. })
    })
    .await;

    assert!(matches!(
        timed_out,
        StreamUpdate::InteractionTimedOut {
            outcome: TimeoutOutcome::StillPending,
            ..
        }
    ));
    assert_eq!(manager.run_state().status, RunStatus::Paused);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_resolve_approval_forwards_then_resumes() {
    let transport = MockTransport::new(vec![MockSession::held_open(vec![
        run_started(0),
        ev(1, "APPROVAL_REQUESTED", json!({"approvalId": "a1"})),
    ])]);
    let actions = RecordingActionChannel::new();
    let (manager, mut updates) = ConnectionManager::new(config(1), Arc::new(transport));
    let mut manager = manager.with_action_channel(Arc::new(actions.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    until(&mut updates, |update| {
        matches!(update, StreamUpdate::Notice(Notice::ApprovalRequested(_)))
    })
    .await;

    let notices = manager
        .resolve_approval(ApprovalResolution {
            approval_id: "a1".to_string(),
            approved: true,
            reason: None,
        })
        .await
        .expect("resolution accepted");

    assert!(notices
        .iter()
        .any(|notice| matches!(notice, Notice::ApprovalResolved(r) if r.approved)));
    assert_eq!(manager.run_state().status, RunStatus::Running);
    assert_eq!(actions.recorded().len(), 1);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_forward_leaves_approval_pending() {
    let transport = MockTransport::new(vec![MockSession::held_open(vec![
        run_started(0),
        ev(1, "APPROVAL_REQUESTED", json!({"approvalId": "a1"})),
    ])]);
    let actions = RecordingActionChannel::failing(ActionError::Status {
        url: "http://localhost:8000/workflow/wf-1/approval".to_string(),
        status: 500,
    });
    let (manager, mut updates) = ConnectionManager::new(config(1), Arc::new(transport));
    let mut manager = manager.with_action_channel(Arc::new(actions));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    until(&mut updates, |update| {
        matches!(update, StreamUpdate::Notice(Notice::ApprovalRequested(_)))
    })
    .await;

    let error = manager
        .resolve_approval(ApprovalResolution {
            approval_id: "a1".to_string(),
            approved: true,
            reason: None,
        })
        .await
        .expect_err("channel refuses");
    assert!(matches!(error, ManagerError::Action(ActionError::Status { status: 500, .. })));
    assert_eq!(manager.run_state().status, RunStatus::Paused);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_surface_action_requires_channel_and_connection() {
    let (manager, _updates) =
        ConnectionManager::new(config(1), Arc::new(MockTransport::default()));
    let action = runwire::types::SurfaceActionRequest {
        surface_id: "buttons-1".to_string(),
        action_id: "retry".to_string(),
        payload: None,
    };

    let error = manager
        .submit_surface_action(action.clone())
        .await
        .expect_err("not connected");
    assert!(matches!(error, ManagerError::NotConnected));

    let transport = MockTransport::new(vec![MockSession::held_open(vec![])]);
    let actions = RecordingActionChannel::new();
    let (manager, _updates) = ConnectionManager::new(config(1), Arc::new(transport));
    let mut manager = manager.with_action_channel(Arc::new(actions.clone()));
    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");

    manager
        .submit_surface_action(action.clone())
        .await
        .expect("forwarded");
    assert_eq!(
        actions.recorded(),
        vec![RecordedAction::SurfaceAction {
            workflow_id: "wf-1".to_string(),
            action,
        }]
    );
    manager.disconnect().await;
}

fn with_id(id: &str, frame: String) -> String {
    format!("id: {id}\n{frame}")
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resumes_from_last_event_id() {
    let transport = MockTransport::new(vec![
        MockSession::frames(vec![
            with_id("1", run_started(0)),
            with_id("2", ev(1, "STEP_STARTED", json!({"stepIndex": 0}))),
        ]),
        MockSession::refused("blip"),
        MockSession::held_open(vec![with_id(
            "3",
            ev(2, "RUN_FINISHED", json!({})),
        )]),
    ]);
    let config = Config {
        resume_from_last_event_id: true,
        ..config(3)
    };
    let (mut manager, mut updates) = ConnectionManager::new(config, Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    let (_, finished) = until_finished(&mut updates).await;

    assert_eq!(finished.status, ConnectionStatus::Closed);
    assert_eq!(
        transport.resumed_from(),
        vec![None, Some("2".to_string()), Some("2".to_string())]
    );
    assert_eq!(manager.run_state().status, RunStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_last_event_id_not_sent_unless_enabled() {
    let transport = MockTransport::new(vec![
        MockSession::frames(vec![with_id("1", run_started(0))]),
        MockSession::held_open(vec![ev(1, "RUN_FINISHED", json!({}))]),
    ]);
    let (mut manager, mut updates) = ConnectionManager::new(config(3), Arc::new(transport.clone()));

    manager.connect(ConnectParams::new("wf-1")).await.expect("connect");
    until_finished(&mut updates).await;

    assert_eq!(transport.resumed_from(), vec![None, None]);
}
