use anyhow::{bail, Context, Result};
use clap::Parser;
use runwire::api::logging::init_tracing;
use runwire::api::{HttpActionChannel, HttpTransport};
use runwire::runtime::{ConnectionStatus, InteractionTimeoutPolicy};
use runwire::state::{RunState, UnknownSurfacePolicy};
use runwire::{Config, ConnectParams, ConnectionManager, StreamUpdate};
use serde_json::json;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "runwatch")]
#[command(about = "Follow an agent workflow's run-state event stream")]
#[command(version)]
struct Cli {
    /// Workflow to follow (defaults to RUNWIRE_WORKFLOW_ID)
    workflow_id: Option<String>,

    /// Agent server base URL (overrides RUNWIRE_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Continuation query parameter, repeatable: --query cursor=abc
    #[arg(long = "query", value_name = "KEY=VALUE", value_parser = parse_query_pair)]
    query: Vec<(String, String)>,

    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// drop | retain
    #[arg(long)]
    unknown_surfaces: Option<UnknownSurfacePolicy>,

    /// reject | approve | wait
    #[arg(long)]
    interaction_timeouts: Option<InteractionTimeoutPolicy>,

    /// Treat ACTION_REQUIRED as blocking
    #[arg(long)]
    action_required_blocks: bool,

    /// Send Last-Event-ID when reconnecting
    #[arg(long)]
    resume: bool,

    /// Print JSON lines instead of text
    #[arg(long)]
    json: bool,
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

impl Cli {
    fn apply_to(&self, config: &mut Config) {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(workflow_id) = &self.workflow_id {
            config.workflow_id = Some(workflow_id.clone());
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(delay_ms) = self.reconnect_delay_ms {
            config.reconnect_delay_ms = delay_ms;
        }
        if let Some(policy) = self.unknown_surfaces {
            config.unknown_surfaces = policy;
        }
        if let Some(policy) = self.interaction_timeouts {
            config.interaction_timeouts = policy;
        }
        if self.action_required_blocks {
            config.action_required_blocks = true;
        }
        if self.resume {
            config.resume_from_last_event_id = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let mut config = Config::load()?;
    cli.apply_to(&mut config);
    config.validate()?;
    let Some(workflow_id) = config.workflow_id.clone() else {
        bail!("no workflow given: pass WORKFLOW_ID or set RUNWIRE_WORKFLOW_ID");
    };

    let transport = Arc::new(HttpTransport::new());
    let actions = Arc::new(HttpActionChannel::new(config.clone()));
    let (manager, mut updates) = ConnectionManager::new(config, transport);
    let mut manager = manager.with_action_channel(actions);

    let mut params = ConnectParams::new(workflow_id);
    params.query = cli.query.clone();
    manager
        .connect(params)
        .await
        .context("failed to start the event stream")?;

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.disconnect().await;
                break None;
            }
            update = updates.recv() => match update {
                Some(StreamUpdate::Finished(state)) => break Some(state),
                Some(update) => print_update(&update, cli.json),
                None => break None,
            },
        }
    };

    print_run_state(&manager.run_state(), cli.json);
    match outcome {
        Some(state) if state.status == ConnectionStatus::Error => {
            bail!(
                "event stream failed: {}",
                state.error.unwrap_or_else(|| "unknown error".to_string())
            )
        }
        _ => Ok(()),
    }
}

fn print_update(update: &StreamUpdate, as_json: bool) {
    if as_json {
        let line = match update {
            StreamUpdate::Event(event) => json!({ "event": event }),
            StreamUpdate::Connection(state) => json!({ "connection": state }),
            StreamUpdate::Notice(notice) => json!({ "notice": notice.to_string() }),
            StreamUpdate::Unrecognized { event_type } => {
                json!({ "unrecognized": event_type })
            }
            StreamUpdate::ParseFailure { event_type, error } => {
                json!({ "parseFailure": { "eventType": event_type, "error": error } })
            }
            StreamUpdate::TransportWarning(warning) => json!({ "transportWarning": warning }),
            StreamUpdate::InteractionTimedOut {
                interaction,
                outcome,
            } => json!({
                "interactionTimedOut": { "interaction": interaction.to_string(), "outcome": outcome }
            }),
            StreamUpdate::ActionFailed { interaction, error } => json!({
                "actionFailed": { "interaction": interaction.to_string(), "error": error }
            }),
            StreamUpdate::Finished(state) => json!({ "finished": state }),
        };
        println!("{line}");
        return;
    }

    match update {
        StreamUpdate::Event(event) => println!("[event] {}", event.type_name()),
        StreamUpdate::Connection(state) => match &state.error {
            Some(error) => println!(
                "[connection] {:?} (attempt {}): {error}",
                state.status, state.reconnect_attempts
            ),
            None => println!("[connection] {:?}", state.status),
        },
        StreamUpdate::Notice(notice) => println!("[notice] {notice}"),
        StreamUpdate::Unrecognized { event_type } => {
            println!("[skip] unrecognized event {event_type}")
        }
        StreamUpdate::ParseFailure { event_type, error } => println!(
            "[skip] malformed {}: {error}",
            event_type.as_deref().unwrap_or("message")
        ),
        StreamUpdate::TransportWarning(warning) => println!("[transport] {warning}"),
        StreamUpdate::InteractionTimedOut {
            interaction,
            outcome,
        } => println!("[timeout] {interaction}: {outcome:?}"),
        StreamUpdate::ActionFailed { interaction, error } => {
            println!("[action] {interaction} not delivered: {error}")
        }
        StreamUpdate::Finished(state) => println!("[finished] {:?}", state.status),
    }
}

fn print_run_state(state: &RunState, as_json: bool) {
    if as_json {
        println!("{}", json!({ "runState": state }));
        return;
    }

    println!(
        "run {} is {:?}",
        state.run_id.as_deref().unwrap_or("<unknown>"),
        state.status
    );
    for (index, step) in state.steps.iter().enumerate() {
        println!("  {index}. {} [{:?}]", step.label, step.status);
    }
    if let Some(approval) = &state.pending_approval {
        println!("  awaiting approval {}", approval.approval_id);
    }
    if let Some(error) = &state.error {
        println!("  error: {}", error.message);
    }
}
