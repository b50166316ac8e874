pub mod api;
pub mod config;
pub mod runtime;
pub mod state;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use runtime::{ConnectParams, ConnectionManager, StreamUpdate};
pub use state::{reduce, RunReducer, RunState, RunStatus, Transition};
pub use types::{AgentEvent, EventKind, Surface};
