pub mod context;
pub mod event;
mod r#loop;
pub mod manager;
pub mod timeout;

pub use context::{ConnectionState, ConnectionStatus};
pub use event::StreamUpdate;
pub use manager::{ConnectParams, ConnectionManager, ManagerError};
pub use timeout::{Interaction, InteractionTimeoutPolicy, TimeoutOutcome};
