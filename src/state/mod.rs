pub mod patch;
pub mod reducer;
pub mod run_state;

pub use patch::{apply_patches, PatchError, PatchErrorKind, PatchOperation};
pub use reducer::{reduce, Notice, ReducerPolicy, RunReducer, Transition, UnknownSurfacePolicy};
pub use run_state::{
    ActionRequest, ApprovalRequest, RunFailure, RunState, RunStatus, StepInfo, StepStatus,
    TextMessage, ToolCall, ToolCallStatus,
};
