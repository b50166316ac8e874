pub mod event;
pub mod surface;

pub use event::{
    decode_message, AgentEvent, ApprovalResolution, Decoded, EventKind, EventMeta,
    StepDescriptor, SurfaceActionRequest,
};
pub use surface::{is_known_surface_type, Surface, SurfaceKind};
