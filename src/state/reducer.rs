mod core;
mod interaction;
mod lifecycle;
mod state;
mod streaming;


pub use state::{reduce, Notice, ReducerPolicy, RunReducer, Transition, UnknownSurfacePolicy};
