//! Coordinator: the single serial writer for shared objects
//!
//! Workers never touch a shared object directly. They enqueue commands through
//! a [`CoordinatorHandle`] and the coordinator's apply loop runs each one, in
//! dequeue order, against a private mirror:
//! - **Applying:** run the method (or its alias) on the mirror
//! - **Committing:** publish the mirror's state to the source of truth
//! - **CounterUpdate:** move the written keys from pending to completed

mod config;
mod core;
mod handle;
mod messages;
mod mirror;

pub use config::CoordinatorConfig;
pub use core::Coordinator;
pub use handle::CoordinatorHandle;
pub use messages::{ApplyFailure, CoordinatorMetrics, Dispatch, LoopState};
