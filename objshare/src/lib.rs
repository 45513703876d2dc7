//! objshare - Shared objects with a single serial writer
//!
//! A coordinator task owns the authoritative copy of each shared object and
//! applies every mutation, one at a time, in the order it was queued. Workers
//! see the object through proxies: writes are fire-and-forget, and reads wait
//! only for the writes they causally depend on.
//!
//! # Core Concepts
//!
//! - **Single Writer**: Only the apply loop ever mutates a mirror
//! - **Counter Barriers**: Readers wait on per-attribute pending/completed counts
//! - **Starvation Free**: A read's target is captured once; later writes never extend it
//! - **Atomic RMW**: `x = x + d` through a proxy is recombined at apply time
//!
//! # Modules
//!
//! - [`sync`] - Counters, command queue and source of truth
//! - [`coordinator`] - The apply loop and its handle
//! - [`proxy`] - Object proxies, method proxies and RMW tokens
//! - [`shared`] - The `SharedObject` trait and per-type metadata
//! - [`share`] - One-call composition root
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod demo;
pub mod error;
pub mod proxy;
pub mod share;
pub mod shared;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{
    ApplyFailure, Coordinator, CoordinatorConfig, CoordinatorHandle, CoordinatorMetrics, Dispatch, LoopState,
};
pub use error::{CallError, Result, ShareError};
pub use proxy::{Assignment, Attr, BoundMethod, MethodProxy, ObjectProxy, RmwOp, RmwToken, Tracked};
pub use share::Share;
pub use shared::{CallArgs, MethodSpec, SharedMetadata, SharedObject, counter_key};
pub use sync::{Command, CounterPair, CounterRegistry, SourceOfTruth, WriteCounter};
