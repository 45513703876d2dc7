//! Client-side proxies for coordinator-owned objects
//!
//! An [`ObjectProxy`] makes a shared object look local: writes are queued
//! fire-and-forget, reads wait on exactly the counters they depend on and then
//! fetch a fresh copy.

mod method;
mod object;
mod rmw;

pub use crate::coordinator::Dispatch;
pub use method::{Assignment, BoundMethod, MethodProxy};
pub use object::{Attr, ObjectProxy};
pub use rmw::{RmwOp, RmwToken, Tracked};
