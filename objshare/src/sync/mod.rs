//! Synchronization primitives shared by the coordinator and its proxies
//!
//! - **WriteCounter:** pending-only counter for drain checks
//! - **CounterRegistry:** per-key pending/completed pairs for read barriers
//! - **Command queue:** bounded FIFO, many producers, one consumer
//! - **SourceOfTruth:** committed serialized state per object

mod counter;
mod queue;
mod registry;
mod truth;

pub use counter::{DEFAULT_POLL_INTERVAL, WriteCounter};
pub use queue::{Command, CommandReceiver, CommandSender, command_queue};
pub use registry::{CounterPair, CounterRegistry};
pub use truth::SourceOfTruth;
