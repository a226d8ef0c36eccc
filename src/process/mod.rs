//! # Process Registry
//!
//! Long-running side effects (timers, observers, listeners, sockets) are
//! modelled as owned resources: each one is registered with a cleanup
//! closure captured at start time and stored under a generated id.
//!
//! ```text
//! startProcess action
//!   → host / tokio starts the effect
//!   → ProcessRegistry::register(agent, capability, type, cleanup, metadata)
//!   → "proc-1718000000000-1"
//!
//! stop / stop_capability / stop_agent / stop_all / context teardown
//!   → handle removed from the table
//!   → cleanup runs once, failures logged and swallowed
//! ```

pub mod handle;
pub mod registry;

pub use handle::{Cleanup, ProcessHandle, ProcessInfo, ProcessType};
pub use registry::ProcessRegistry;
