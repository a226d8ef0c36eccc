//! # Action Interpreter
//!
//! Executes a capability's action tree against an [`ExecutionContext`].
//!
//! ## Action kinds
//!
//! | Kind              | Effect                                           |
//! |-------------------|--------------------------------------------------|
//! | `sequence`        | children in order                                |
//! | `if`              | one branch                                       |
//! | `forEach`         | children per element, strictly sequential        |
//! | `while`           | children while the condition holds (capped)      |
//! | `addStyle`        | inject CSS through the page host                 |
//! | `notify`          | user notification                                |
//! | `executeScript`   | inline code, opaque to the runtime               |
//! | `startProcess`    | long-running effect, registered as a process     |
//! | `registerCleanup` | run children, register cleanup actions           |
//! | `return`          | end the capability with a value                  |
//! | `callApi`         | privileged call over the RPC bridge              |
//! | `setVariable`     | bind a name in the current scope                 |
//! | `wait`            | sleep                                            |
//! | `log`             | log line tagged with agent and capability        |

pub mod action;
pub mod context;
pub mod expr;
#[allow(clippy::module_inception)]
pub mod interpreter;
pub mod result;

pub use action::{Action, LogLevel};
pub use context::ExecutionContext;
pub use expr::{render_template, render_value, truthy, Expr};
pub use interpreter::Interpreter;
pub use result::ExecutionResult;
