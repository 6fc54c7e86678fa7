//! Child process lifecycle: spawn, supervise, tear down.

pub mod manager;
pub mod options;
pub mod spawn;

pub use manager::{Execution, ExitCell, ProcessManager, State};
pub use options::{Consumer, ExecOptions, Input};
