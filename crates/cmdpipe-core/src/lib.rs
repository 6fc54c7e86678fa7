//! cmdpipe Core Library
//!
//! Runs a shell command as a child process and streams its I/O:
//! - Stream handlers moving bytes between the supervisor and the child's pipes
//! - `ProcessManager`, the single-threaded readiness-poll supervision loop
//! - A fluent command builder with shell escaping
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod command;
pub mod config;
pub mod error;
pub mod process;
pub mod stream;
pub mod tracing_init;

pub use command::{Command, escape_arg, escape_command};
pub use config::Config;
pub use error::{Error, Result};
pub use process::{Consumer, ExecOptions, Execution, Input, ProcessManager};
pub use stream::{Flow, PipeId};
