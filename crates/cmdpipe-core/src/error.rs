//! Error types for the cmdpipe core library.

use nix::errno::Errno;
use thiserror::Error;

use crate::stream::PipeId;

/// Result type alias using the cmdpipe [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for cmdpipe operations.
///
/// A non-zero exit code is never an error at this level. Only the command
/// builder turns it into [`Error::CommandFailed`], and only when asked to.
#[derive(Debug, Error)]
pub enum Error {
    /// The child process could not be created.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The readiness poll itself failed (timeouts are not errors).
    #[error("Failed to poll child pipes: {0}")]
    Poll(#[source] Errno),

    /// A pipe could not be switched to non-blocking mode.
    #[error("Failed to configure {pipe} pipe: {source}")]
    PipeSetup {
        pipe: PipeId,
        #[source]
        source: Errno,
    },

    /// The spawn call did not hand back a pipe that was requested.
    #[error("Child {0} pipe was not captured")]
    PipeUnavailable(PipeId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The command exited unsuccessfully and the caller asked for that to fail.
    #[error("Command `{command}` failed with {}: {stderr}", describe_exit(*.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}"))
}

impl Error {
    /// Exit code carried by [`Error::CommandFailed`], if any.
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_message_includes_code_and_stderr() {
        let err = Error::CommandFailed {
            command: "false".into(),
            exit_code: Some(1),
            stderr: "boom".into(),
        };
        assert_eq!(err.to_string(), "Command `false` failed with exit code 1: boom");
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn signal_death_has_no_exit_code() {
        let err = Error::CommandFailed {
            command: "sleep 10".into(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("no exit code"));
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn pipe_setup_names_the_pipe() {
        let err = Error::PipeSetup {
            pipe: PipeId::Error,
            source: Errno::EBADF,
        };
        assert!(err.to_string().starts_with("Failed to configure stderr pipe"));
    }
}
