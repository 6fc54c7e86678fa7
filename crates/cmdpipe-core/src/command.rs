//! Fluent command-line builder on top of [`ProcessManager`].
//!
//! Assembles a shell command line from a program and escaped arguments, then
//! runs it with a success policy: by default a non-zero exit code is turned
//! into [`Error::CommandFailed`].
//!
//! ```no_run
//! use cmdpipe_core::Command;
//!
//! let execution = Command::new("ls")
//!     .flag("-l")
//!     .argument("/tmp")
//!     .run(())?;
//! print!("{}", execution.stdout_lossy());
//! # Ok::<(), cmdpipe_core::Error>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::process::{Consumer, ExecOptions, Execution, Input, ProcessManager};

const SHELL_META: &[char] = &[
    '#', '&', ';', '`', '|', '*', '?', '~', '<', '>', '^', '(', ')', '[', ']', '{', '}', '$', '\\',
    '\n',
];

/// Backslash-escape shell metacharacters so `cmd` runs as one literal command.
///
/// Quotes are left alone when they come in pairs, so quoted sections survive.
/// An unpaired quote is escaped.
pub fn escape_command(cmd: &str) -> String {
    let chars: Vec<char> = cmd.chars().collect();
    let mut out = String::with_capacity(cmd.len() + 8);
    // The quote character that will close the currently open quote, if any.
    let mut open: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        match c {
            '\'' | '"' => {
                match open {
                    None if chars[i + 1..].contains(&c) => open = Some(c),
                    Some(q) if q == c => open = None,
                    _ => out.push('\\'),
                }
                out.push(c);
            }
            c if SHELL_META.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Wrap `arg` in single quotes so the shell passes it through untouched.
pub fn escape_arg(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// A command line plus everything needed to run it.
#[derive(Debug, Clone)]
pub struct Command {
    command: String,
    args: Vec<String>,
    separator: String,
    options: ExecOptions,
    fail_on_error: bool,
}

impl Command {
    /// A command whose shell metacharacters are escaped.
    pub fn new(cmd: &str) -> Self {
        Self::raw(escape_command(cmd))
    }

    /// A command line passed to the shell verbatim.
    pub fn raw(cmd: impl Into<String>) -> Self {
        Self {
            command: cmd.into(),
            args: Vec::new(),
            separator: " ".to_string(),
            options: ExecOptions::default(),
            fail_on_error: true,
        }
    }

    /// Append an escaped positional argument.
    #[must_use]
    pub fn argument(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(escape_arg(&arg.to_string()));
        self
    }

    /// Append an option without a value, as is.
    #[must_use]
    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.args.push(name.into());
        self
    }

    /// Append `name` and its escaped `value`, joined by the default separator.
    #[must_use]
    pub fn option(self, name: &str, value: impl fmt::Display) -> Self {
        let sep = self.separator.clone();
        self.option_with_separator(name, value, &sep)
    }

    /// Like [`option`](Self::option) with an explicit separator, e.g. `=`.
    #[must_use]
    pub fn option_with_separator(mut self, name: &str, value: impl fmt::Display, sep: &str) -> Self {
        self.args
            .push(format!("{name}{sep}{}", escape_arg(&value.to_string())));
        self
    }

    /// Default separator between an option and its value.
    #[must_use]
    pub fn separator(mut self, sep: impl Into<String>) -> Self {
        self.separator = sep.into();
        self
    }

    #[must_use]
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.working_directory = Some(dir.into());
        self
    }

    /// Set one variable of the child environment. The first call replaces
    /// the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options
            .environment
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.options
            .environment
            .get_or_insert_with(HashMap::new)
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.options.chunk_size = chunk_size;
        self
    }

    /// Replace all execution options. Directory and environment set earlier
    /// are replaced too.
    #[must_use]
    pub fn exec_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether an unsuccessful exit is returned as [`Error::CommandFailed`].
    #[must_use]
    pub fn fail_on_error(mut self, fail: bool) -> Self {
        self.fail_on_error = fail;
        self
    }

    pub const fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// The command line handed to the shell.
    pub fn full_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run capturing stdout and stderr into the returned [`Execution`].
    ///
    /// `()` means no input.
    pub fn run<'a>(&self, input: impl Into<Input<'a>>) -> Result<Execution> {
        self.run_with(input, Consumer::Buffer)
    }

    /// Run delivering output to `consumer`.
    pub fn run_with<'a>(
        &self,
        input: impl Into<Input<'a>>,
        consumer: Consumer<'_>,
    ) -> Result<Execution> {
        let command_line = self.full_command();
        let manager = ProcessManager::new(command_line.clone(), self.options.clone());
        let execution = manager.exec(input.into(), consumer)?;
        debug!(
            command = %command_line,
            exit_code = ?execution.exit_code,
            duration_ms = execution.duration.as_millis(),
            "Command finished"
        );

        if self.fail_on_error && !execution.success() {
            return Err(Error::CommandFailed {
                command: command_line,
                exit_code: execution.exit_code,
                stderr: execution.stderr_lossy().trim_end().to_string(),
            });
        }
        Ok(execution)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_command())
    }
}
