//! cmdpipe CLI Library
//!
//! Argument parsing and the run loop behind the `cmdpipe` binary: build a
//! command from the arguments, run it, and stream its stdout and stderr to
//! ours as they arrive.

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, warn};

use cmdpipe_core::{Command, Config, Consumer, Error, Flow, Input, PipeId};

#[derive(Parser, Debug)]
#[command(name = "cmdpipe")]
#[command(version, about = "Run a shell command and stream its output", long_about = None)]
pub struct Cli {
    /// Shell command line, passed to the shell without escaping
    #[arg(short, long, conflicts_with = "program")]
    pub line: Option<String>,

    /// Program followed by its arguments (escaped for the shell)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub program: Vec<String>,

    /// Working directory for the command
    #[arg(short = 'C', long)]
    pub cwd: Option<PathBuf>,

    /// Environment variable for the command; replaces the inherited environment
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Stream this file into the command's stdin
    #[arg(long, conflicts_with = "stdin_text")]
    pub stdin_file: Option<PathBuf>,

    /// Send this text to the command's stdin
    #[arg(long)]
    pub stdin_text: Option<String>,

    /// Deliver output line by line instead of in raw chunks
    #[arg(long)]
    pub lines: bool,

    /// Bytes moved per read or write
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Stop the command after this many stdout lines
    #[arg(long)]
    pub max_lines: Option<usize>,

    /// Stop the command once this many seconds passed (checked on output)
    #[arg(long)]
    pub timeout_secs: Option<f64>,

    /// Do not report a non-zero exit code as a failure
    #[arg(long)]
    pub no_fail: bool,

    /// Print the wall time to stderr when done
    #[arg(long)]
    pub timing: bool,

    /// Log level for cmdpipe's own diagnostics
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit diagnostics as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Directory holding `.cmdpipe/settings.json` (defaults to the current one)
    #[arg(long, env = "CMDPIPE_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Assemble the command described by the arguments on top of `config`.
pub fn build_command(cli: &Cli, config: &Config) -> anyhow::Result<Command> {
    let command = if let Some(ref line) = cli.line {
        Command::raw(line.clone())
    } else {
        let (program, args) = cli
            .program
            .split_first()
            .context("no command given: pass --line or a program")?;
        args.iter()
            .fold(Command::new(program), |cmd, arg| cmd.argument(arg))
    };

    let mut options = config.exec.to_options();
    if let Some(chunk_size) = cli.chunk_size {
        options.chunk_size = chunk_size;
    }
    options.working_directory.clone_from(&cli.cwd);

    let mut command = command.exec_options(options).fail_on_error(!cli.no_fail);
    if !cli.env.is_empty() {
        command = command.envs(cli.env.iter().cloned());
    }
    Ok(command)
}

fn open_input(cli: &Cli) -> anyhow::Result<Input<'static>> {
    if let Some(ref path) = cli.stdin_file {
        let file = File::open(path)
            .with_context(|| format!("Failed to open stdin file {}", path.display()))?;
        return Ok(Input::stream(file));
    }
    Ok(cli
        .stdin_text
        .clone()
        .map_or(Input::None, Input::from))
}

/// Run the command, streaming its output into `out` and `err`.
///
/// Returns the exit code the binary should exit with.
pub fn run(
    cli: &Cli,
    config: &Config,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> anyhow::Result<i32> {
    let command = build_command(cli, config)?;
    let input = open_input(cli)?;
    let deadline = cli
        .timeout_secs
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("invalid --timeout-secs")?
        .map(|limit| Instant::now() + limit);
    let per_line = cli.lines || cli.max_lines.is_some();
    debug!(command = %command, per_line, "Running");

    let started = Instant::now();
    let mut stdout_lines = 0usize;
    let mut write_error: Option<io::Error> = None;
    let result = command.run_with(
        input,
        Consumer::callback(
            |pipe, data| {
                let sink: &mut dyn Write = match pipe {
                    PipeId::Error => &mut *err,
                    PipeId::Input | PipeId::Output => &mut *out,
                };
                let Some(bytes) = data else {
                    if let Err(e) = sink.flush() {
                        write_error.get_or_insert(e);
                    }
                    return Flow::Continue;
                };
                if let Err(e) = sink.write_all(bytes) {
                    write_error.get_or_insert(e);
                    return Flow::Stop;
                }
                if pipe == PipeId::Output && per_line {
                    stdout_lines += 1;
                }
                if cli.max_lines.is_some_and(|max| stdout_lines >= max) {
                    return Flow::Stop;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!("Deadline reached, stopping command");
                    return Flow::Stop;
                }
                Flow::Continue
            },
            per_line,
        ),
    );
    let elapsed = started.elapsed();

    if let Some(e) = write_error {
        if e.kind() != ErrorKind::BrokenPipe {
            return Err(e).context("Failed to forward command output");
        }
        debug!("Output reader went away");
    }

    let code = match result {
        Ok(execution) => execution.exit_code.unwrap_or(1),
        Err(e @ Error::CommandFailed { .. }) => {
            writeln!(err, "cmdpipe: {e}")?;
            e.exit_code().unwrap_or(1)
        }
        Err(e) => return Err(e).context("Failed to run command"),
    };

    if cli.timing {
        writeln!(err, "Finished in {:.3}s", elapsed.as_secs_f64())?;
    }
    out.flush()?;
    Ok(code)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cmdpipe").chain(args.iter().copied())).unwrap()
    }

    fn run_capture(args: &[&str]) -> (i32, String, String) {
        let cli = parse(args);
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run(&cli, &Config::default(), &mut out, &mut err).unwrap();
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn parses_program_with_hyphenated_args() {
        let cli = parse(&["ls", "-l", "--all"]);
        assert_eq!(cli.program, vec!["ls", "-l", "--all"]);
        assert!(cli.line.is_none());
    }

    #[test]
    fn line_conflicts_with_program() {
        let result = Cli::try_parse_from(["cmdpipe", "--line", "echo hi", "ls"]);
        assert!(result.is_err());
    }

    #[test]
    fn stdin_sources_conflict() {
        let result =
            Cli::try_parse_from(["cmdpipe", "--stdin-file", "a", "--stdin-text", "b", "cat"]);
        assert!(result.is_err());
    }

    #[test]
    fn env_pairs_are_parsed() {
        let cli = parse(&["-e", "A=1", "--env", "B=x=y", "env"]);
        assert_eq!(
            cli.env,
            vec![("A".into(), "1".into()), ("B".into(), "x=y".into())]
        );
        assert!(Cli::try_parse_from(["cmdpipe", "-e", "novalue", "env"]).is_err());
        assert!(Cli::try_parse_from(["cmdpipe", "-e", "=v", "env"]).is_err());
    }

    #[test]
    fn build_escapes_program_and_args() {
        let cli = parse(&["echo", "it's", "a > b"]);
        let command = build_command(&cli, &Config::default()).unwrap();
        assert_eq!(command.full_command(), r"echo 'it'\''s' 'a > b'");
    }

    #[test]
    fn build_without_command_fails() {
        let cli = parse(&[]);
        assert!(build_command(&cli, &Config::default()).is_err());
    }

    #[test]
    fn cli_overrides_config() {
        let mut config = Config::default();
        config.exec.chunk_size = 99;
        let cli = parse(&["--chunk-size", "7", "-C", "/tmp", "true"]);
        let command = build_command(&cli, &config).unwrap();
        assert_eq!(command.options().chunk_size, 7);
        assert_eq!(
            command.options().working_directory.as_deref(),
            Some(std::path::Path::new("/tmp"))
        );
    }

    #[test]
    fn streams_both_pipes() {
        let (code, out, err) = run_capture(&["--line", "echo out; echo err >&2"]);
        assert_eq!(code, 0);
        assert_eq!(out, "out\n");
        assert_eq!(err, "err\n");
    }

    #[test]
    fn stdin_text_reaches_command() {
        let (code, out, _) = run_capture(&["--stdin-text", "piped", "cat"]);
        assert_eq!(code, 0);
        assert_eq!(out, "piped");
    }

    #[test]
    fn stdin_file_reaches_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, "from file\n").unwrap();
        let (_, out, _) = run_capture(&["--stdin-file", path.to_str().unwrap(), "cat"]);
        assert_eq!(out, "from file\n");
    }

    #[test]
    fn failure_reports_and_returns_child_code() {
        let (code, _, err) = run_capture(&["--line", "exit 3"]);
        assert_eq!(code, 3);
        assert!(err.contains("failed with exit code 3"));
    }

    #[test]
    fn no_fail_is_quiet() {
        let (code, _, err) = run_capture(&["--no-fail", "--line", "exit 3"]);
        assert_eq!(code, 3);
        assert!(err.is_empty());
    }

    #[test]
    fn max_lines_stops_early_with_success() {
        let (code, out, _) = run_capture(&["--max-lines", "5", "yes"]);
        assert_eq!(code, 0);
        assert_eq!(out, "y\n".repeat(5));
    }

    #[test]
    fn timing_is_reported() {
        let (_, _, err) = run_capture(&["--timing", "true"]);
        assert!(err.starts_with("Finished in "));
    }

    #[test]
    fn timeout_stops_chatty_command() {
        let started = Instant::now();
        let (code, out, _) = run_capture(&[
            "--timeout-secs",
            "0.3",
            "--line",
            "while :; do echo tick; sleep 0.05; done",
        ]);
        assert_eq!(code, 0);
        assert!(out.starts_with("tick\n"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let cli = parse(&["-C", "/nonexistent/cmdpipe", "true"]);
        let result = run(&cli, &Config::default(), &mut io::sink(), &mut io::sink());
        assert!(result.is_err());
    }
}
