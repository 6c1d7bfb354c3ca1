//! Sync executor: builds and runs one rsync invocation.
//!
//! Each invocation spawns exactly one external process, streams its output
//! line-by-line into the shared log sink, and resolves with the subprocess
//! exit code. A failed sync is logged and forgotten; retry happens naturally
//! on the next qualifying filesystem event.

pub mod output;

use crate::config::WatchSpec;
use crate::logging::{palette_color, timestamp, LogSink};
use chrono::{DateTime, Local};
use colored::Color;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use output::{classify, indent, OutputLine};

/// Errors from running the sync subprocess. These never escape the
/// directory's watch loop; the runner logs them and the directory stays
/// eligible for the next trigger.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn sync process: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed waiting for sync process: {0}")]
    Wait(#[source] io::Error),
}

/// A fully resolved rsync command line.
#[derive(Debug, Clone)]
pub struct RsyncCommand {
    pub program: String,
    pub source: std::path::PathBuf,
    pub destination: String,
    pub flags: Vec<char>,
    pub exclude: Vec<String>,
    pub shell: Option<String>,
}

impl RsyncCommand {
    /// Build the invocation for one watched directory.
    pub fn from_spec(spec: &WatchSpec) -> Self {
        Self {
            program: "rsync".to_string(),
            source: spec.source.clone(),
            destination: spec.destination.clone(),
            flags: spec.flags.clone(),
            exclude: spec.exclude.clone(),
            shell: spec.shell.clone(),
        }
    }

    /// Argument list: combined single-char flags, ordered excludes, the
    /// remote-shell override, then source and destination.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.flags.is_empty() {
            args.push(format!("-{}", self.flags.iter().collect::<String>()));
        }
        for pattern in &self.exclude {
            args.push(format!("--exclude={pattern}"));
        }
        if let Some(shell) = &self.shell {
            args.push(format!("--rsh={shell}"));
        }
        args.push(self.source.to_string_lossy().into_owned());
        args.push(self.destination.clone());
        args
    }

    /// Prepared subprocess with piped output.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args());
        cmd
    }

    /// Rendering of the full invocation for debug logging.
    pub fn command_line(&self) -> String {
        let mut rendered = vec![self.program.clone()];
        for arg in self.args() {
            if arg.contains(' ') {
                rendered.push(format!("\"{arg}\""));
            } else {
                rendered.push(arg);
            }
        }
        rendered.join(" ")
    }
}

/// Ephemeral record of one executor run.
#[derive(Debug)]
pub struct SyncInvocation {
    pub command: RsyncCommand,
    pub started_at: DateTime<Local>,
}

impl SyncInvocation {
    pub fn new(command: RsyncCommand) -> Self {
        Self {
            command,
            started_at: Local::now(),
        }
    }
}

/// Logging context shared by the output-streaming tasks of one invocation.
#[derive(Clone)]
pub struct OutputContext {
    pub sink: Arc<LogSink>,
    pub tag: String,
    pub color: Color,
}

impl OutputContext {
    pub fn for_spec(spec: &WatchSpec, sink: Arc<LogSink>) -> Self {
        Self {
            sink,
            tag: spec.tag.clone(),
            color: palette_color(spec.color_index),
        }
    }
}

/// Run one prepared sync subprocess to completion, streaming its output
/// through the log sink, and resolve with the exit code.
///
/// Stdout lines matching an itemized change code are stripped of the code
/// and logged; the first such line per run emits a one-time banner. Other
/// stdout lines pass through indented. Stderr is logged under a warning
/// header in red. Exit codes are returned as-is, including non-zero ones;
/// only spawn/wait failures produce an error.
pub async fn run_sync_process(mut cmd: Command, ctx: &OutputContext) -> Result<i32, ExecError> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    // Put the child in its own process group so a signal aimed at the daemon
    // doesn't also hit a half-finished transfer; on Linux, ask for SIGTERM
    // if the daemon dies first.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            #[cfg(target_os = "linux")]
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(ExecError::Spawn)?;

    let stdout_task = spawn_stdout_reader(&mut child, ctx.clone());
    let stderr_task = spawn_stderr_reader(&mut child, ctx.clone());

    let status = child.wait().await.map_err(ExecError::Wait)?;

    // Drain the readers so every output line lands before the completion
    // line is logged.
    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    Ok(status.code().unwrap_or(-1))
}

fn spawn_stdout_reader(child: &mut Child, ctx: OutputContext) -> Option<JoinHandle<()>> {
    let stdout = child.stdout.take()?;
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut banner_logged = false;
        while let Ok(Some(line)) = lines.next_line().await {
            let classified = classify(&line);
            if classified.is_change() && !banner_logged {
                banner_logged = true;
                ctx.sink
                    .line(
                        &format!("{}{} Syncing new/modified files/dirs", timestamp(), ctx.tag),
                        Some(ctx.color),
                    )
                    .await;
            }
            let content = match classified {
                OutputLine::Change(path) => indent(path),
                OutputLine::Diagnostic(text) => indent(text),
            };
            ctx.sink.line(&content, Some(ctx.color)).await;
        }
    }))
}

fn spawn_stderr_reader(child: &mut Child, ctx: OutputContext) -> Option<JoinHandle<()>> {
    let stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut header_logged = false;
        while let Ok(Some(line)) = lines.next_line().await {
            if !header_logged {
                header_logged = true;
                ctx.sink
                    .warning(&format!("{}{} Rsync error content:", timestamp(), ctx.tag))
                    .await;
            }
            ctx.sink.error(&indent(&line)).await;
        }
    }))
}

/// Run one sync for a watched directory, logging the outcome. This is the
/// production [`crate::sync::SyncRunner`]; nothing it encounters propagates
/// to the coordinator.
pub struct RsyncRunner {
    sink: Arc<LogSink>,
    debug: bool,
}

impl RsyncRunner {
    pub fn new(sink: Arc<LogSink>, debug: bool) -> Self {
        Self { sink, debug }
    }
}

#[async_trait::async_trait]
impl crate::sync::SyncRunner for RsyncRunner {
    async fn sync(&self, spec: &WatchSpec) {
        let invocation = SyncInvocation::new(RsyncCommand::from_spec(spec));
        let ctx = OutputContext::for_spec(spec, self.sink.clone());

        self.sink
            .line(
                &format!(
                    "{}{} Calling rsync for {} -> {}",
                    timestamp(),
                    spec.tag,
                    spec.source.display(),
                    spec.destination
                ),
                Some(ctx.color),
            )
            .await;

        if self.debug {
            self.sink
                .line(&invocation.command.command_line(), Some(ctx.color))
                .await;
        }
        debug!(
            source = %spec.source.display(),
            started_at = %invocation.started_at,
            "starting sync subprocess"
        );

        match run_sync_process(invocation.command.to_command(), &ctx).await {
            Ok(0) => {
                self.sink
                    .line(
                        &format!("{}{} Finished with exitcode: 0", timestamp(), spec.tag),
                        Some(ctx.color),
                    )
                    .await;
            }
            Ok(code) => {
                self.sink
                    .warning(&format!(
                        "{}{} Finished with exitcode: {}",
                        timestamp(),
                        spec.tag,
                        code
                    ))
                    .await;
            }
            Err(err) => {
                self.sink
                    .warning(&format!("{}{} {}", timestamp(), spec.tag, err))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::compile_ignored;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn spec_for(source: &str) -> WatchSpec {
        WatchSpec {
            source: PathBuf::from(source),
            destination: "deploy@example.com:/srv/www".to_string(),
            flags: vec!['a', 'O', 'i'],
            exclude: vec!["*.tmp".to_string(), ".git".to_string()],
            shell: Some("ssh -p 2222".to_string()),
            ignore_initial: true,
            ignored: compile_ignored(&[]).unwrap(),
            tag: " web:[1]".to_string(),
            color_index: 0,
        }
    }

    #[test]
    fn test_args_order() {
        let cmd = RsyncCommand::from_spec(&spec_for("/var/www"));
        assert_eq!(
            cmd.args(),
            vec![
                "-aOi",
                "--exclude=*.tmp",
                "--exclude=.git",
                "--rsh=ssh -p 2222",
                "/var/www",
                "deploy@example.com:/srv/www",
            ]
        );
    }

    #[test]
    fn test_args_without_flags_or_shell() {
        let mut spec = spec_for("/var/www");
        spec.flags = vec![];
        spec.exclude = vec![];
        spec.shell = None;
        let cmd = RsyncCommand::from_spec(&spec);
        assert_eq!(cmd.args(), vec!["/var/www", "deploy@example.com:/srv/www"]);
    }

    #[test]
    fn test_command_line_quotes_shell_arg() {
        let cmd = RsyncCommand::from_spec(&spec_for("/var/www"));
        assert_eq!(
            cmd.command_line(),
            "rsync -aOi --exclude=*.tmp --exclude=.git \"--rsh=ssh -p 2222\" /var/www deploy@example.com:/srv/www"
        );
    }

    fn test_ctx(sink: Arc<LogSink>) -> OutputContext {
        OutputContext {
            sink,
            tag: " test:[1]".to_string(),
            color: Color::Blue,
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let sink = Arc::new(LogSink::console());
        let cmd = Command::new("/nonexistent/dirsyncd-test-binary");
        let result = run_sync_process(cmd, &test_ctx(sink)).await;
        assert!(matches!(result, Err(ExecError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_streams_output_and_returns_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("run.log");
        let sink = Arc::new(LogSink::open(Some(&log_path)).await.unwrap());

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(
            "printf '<f+++++++++ a.txt\\n'; printf 'sending incremental file list\\n'; \
             printf 'some error\\n' >&2; exit 23",
        );

        let code = run_sync_process(cmd, &test_ctx(sink.clone())).await.unwrap();
        assert_eq!(code, 23);

        sink.flush().await;
        let log = std::fs::read_to_string(&log_path).unwrap();
        // Banner fires once, before the first change record.
        assert!(log.contains("Syncing new/modified files/dirs"));
        // Change record is stripped of its code and indented.
        assert!(log.contains("    a.txt\n"));
        assert!(!log.contains("<f+++++++++"));
        // Diagnostics pass through indented.
        assert!(log.contains("    sending incremental file list\n"));
        // Stderr shows up under the warning header.
        assert!(log.contains("Rsync error content:"));
        assert!(log.contains("    some error\n"));
    }

    #[tokio::test]
    async fn test_no_banner_without_change_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("run.log");
        let sink = Arc::new(LogSink::open(Some(&log_path)).await.unwrap());

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'sending incremental file list\\n'");

        let code = run_sync_process(cmd, &test_ctx(sink.clone())).await.unwrap();
        assert_eq!(code, 0);

        sink.flush().await;
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(!log.contains("Syncing new/modified files/dirs"));
    }
}
