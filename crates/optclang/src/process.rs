//! Execution of external toolchain programs.
//!
//! Output is captured as raw bytes and only decoded when a message has to be
//! rendered, because LLVM tools can emit non-UTF-8 data on some error paths.
//! A non-zero exit is an ordinary [`ProcessOutput`]; turning it into a
//! stage-specific error is the caller's job (see [`ProcessOutput::require_success`]).

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::pipeline::Stage;
use crate::{Error, Result};

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Invocation {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Like [`Invocation::current_dir`], leaving the directory unset for `None`.
    #[must_use]
    pub fn in_dir(mut self, dir: Option<&Path>) -> Self {
        self.current_dir = dir.map(Path::to_path_buf);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        self.timeout
    }

    /// Arguments rendered lossily, for assertions and log lines.
    #[must_use]
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// How an external process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Killed by a signal we did not send.
    Signaled,
    /// Killed by the runner after the invocation's timeout elapsed.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            Termination::Signaled | Termination::TimedOut => None,
        }
    }

    #[must_use]
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    #[must_use]
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Map a failed run to [`Error::ToolchainInvocationFailed`] for `stage`.
    pub fn require_success(self, stage: Stage) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(Error::ToolchainInvocationFailed {
            stage,
            exit_code: self.exit_code(),
            stderr: self.stderr_lossy().into_owned(),
            timed_out: self.termination == Termination::TimedOut,
        })
    }
}

/// Short, printable description of captured output.
///
/// Text is decoded with replacement characters for invalid spans; output
/// that looks binary is summarized by size instead of dumped.
#[must_use]
pub fn describe_output(bytes: &[u8]) -> Cow<'_, str> {
    if std::str::from_utf8(bytes).is_err() && bytes.contains(&0) {
        return Cow::Owned(format!("[binary output, {} bytes]", bytes.len()));
    }
    String::from_utf8_lossy(bytes)
}

/// Runs external programs.
///
/// The pipeline and the pass catalog only talk to the toolchain through this
/// trait, which keeps them testable without LLVM installed.
pub trait ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        (**self).run(invocation)
    }
}

/// Shared cancellation flag, set from a signal handler.
///
/// Once set, running children are killed and no new process is started.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for signal handlers that set it directly.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for pipe readers after killing a timed-out child.
/// Grandchildren can keep the pipes open long after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// [`ProcessRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    cancel: CancelToken,
    poll_interval: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(CancelToken::new())
    }
}

impl SystemRunner {
    #[must_use]
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn wait(&self, child: &mut Child, timeout: Option<Duration>) -> Result<Termination> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.cancel.is_cancelled() {
                kill(child);
                return Err(Error::Cancelled);
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        kill(child);
                        return Ok(Termination::TimedOut);
                    }
                    (deadline - now).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            let status = child
                .wait_timeout(slice)
                .map_err(|e| Error::io("waiting for child process", e))?;
            if let Some(status) = status {
                return Ok(status
                    .code()
                    .map_or(Termination::Signaled, Termination::Exited));
            }
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::debug!("exec: {invocation}");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|source| Error::ProcessLaunchFailed {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let termination = self.wait(&mut child, invocation.timeout)?;
        let limit = (termination == Termination::TimedOut).then_some(DRAIN_GRACE);
        let output = ProcessOutput {
            termination,
            stdout: collect(stdout, limit),
            stderr: collect(stderr, limit),
        };

        if output.termination == Termination::TimedOut {
            tracing::warn!(
                "{} timed out after {:?}",
                invocation.program.display(),
                invocation.timeout.unwrap_or_default()
            );
        }
        Ok(output)
    }
}

fn kill(child: &mut Child) {
    // The child may already have exited; either way it must be reaped.
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    let mut pipe = pipe?;
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    Some(rx)
}

/// Output read by a drain thread. With a `limit`, a reader still blocked
/// after it is abandoned and its output dropped.
fn collect(rx: Option<Receiver<Vec<u8>>>, limit: Option<Duration>) -> Vec<u8> {
    let Some(rx) = rx else {
        return Vec::new();
    };
    match limit {
        Some(limit) => rx.recv_timeout(limit).unwrap_or_default(),
        None => rx.recv().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_renders_command_line() {
        let inv = Invocation::new("opt")
            .arg("-S")
            .args(["-passes=sroa,gvn", "in.ll"])
            .timeout(Some(Duration::from_secs(5)));
        assert_eq!(inv.to_string(), "opt -S -passes=sroa,gvn in.ll");
        assert_eq!(inv.args_lossy(), ["-S", "-passes=sroa,gvn", "in.ll"]);
        assert_eq!(inv.time_limit(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn non_utf8_stderr_does_not_mask_exit_code() {
        let output = ProcessOutput {
            termination: Termination::Exited(1),
            stdout: Vec::new(),
            stderr: vec![b'e', b'r', 0xff, 0xfe, b'r'],
        };
        let err = output.require_success(Stage::OptimizeIr).unwrap_err();
        match err {
            Error::ToolchainInvocationFailed {
                stage,
                exit_code,
                stderr,
                timed_out,
            } => {
                assert_eq!(stage, Stage::OptimizeIr);
                assert_eq!(exit_code, Some(1));
                assert!(stderr.starts_with("er"));
                assert!(stderr.contains('\u{FFFD}'));
                assert!(!timed_out);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn timeout_is_marked() {
        let output = ProcessOutput {
            termination: Termination::TimedOut,
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        assert!(matches!(
            output.require_success(Stage::EmitIr),
            Err(Error::ToolchainInvocationFailed {
                timed_out: true,
                exit_code: None,
                ..
            })
        ));
    }

    #[test]
    fn binary_output_is_summarized() {
        assert_eq!(describe_output(b"ok\n"), "ok\n");
        assert_eq!(
            describe_output(&[0x42, 0x43, 0xc0, 0xde, 0x00, 0x35]),
            "[binary output, 6 bytes]"
        );
    }

    #[test]
    fn cancelled_runner_refuses_to_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let runner = SystemRunner::new(cancel);
        let result = runner.run(&Invocation::new("definitely-not-a-real-program"));
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn missing_program_fails_to_launch() {
        let runner = SystemRunner::default();
        let result = runner.run(&Invocation::new("optclang-no-such-tool-4f2a"));
        assert!(matches!(result, Err(Error::ProcessLaunchFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let runner = SystemRunner::default();
        let output = runner
            .run(&Invocation::new("sh").args(["-c", "printf out; printf err >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.termination, Termination::Exited(3));
        assert_eq!(output.stdout, b"out");
        assert_eq!(output.stderr, b"err");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_does_not_wait_for_grandchildren_holding_pipes() {
        let runner = SystemRunner::default();
        let started = Instant::now();
        let output = runner
            .run(
                &Invocation::new("sh")
                    .args(["-c", "sleep 5; true"])
                    .timeout(Some(Duration::from_millis(200))),
            )
            .unwrap();
        assert_eq!(output.termination, Termination::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[test]
    fn cancel_kills_running_child() {
        let cancel = CancelToken::new();
        let runner = SystemRunner::new(cancel.clone());
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            cancel.cancel();
        });
        let started = Instant::now();
        let result = runner.run(&Invocation::new("sh").args(["-c", "sleep 5; true"]));
        trigger.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.ll"), "").unwrap();
        let output = SystemRunner::default()
            .run(&Invocation::new("ls").current_dir(dir.path()))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_lossy().trim(), "marker.ll");
    }

    #[cfg(unix)]
    #[test]
    fn kills_process_after_timeout() {
        let runner = SystemRunner::default();
        let started = Instant::now();
        let output = runner
            .run(
                &Invocation::new("sh")
                    .args(["-c", "exec sleep 5"])
                    .timeout(Some(Duration::from_millis(100))),
            )
            .unwrap();
        assert_eq!(output.termination, Termination::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
