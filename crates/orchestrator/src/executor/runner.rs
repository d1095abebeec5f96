use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use provision_core::{AbortReason, OutputStream, ScriptOutcome, ScriptResult};
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{RemoteTarget, ShellTransport};
use crate::error::ExecError;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// One chunk of script output as it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

pub type OutputSender = mpsc::UnboundedSender<OutputChunk>;

/// Decodes a byte stream into text without splitting multi-byte characters
/// across chunks.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + bad);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            return text;
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Accumulates output and forwards every chunk. The accumulated text is
/// exactly the concatenation of what was forwarded.
struct Capture {
    stdout: String,
    stderr: String,
    stdout_decoder: Utf8Decoder,
    stderr_decoder: Utf8Decoder,
    sink: Option<OutputSender>,
}

impl Capture {
    fn new(sink: Option<OutputSender>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            stdout_decoder: Utf8Decoder::default(),
            stderr_decoder: Utf8Decoder::default(),
            sink,
        }
    }

    fn push(&mut self, stream: OutputStream, bytes: &[u8]) {
        let text = match stream {
            OutputStream::Stdout => self.stdout_decoder.push(bytes),
            OutputStream::Stderr => self.stderr_decoder.push(bytes),
        };
        self.record(stream, text);
    }

    fn record(&mut self, stream: OutputStream, text: String) {
        if text.is_empty() {
            return;
        }
        match stream {
            OutputStream::Stdout => self.stdout.push_str(&text),
            OutputStream::Stderr => self.stderr.push_str(&text),
        }
        if let Some(ref sink) = self.sink {
            // A dropped receiver only means nobody is watching.
            let _ = sink.send(OutputChunk { stream, text });
        }
    }

    fn flush(&mut self) {
        let out = self.stdout_decoder.finish();
        self.record(OutputStream::Stdout, out);
        let err = self.stderr_decoder.finish();
        self.record(OutputStream::Stderr, err);
    }
}

enum Finish {
    Exited(i32),
    Aborted(AbortReason),
}

/// Runs scripts through a [`ShellTransport`], streaming output and
/// honouring cancellation and timeouts.
#[derive(Clone)]
pub struct ScriptRunner {
    transport: Arc<dyn ShellTransport>,
    abort_grace: Duration,
}

impl ScriptRunner {
    pub fn new(transport: Arc<dyn ShellTransport>) -> Self {
        Self {
            transport,
            abort_grace: Duration::from_secs(5),
        }
    }

    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Run `script` on `target`.
    ///
    /// Each output chunk is sent to `output` as soon as it is read. When
    /// `cancel` fires or `timeout` elapses the whole process group is killed
    /// and the result carries `ScriptOutcome::Aborted` with the output read
    /// up to that point.
    pub async fn run(
        &self,
        target: &RemoteTarget,
        script: &str,
        timeout: Duration,
        cancel: CancellationToken,
        output: Option<OutputSender>,
    ) -> Result<ScriptResult, ExecError> {
        let started = Instant::now();
        let mut cmd = self.transport.command(target, script);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
        info!(
            transport = self.transport.name(),
            instance = %target.instance,
            host = %target.host,
            pid = ?child.id(),
            timeout_secs = timeout.as_secs(),
            "Script started"
        );

        // Held open for the whole run; closing it stops the remote watchdog.
        let stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Spawn(std::io::Error::other("stdout not captured")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Spawn(std::io::Error::other("stderr not captured")))?;

        let mut capture = Capture::new(output);
        let mut out_buf = [0u8; READ_BUFFER_SIZE];
        let mut err_buf = [0u8; READ_BUFFER_SIZE];
        let mut out_open = true;
        let mut err_open = true;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let finish = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Finish::Aborted(AbortReason::Cancelled),
                _ = &mut deadline => break Finish::Aborted(AbortReason::TimedOut),
                read = stdout.read(&mut out_buf), if out_open => match read {
                    Ok(0) => out_open = false,
                    Ok(n) => capture.push(OutputStream::Stdout, &out_buf[..n]),
                    Err(e) => {
                        warn!(error = %e, "Failed to read script stdout");
                        out_open = false;
                    }
                },
                read = stderr.read(&mut err_buf), if err_open => match read {
                    Ok(0) => err_open = false,
                    Ok(n) => capture.push(OutputStream::Stderr, &err_buf[..n]),
                    Err(e) => {
                        warn!(error = %e, "Failed to read script stderr");
                        err_open = false;
                    }
                },
                status = child.wait(), if !out_open && !err_open => {
                    break Finish::Exited(exit_code(status?));
                }
            }
        };
        capture.flush();

        let outcome = match finish {
            Finish::Exited(code) => ScriptOutcome::Exited { code },
            Finish::Aborted(reason) => {
                self.terminate(&mut child, reason).await;
                ScriptOutcome::Aborted { reason }
            }
        };
        drop(stdin);

        let duration_ms = started.elapsed().as_millis() as u64;
        let Capture { stdout, stderr, .. } = capture;

        if let ScriptOutcome::Exited { code } = outcome {
            if let Some(err) = self.transport.classify_failure(target, code, &stdout, &stderr) {
                warn!(instance = %target.instance, error = %err, "Remote shell failed");
                return Err(err);
            }
        }

        info!(
            instance = %target.instance,
            outcome = ?outcome,
            duration_ms,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Script finished"
        );

        Ok(ScriptResult {
            stdout,
            stderr,
            outcome,
            duration_ms,
        })
    }

    /// Kill the child's process group and reap it within the grace period.
    async fn terminate(&self, child: &mut Child, reason: AbortReason) {
        debug!(pid = ?child.id(), reason = reason.as_str(), "Terminating script");
        kill_process_group(child);
        match tokio::time::timeout(self.abort_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(status = %status, "Script process reaped"),
            Ok(Err(e)) => warn!(error = %e, "Failed to reap script process"),
            Err(_) => warn!(
                grace_ms = self.abort_grace.as_millis() as u64,
                "Script process did not exit within grace period"
            ),
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: kill(2) has no memory-safety preconditions. The group id
        // is the child's pid because it was spawned with process_group(0).
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        if rc == 0 {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.start_kill();
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
