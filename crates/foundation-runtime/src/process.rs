use crate::RuntimeError;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DETAIL_LINES: usize = 20;

/// Exit status and captured output of a finished child.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Tail of stderr (or stdout when stderr is empty) for error messages.
    pub fn detail(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = text.trim().lines().collect();
        let tail = &lines[lines.len().saturating_sub(DETAIL_LINES)..];
        if tail.is_empty() {
            format!("exited with {}", self.status)
        } else {
            tail.join("\n")
        }
    }
}

/// Human-readable form of a command line: program plus its first argument.
pub fn describe(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy().into_owned();
    match cmd.get_args().next() {
        Some(arg) => format!("{program} {}", arg.to_string_lossy()),
        None => program,
    }
}

/// Run `cmd` to completion, killing it after `timeout`.
///
/// Output goes to anonymous temp files rather than pipes, so a child that
/// writes more than a pipe buffer cannot block while we wait on it.
pub fn run(cmd: &mut Command, timeout: Duration) -> Result<CommandOutput, RuntimeError> {
    let program = describe(cmd);
    let binary = cmd.get_program().to_string_lossy().into_owned();
    let mut stdout = tempfile::tempfile()?;
    let mut stderr = tempfile::tempfile()?;

    debug!("running {program} (timeout {}s)", timeout.as_secs());
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout.try_clone()?))
        .stderr(Stdio::from(stderr.try_clone()?))
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => RuntimeError::Unavailable(binary),
            _ => RuntimeError::Io(e),
        })?;

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= timeout {
            warn!("{program} exceeded {}s, killing it", timeout.as_secs());
            let _ = child.kill();
            let _ = child.wait();
            return Err(RuntimeError::Timeout {
                program,
                secs: timeout.as_secs(),
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    Ok(CommandOutput {
        status,
        stdout: read_captured(&mut stdout)?,
        stderr: read_captured(&mut stderr)?,
    })
}

/// Like [`run`], but a non-zero exit becomes [`RuntimeError::CommandFailed`].
pub fn run_checked(cmd: &mut Command, timeout: Duration) -> Result<CommandOutput, RuntimeError> {
    let output = run(cmd, timeout)?;
    if output.success() {
        Ok(output)
    } else {
        Err(RuntimeError::CommandFailed {
            program: describe(cmd),
            detail: output.detail(),
        })
    }
}

/// Whether `cmd` exits zero in time. Spawn failures count as "no".
pub fn succeeds(cmd: &mut Command, timeout: Duration) -> bool {
    run(cmd, timeout).is_ok_and(|o| o.success())
}

fn read_captured(file: &mut File) -> Result<String, RuntimeError> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
