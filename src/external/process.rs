//! Run a user-configured helper command with stdin input, a deadline and
//! kill-on-expiry.

use anyhow::{bail, Result};
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

const WAIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("'{program}' timed out after {after:?}")]
    TimedOut { program: String, after: Duration },
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("i/o with '{program}' failed: {message}")]
    Io { program: String, message: String },
}

/// Program plus arguments, parsed once from a shell-like command line.
/// Arguments may contain `{name}` placeholders filled per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn parse(command_line: &str) -> Result<Self> {
        let trimmed = command_line.trim();
        if trimmed.is_empty() {
            bail!("command line is empty");
        }
        let mut parts = shell_words::split(trimmed)
            .map_err(|err| anyhow::anyhow!("cannot parse '{trimmed}': {err}"))?
            .into_iter();
        let Some(program) = parts.next() else {
            bail!("command line is empty");
        };
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with every `{key}` replaced by its value.
    pub fn args_with(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }

    /// Run with `input` on stdin; returns stdout of a successful exit.
    pub fn run(
        &self,
        vars: &[(&str, &str)],
        input: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProcessError> {
        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(self.args_with(vars))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                // A helper that exits without reading stdin is not an error here.
                let _ = stdin.write_all(&input);
            })
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.wait(&mut child, timeout) {
            Ok(status) => status,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        if let Some(writer) = writer {
            let _ = writer.join();
        }
        let stdout = collect(stdout).map_err(|message| ProcessError::Io {
            program: self.program.clone(),
            message,
        })?;
        let stderr = String::from_utf8_lossy(&collect(stderr).unwrap_or_default())
            .trim()
            .to_string();
        tracing::debug!(
            program = %self.program,
            elapsed_ms = started.elapsed().as_millis() as u64,
            stdout_bytes = stdout.len(),
            "helper command finished"
        );
        if !status.success() {
            return Err(ProcessError::Failed {
                program: self.program.clone(),
                status,
                stderr,
            });
        }
        Ok(stdout)
    }

    fn wait(&self, child: &mut Child, timeout: Duration) -> Result<ExitStatus, ProcessError> {
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(err) => {
                    return Err(ProcessError::Io {
                        program: self.program.clone(),
                        message: err.to_string(),
                    })
                }
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    program = %self.program,
                    timeout_ms = timeout.as_millis() as u64,
                    "helper command timed out; killing"
                );
                return Err(ProcessError::TimedOut {
                    program: self.program.clone(),
                    after: timeout,
                });
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>, String> {
    match reader {
        None => Ok(Vec::new()),
        Some(handle) => match handle.join() {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("pipe reader panicked".to_string()),
        },
    }
}
