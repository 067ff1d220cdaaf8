//! Prompt-terminated reads over the VM's output stream.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{error, trace};

use super::error::SandboxError;

const READ_CHUNK: usize = 4096;

/// Accumulates output until it ends with an expected prompt.
///
/// Complete lines are handed to a callback as they arrive. A prompt only
/// counts when it is the last thing the VM wrote, so prompt text echoed
/// earlier in the stream never ends a wait.
pub struct PromptReader<R> {
    inner: R,
    timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> PromptReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            timeout: None,
        }
    }

    /// Give up on any single wait after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Read until the output ends with `prompt` and return everything before it.
    ///
    /// Each newline-terminated line is passed to `on_line` without its `\n`.
    /// EOF, a read error or the timeout end the wait with
    /// [`SandboxError::ProtocolDesync`].
    pub async fn read_until(
        &mut self,
        prompt: &str,
        on_line: &mut (dyn FnMut(&str) + Send + '_),
    ) -> Result<String, SandboxError> {
        let prompt = prompt.as_bytes();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut buf = Vec::new();
        // Start of the first unreported line, and how far newlines were searched.
        let mut reported = 0;
        let mut scanned = 0;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let done = buf.ends_with(prompt);
            let limit = if done { buf.len() - prompt.len() } else { buf.len() };
            let from = scanned.max(reported);
            if from < limit {
                for (offset, _) in buf[from..limit].iter().enumerate().filter(|(_, b)| **b == b'\n') {
                    let end = from + offset;
                    on_line(&String::from_utf8_lossy(&buf[reported..end]));
                    reported = end + 1;
                }
            }
            scanned = limit;

            if done {
                buf.truncate(limit);
                return Ok(String::from_utf8_lossy(&buf).into_owned());
            }

            let read = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.inner.read(&mut chunk)).await {
                        Ok(read) => read,
                        Err(_) => return Err(desync(prompt, "timed out", buf)),
                    }
                }
                None => self.inner.read(&mut chunk).await,
            };

            match read {
                Ok(0) => return Err(desync(prompt, "end of stream", buf)),
                Ok(n) => {
                    trace!(bytes = n, "VM output");
                    buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => return Err(desync(prompt, &e.to_string(), buf)),
            }
        }
    }
}

fn desync(prompt: &[u8], reason: &str, partial: Vec<u8>) -> SandboxError {
    let expected = String::from_utf8_lossy(prompt).into_owned();
    let partial = String::from_utf8_lossy(&partial).into_owned();
    error!(%expected, %reason, partial_len = partial.len(), "Lost sync with VM output");
    SandboxError::ProtocolDesync {
        expected,
        reason: reason.to_string(),
        partial,
    }
}
