use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::error::SandboxError;
use super::marker::Marker;
use super::reader::PromptReader;
use super::transfer::{
    self, TransferMode, TransferSettings, decode_chunks, encode_chunks, join_transfer,
    parse_size, shell_quote,
};
use super::{Mode, SandboxController};

pub const MONITOR_PROMPT: &str = "(qemu) ";
/// Ctrl-A c: switch focus between the serial console and the monitor.
pub const ESCAPE: [u8; 2] = [0x01, b'c'];
pub const DEFAULT_SNAPSHOT: &str = "grz";
/// Guest prompt text in front of the marker.
pub const SHELL_PROMPT: &str = "$ ";

/// The console/monitor protocol over one writer and one reader.
pub struct Console<W, R> {
    writer: W,
    reader: PromptReader<R>,
    marker: Marker,
    mode: Mode,
    fresh: bool,
    snapshot: String,
    transfer: TransferSettings,
}

impl<W, R> Console<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    pub fn new(writer: W, reader: R, marker: Marker) -> Self {
        Self {
            writer,
            reader: PromptReader::new(reader),
            marker,
            mode: Mode::Console,
            fresh: false,
            snapshot: DEFAULT_SNAPSHOT.to_string(),
            transfer: TransferSettings::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reader.set_timeout(timeout);
        self
    }

    pub fn with_snapshot(mut self, name: impl Into<String>) -> Self {
        self.snapshot = name.into();
        self
    }

    pub fn with_transfer(mut self, transfer: TransferSettings) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the guest is known to be at the clean snapshot.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Record that the guest was just started from the clean snapshot.
    pub fn mark_fresh(&mut self) {
        self.fresh = true;
    }

    /// Wait for arbitrary text, e.g. the first shell prompt after a cold boot.
    pub async fn wait_for(&mut self, prompt: &str) -> Result<String, SandboxError> {
        self.reader.read_until(prompt, &mut |_: &str| {}).await
    }

    /// Replace the guest prompt with one that ends in the marker.
    ///
    /// The whole of `PS1` is set, so running this again after `loadvm`
    /// restored a marked prompt still leaves exactly one marker.
    pub async fn set_prompt(&mut self) -> Result<(), SandboxError> {
        let (head, tail) = self.marker.halves();
        let cmd = format!("export PS1='{SHELL_PROMPT}''{head}''{tail}'");
        self.run_shell(&cmd, &mut |_: &str| {}).await?;
        Ok(())
    }

    /// Send an empty line and wait for a fresh prompt.
    pub async fn resync(&mut self) -> Result<(), SandboxError> {
        self.expect_mode(Mode::Console)?;
        self.send_line("").await?;
        self.reader
            .read_until(self.marker.as_str(), &mut |_: &str| {})
            .await?;
        Ok(())
    }

    /// Replace the clean snapshot with the current VM state.
    pub async fn save(&mut self) -> Result<(), SandboxError> {
        info!(snapshot = %self.snapshot, "Saving snapshot");
        let snapshot = self.snapshot.clone();
        self.run_monitor(&format!("delvm {snapshot}")).await?;
        self.run_monitor(&format!("savevm {snapshot}")).await?;
        self.fresh = true;
        Ok(())
    }

    /// Ask the hypervisor to exit. Does not wait for a reply.
    pub async fn quit(&mut self) -> Result<(), SandboxError> {
        if self.mode == Mode::Console {
            self.enter_monitor().await?;
        }
        self.send_line("quit").await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SandboxError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SandboxError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write(&bytes).await
    }

    fn expect_mode(&self, expected: Mode) -> Result<(), SandboxError> {
        if self.mode == expected {
            Ok(())
        } else {
            Err(SandboxError::WrongMode {
                expected,
                actual: self.mode,
            })
        }
    }

    async fn enter_monitor(&mut self) -> Result<(), SandboxError> {
        self.expect_mode(Mode::Console)?;
        self.write(&ESCAPE).await?;
        self.mode = Mode::Monitor;
        self.reader
            .read_until(MONITOR_PROMPT, &mut |_: &str| {})
            .await?;
        Ok(())
    }

    async fn leave_monitor(&mut self) -> Result<(), SandboxError> {
        self.expect_mode(Mode::Monitor)?;
        self.write(&ESCAPE).await?;
        self.mode = Mode::Console;
        // The hypervisor ends the switch with a newline.
        self.reader.read_until("\n", &mut |_: &str| {}).await?;
        Ok(())
    }

    async fn run_monitor(&mut self, cmd: &str) -> Result<String, SandboxError> {
        self.enter_monitor().await?;
        debug!(cmd, "Monitor");
        self.send_line(cmd).await?;
        let out = self
            .reader
            .read_until(MONITOR_PROMPT, &mut |_: &str| {})
            .await?;
        self.leave_monitor().await?;
        Ok(after_echo(&out).to_string())
    }

    async fn run_shell(
        &mut self,
        cmd: &str,
        on_line: &mut (dyn FnMut(&str) + Send + '_),
    ) -> Result<String, SandboxError> {
        self.expect_mode(Mode::Console)?;
        debug!(cmd, "Shell");
        self.send_line(cmd).await?;

        let mut echoed = false;
        let out = self
            .reader
            .read_until(self.marker.as_str(), &mut |line: &str| {
                if echoed {
                    on_line(line);
                } else {
                    echoed = true;
                }
            })
            .await?;
        Ok(shell_output(&out).to_string())
    }

    /// Shell command expected to print nothing.
    async fn run_quiet(&mut self, cmd: &str) -> Result<(), SandboxError> {
        let out = self.run_shell(cmd, &mut |_: &str| {}).await?;
        let out = out.trim();
        if out.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::Transfer(format!("guest: {out}")))
        }
    }

    async fn guest_size(&mut self, guest_path: &str) -> Result<u64, SandboxError> {
        let cmd = format!("ls -l {} | awk '{{print $5}}'", shell_quote(guest_path));
        let out = self.run_shell(&cmd, &mut |_: &str| {}).await?;
        parse_size(&out)
    }

    async fn upload_stream(&mut self, guest_path: &str, host_path: &Path) -> Result<u64, SandboxError> {
        let size = tokio::fs::metadata(host_path)
            .await
            .map_err(|e| {
                SandboxError::Transfer(format!("cannot stat '{}': {e}", host_path.display()))
            })?
            .len();
        let task = transfer::spawn_upload(&self.transfer.socket, host_path).await?;

        let cmd = format!(
            "head -c {size} {} > {}",
            self.transfer.device,
            shell_quote(guest_path)
        );
        if let Err(e) = self.run_quiet(&cmd).await {
            task.abort();
            return Err(e);
        }
        join_transfer(task).await
    }

    async fn upload_chunked(&mut self, guest_path: &str, host_path: &Path) -> Result<u64, SandboxError> {
        let data = tokio::fs::read(host_path).await.map_err(|e| {
            SandboxError::Transfer(format!("cannot read '{}': {e}", host_path.display()))
        })?;
        let staged = shell_quote(&format!("{guest_path}.b64"));

        self.run_quiet(&format!(": > {staged}")).await?;
        for chunk in encode_chunks(&data, self.transfer.chunk_limit) {
            self.run_quiet(&format!("printf '%s' '{chunk}' >> {staged}"))
                .await?;
        }
        self.run_quiet(&format!(
            "base64 -d {staged} > {} && rm {staged}",
            shell_quote(guest_path)
        ))
        .await?;
        Ok(data.len() as u64)
    }

    async fn download_stream(&mut self, host_path: &Path, guest_path: &str) -> Result<u64, SandboxError> {
        let size = self.guest_size(guest_path).await?;
        let task = transfer::spawn_download(&self.transfer.socket, host_path, size).await?;

        let cmd = format!("cat {} > {}", shell_quote(guest_path), self.transfer.device);
        if let Err(e) = self.run_quiet(&cmd).await {
            task.abort();
            return Err(e);
        }
        join_transfer(task).await
    }

    async fn download_chunked(&mut self, host_path: &Path, guest_path: &str) -> Result<u64, SandboxError> {
        let size = self.guest_size(guest_path).await?;
        let out = self
            .run_shell(&format!("base64 {}", shell_quote(guest_path)), &mut |_: &str| {})
            .await?;
        let data = decode_chunks(out.lines())?;
        if data.len() as u64 != size {
            return Err(SandboxError::Transfer(format!(
                "'{guest_path}' is {size} bytes but {} arrived",
                data.len()
            )));
        }
        tokio::fs::write(host_path, &data).await.map_err(|e| {
            SandboxError::Transfer(format!("cannot write '{}': {e}", host_path.display()))
        })?;
        Ok(size)
    }
}

#[async_trait]
impl<W, R> SandboxController for Console<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    async fn reset(&mut self) -> Result<(), SandboxError> {
        if self.fresh {
            debug!("Guest already clean, skipping reset");
            return Ok(());
        }
        info!(snapshot = %self.snapshot, "Restoring snapshot");
        let snapshot = self.snapshot.clone();
        self.run_monitor(&format!("loadvm {snapshot}")).await?;
        // Reloading reconnects the console with the snapshot's prompt.
        self.set_prompt().await?;
        self.resync().await?;
        self.fresh = true;
        Ok(())
    }

    async fn monitor(&mut self, cmd: &str) -> Result<String, SandboxError> {
        self.fresh = false;
        self.run_monitor(cmd).await
    }

    async fn shell_report(
        &mut self,
        cmd: &str,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, SandboxError> {
        self.fresh = false;
        self.run_shell(cmd, on_line).await
    }

    async fn copy_to_guest(&mut self, guest_path: &str, host_path: &Path) -> Result<u64, SandboxError> {
        self.fresh = false;
        let sent = match self.transfer.mode {
            TransferMode::Stream => self.upload_stream(guest_path, host_path).await?,
            TransferMode::Chunked => self.upload_chunked(guest_path, host_path).await?,
        };
        debug!(guest_path, bytes = sent, "Copied to guest");
        Ok(sent)
    }

    async fn copy_to_host(&mut self, host_path: &Path, guest_path: &str) -> Result<u64, SandboxError> {
        self.fresh = false;
        let received = match self.transfer.mode {
            TransferMode::Stream => self.download_stream(host_path, guest_path).await?,
            TransferMode::Chunked => self.download_chunked(host_path, guest_path).await?,
        };
        debug!(guest_path, bytes = received, "Copied to host");
        Ok(received)
    }
}

/// Drop the echoed command line.
fn after_echo(out: &str) -> &str {
    out.split_once('\n').map_or("", |(_, rest)| rest)
}

/// Shell output between the echoed command and the prompt. The unterminated
/// tail is the guest's own prompt text.
fn shell_output(out: &str) -> &str {
    let body = after_echo(out);
    match body.rfind('\n') {
        Some(end) => &body[..=end],
        None => "",
    }
}
