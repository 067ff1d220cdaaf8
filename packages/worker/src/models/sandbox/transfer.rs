//! Host side of host/guest file transfer.
//!
//! The streaming transport moves raw bytes over the unix socket backing the
//! guest's virtio-serial port while a shell command reads or writes the
//! device inside the guest. The chunked transport needs no side channel: the
//! file travels base64-encoded inside shell commands and their output.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tracing::debug;

use super::error::SandboxError;

/// Base64 characters carried by one shell command in chunked mode.
pub const CHUNK_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Stream,
    Chunked,
}

/// Everything a console needs to move files.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub mode: TransferMode,
    /// Host end of the side channel.
    pub socket: PathBuf,
    /// Guest device node of the side channel.
    pub device: String,
    pub chunk_limit: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            mode: TransferMode::Chunked,
            socket: PathBuf::new(),
            device: "/dev/vport0p1".into(),
            chunk_limit: CHUNK_LIMIT,
        }
    }
}

/// Connect to the side channel and stream `source` into it.
///
/// The returned handle resolves to the number of bytes sent once the host
/// side is done; the caller must await it before reporting success.
pub async fn spawn_upload(
    socket: &Path,
    source: &Path,
) -> Result<JoinHandle<Result<u64, SandboxError>>, SandboxError> {
    let mut file = File::open(source).await.map_err(|e| {
        SandboxError::Transfer(format!("cannot open '{}': {e}", source.display()))
    })?;
    let mut stream = connect(socket).await?;

    Ok(tokio::spawn(async move {
        let sent = tokio::io::copy(&mut file, &mut stream)
            .await
            .map_err(|e| SandboxError::Transfer(format!("upload: {e}")))?;
        stream.shutdown().await?;
        debug!(bytes = sent, "Upload finished");
        Ok(sent)
    }))
}

/// Connect to the side channel and copy exactly `size` bytes into `dest`.
pub async fn spawn_download(
    socket: &Path,
    dest: &Path,
    size: u64,
) -> Result<JoinHandle<Result<u64, SandboxError>>, SandboxError> {
    let mut file = File::create(dest).await.map_err(|e| {
        SandboxError::Transfer(format!("cannot create '{}': {e}", dest.display()))
    })?;
    let stream = connect(socket).await?;

    Ok(tokio::spawn(async move {
        let mut limited = stream.take(size);
        let received = tokio::io::copy(&mut limited, &mut file)
            .await
            .map_err(|e| SandboxError::Transfer(format!("download: {e}")))?;
        file.flush().await?;
        if received < size {
            return Err(SandboxError::Transfer(format!(
                "download ended after {received} of {size} bytes"
            )));
        }
        debug!(bytes = received, "Download finished");
        Ok(received)
    }))
}

async fn connect(socket: &Path) -> Result<UnixStream, SandboxError> {
    UnixStream::connect(socket).await.map_err(|e| {
        SandboxError::Transfer(format!(
            "cannot connect to side channel '{}': {e}",
            socket.display()
        ))
    })
}

/// Await a transfer task, folding a panic or cancellation into a transfer error.
pub async fn join_transfer(
    handle: JoinHandle<Result<u64, SandboxError>>,
) -> Result<u64, SandboxError> {
    handle
        .await
        .map_err(|e| SandboxError::Transfer(format!("transfer task failed: {e}")))?
}

/// Base64-encode `data` and split it into pieces of at most `limit` characters.
pub fn encode_chunks(data: &[u8], limit: usize) -> Vec<String> {
    let encoded = STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(limit.max(4))
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect()
}

/// Inverse of [`encode_chunks`]. Whitespace, including the line breaks and
/// carriage returns a terminal adds, is ignored.
pub fn decode_chunks<'a>(chunks: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>, SandboxError> {
    let joined: String = chunks
        .into_iter()
        .flat_map(|c| c.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    STANDARD
        .decode(joined)
        .map_err(|e| SandboxError::Transfer(format!("bad base64 from guest: {e}")))
}

/// Byte count printed by `ls -l <file> | awk '{print $5}'`.
pub fn parse_size(output: &str) -> Result<u64, SandboxError> {
    let text = output.trim();
    text.parse()
        .map_err(|_| SandboxError::Transfer(format!("cannot read file size from {text:?}")))
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
