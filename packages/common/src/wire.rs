//! Newline-delimited JSON over a persistent byte stream.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Upper bound for a single frame. Problem archives travel as one frame.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection closed")]
    Closed,

    #[error("frame error: {0}")]
    Frame(#[from] LinesCodecError),

    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
}

/// One JSON document per line.
#[derive(Debug)]
pub struct JsonLines<S> {
    inner: Framed<S, LinesCodec>,
}

impl<S> JsonLines<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_max_frame(stream, DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(stream: S, max_frame: usize) -> Self {
        Self {
            inner: Framed::new(stream, LinesCodec::new_with_max_length(max_frame)),
        }
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), WireError> {
        // serde_json escapes control characters, so a document never spans lines.
        let line = serde_json::to_string(value)?;
        self.inner.send(line).await?;
        Ok(())
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, WireError> {
        match self.inner.next().await {
            Some(Ok(line)) => Ok(serde_json::from_str(&line)?),
            Some(Err(e)) => Err(e.into()),
            None => Err(WireError::Closed),
        }
    }

    pub async fn close(&mut self) -> Result<(), WireError> {
        SinkExt::<String>::close(&mut self.inner).await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }
}
