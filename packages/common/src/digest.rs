use std::fmt;
use std::path::Path;

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, BufReader};

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// A SHA-1 content digest, used to key compiled artifacts by their source.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Digest([u8; 20]);

impl Sha1Digest {
    /// Compute the SHA-1 digest of the given data.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    /// Stream a file through SHA-1 without loading it whole.
    pub async fn of_file(path: &Path) -> Result<Self, DigestError> {
        let io_err = |source| DigestError::Io {
            path: path.display().to_string(),
            source,
        };

        let file = fs::File::open(path).await.map_err(io_err)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buf).await.map_err(io_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(Self(hasher.finalize().into()))
    }

    /// Return the digest as a 40-character lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Digest({})", self.to_hex())
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
