use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::error::JudgeError;
use crate::config::MediaConfig;

/// Packs a staging tree into removable media for the guest.
#[async_trait]
pub trait MediaImager: Send + Sync {
    async fn build(&self, staging: &Path, output: &Path) -> Result<(), JudgeError>;
}

/// Read-only ISO image owned by the guest's judging user.
#[derive(Debug, Clone)]
pub struct IsoImager {
    bin: String,
    uid: u32,
    file_mode: String,
}

impl IsoImager {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            bin: config.genisoimage_bin.clone(),
            uid: config.uid,
            file_mode: config.file_mode.clone(),
        }
    }

    pub fn args(&self, staging: &Path, output: &Path) -> Vec<OsString> {
        let uid = self.uid.to_string();
        let mut args: Vec<OsString> = [
            "-quiet",
            // Symlinks in the staging tree point at the problem and the judge.
            "-f",
            "-r",
            "-uid",
            uid.as_str(),
            "-gid",
            uid.as_str(),
            "-file-mode",
            self.file_mode.as_str(),
            "-o",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(output.into());
        args.push(staging.into());
        args
    }
}

#[async_trait]
impl MediaImager for IsoImager {
    async fn build(&self, staging: &Path, output: &Path) -> Result<(), JudgeError> {
        let result = Command::new(&self.bin)
            .args(self.args(staging, output))
            .output()
            .await
            .map_err(|e| JudgeError::Media(format!("cannot execute '{}': {e}", self.bin)))?;

        if !result.status.success() {
            return Err(JudgeError::Media(format!(
                "{} exited with {}: {}",
                self.bin,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        debug!(image = %output.display(), "Media image built");
        Ok(())
    }
}
