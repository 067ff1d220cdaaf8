//! One submission, start to verdict, inside a pristine guest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::cache::JudgeCache;
use super::error::JudgeError;
use super::media::{IsoImager, MediaImager};
use super::sandbox::SandboxController;
use super::verdict::VerdictParser;
use crate::config::MediaConfig;

const STAGING_DIR: &str = "current";
const MEDIA_IMAGE: &str = "media.iso";

pub struct EvalSession {
    work_dir: PathBuf,
    cache: JudgeCache,
    imager: Arc<dyn MediaImager>,
    slot: String,
    driver: String,
}

impl EvalSession {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        cache: JudgeCache,
        imager: Arc<dyn MediaImager>,
        slot: impl Into<String>,
        driver: impl Into<String>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            cache,
            imager,
            slot: slot.into(),
            driver: driver.into(),
        }
    }

    pub fn with_media(work_dir: impl Into<PathBuf>, cache: JudgeCache, media: &MediaConfig) -> Self {
        Self::new(
            work_dir,
            cache,
            Arc::new(IsoImager::new(media)),
            media.slot.clone(),
            media.driver.clone(),
        )
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join(STAGING_DIR)
    }

    pub fn image_path(&self) -> PathBuf {
        self.work_dir.join(MEDIA_IMAGE)
    }

    /// Judge `solution` against `problem_dir`, forwarding progress lines to
    /// `report`. Returns the verdict text.
    #[instrument(skip(self, sandbox, solution, report), fields(solution_len = solution.len()))]
    pub async fn evaluate<F>(
        &self,
        sandbox: &mut dyn SandboxController,
        problem_dir: &Path,
        solution: &[u8],
        mut report: F,
    ) -> Result<String, JudgeError>
    where
        F: FnMut(&str) + Send,
    {
        if !tokio::fs::metadata(problem_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(JudgeError::ProblemNotFound(problem_dir.to_path_buf()));
        }

        let mut inserted = false;
        let result = self
            .run(sandbox, problem_dir, solution, &mut report, &mut inserted)
            .await;
        self.cleanup(sandbox, inserted).await;
        result
    }

    async fn run(
        &self,
        sandbox: &mut dyn SandboxController,
        problem_dir: &Path,
        solution: &[u8],
        report: &mut (dyn FnMut(&str) + Send + '_),
        inserted: &mut bool,
    ) -> Result<String, JudgeError> {
        let staging = self.staging_dir();
        self.prepare_staging(&staging).await?;

        let problem_dir = tokio::fs::canonicalize(problem_dir)
            .await
            .map_err(JudgeError::io(format!("cannot resolve '{}'", problem_dir.display())))?;
        symlink(&problem_dir, &staging.join("problem")).await?;

        let judge = self.cache.resolve(sandbox, &problem_dir).await?;
        symlink(&judge, &staging.join("judge")).await?;

        let solution_path = staging.join("solution");
        tokio::fs::write(&solution_path, solution)
            .await
            .map_err(JudgeError::io(format!("cannot write '{}'", solution_path.display())))?;

        let image = self.image_path();
        self.imager.build(&staging, &image).await?;

        sandbox.reset().await?;
        sandbox
            .monitor(&format!("change {} {}", self.slot, image.display()))
            .await?;
        *inserted = true;

        let mut parser = VerdictParser::new();
        sandbox
            .shell_report(&self.driver, &mut |line: &str| {
                if let Some(progress) = parser.feed(line) {
                    report(&progress);
                }
            })
            .await?;

        let verdict = parser.finish();
        info!(verdict = %verdict.trim_end(), "Evaluation finished");
        Ok(verdict)
    }

    async fn prepare_staging(&self, staging: &Path) -> Result<(), JudgeError> {
        match tokio::fs::remove_dir_all(staging).await {
            Ok(()) => debug!(staging = %staging.display(), "Removed stale staging tree"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(JudgeError::io(format!("cannot remove '{}'", staging.display()))(e));
            }
        }
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(JudgeError::io(format!("cannot create '{}'", staging.display())))
    }

    async fn cleanup(&self, sandbox: &mut dyn SandboxController, inserted: bool) {
        if inserted {
            if let Err(e) = sandbox.monitor(&format!("eject {}", self.slot)).await {
                warn!(error = %e, slot = %self.slot, "Cannot eject media");
            }
        }

        let image = self.image_path();
        if let Err(e) = tokio::fs::remove_file(&image).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, image = %image.display(), "Cannot remove media image");
            }
        }

        let staging = self.staging_dir();
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, staging = %staging.display(), "Cannot remove staging tree");
            }
        }
    }
}

async fn symlink(target: &Path, link: &Path) -> Result<(), JudgeError> {
    tokio::fs::symlink(target, link).await.map_err(JudgeError::io(format!(
        "cannot link '{}' to '{}'",
        link.display(),
        target.display()
    )))
}
