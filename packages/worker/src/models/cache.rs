//! Compiled judges, keyed by the SHA-1 of their source.
//!
//! Judges are compiled inside the guest with the guest's toolchain and copied
//! back. Entries are never rewritten, so two workers racing on the same
//! source end up renaming identical binaries over each other.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use common::Sha1Digest;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::error::JudgeError;
use super::sandbox::SandboxController;
use super::sandbox::transfer::shell_quote;

/// Where the compiled judge is left inside the guest.
pub const GUEST_BINARY: &str = "/tmp/judge.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Go,
    C,
    Cpp,
    Rust,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "go" => Some(Self::Go),
            "c" => Some(Self::C),
            "cc" | "cpp" | "cxx" => Some(Self::Cpp),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    /// Guest command building `source` into `output`. Any output means failure.
    pub fn build_command(&self, source: &str, output: &str) -> String {
        let (source, output) = (shell_quote(source), shell_quote(output));
        match self {
            Self::Go => format!("go build -o {output} {source}"),
            Self::C => format!("gcc -O2 -o {output} {source}"),
            Self::Cpp => format!("g++ -O2 -o {output} {source}"),
            Self::Rust => format!("rustc -O --cap-lints allow -o {output} {source}"),
        }
    }
}

pub struct JudgeCache {
    dir: PathBuf,
}

impl JudgeCache {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, JudgeError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(JudgeError::io(format!("cannot create '{}'", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry(&self, digest: &Sha1Digest) -> PathBuf {
        self.dir.join(digest.to_hex())
    }

    /// Path of the compiled judge for `problem_dir`, compiling it on a miss.
    #[instrument(skip(self, sandbox))]
    pub async fn resolve(
        &self,
        sandbox: &mut dyn SandboxController,
        problem_dir: &Path,
    ) -> Result<PathBuf, JudgeError> {
        let source = find_judge_source(problem_dir).await?;
        let digest = Sha1Digest::of_file(&source).await?;
        let binary = self.entry(&digest);

        if tokio::fs::try_exists(&binary).await.unwrap_or(false) {
            debug!(%digest, "Judge cache hit");
            return Ok(binary);
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let language = Language::from_path(&source)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(file_name.clone()))?;

        info!(%digest, source = %source.display(), ?language, "Compiling judge");
        self.compile(sandbox, &source, &file_name, language, &binary)
            .await?;
        Ok(binary)
    }

    async fn compile(
        &self,
        sandbox: &mut dyn SandboxController,
        source: &Path,
        file_name: &str,
        language: Language,
        binary: &Path,
    ) -> Result<(), JudgeError> {
        let guest_source = format!("/tmp/{file_name}");
        sandbox.copy_to_guest(&guest_source, source).await?;

        let output = sandbox
            .shell(&language.build_command(&guest_source, GUEST_BINARY))
            .await?;
        if !output.trim().is_empty() {
            if let Err(e) = sandbox.reset().await {
                warn!(error = %e, "Reset after failed compilation failed");
            }
            return Err(JudgeError::CompileFailure(output.trim().to_string()));
        }

        let part = self.dir.join(format!(".{}.part", Uuid::new_v4()));
        let stored = self.store(sandbox, &part, binary).await;
        if stored.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        stored?;

        sandbox.reset().await?;
        Ok(())
    }

    async fn store(
        &self,
        sandbox: &mut dyn SandboxController,
        part: &Path,
        binary: &Path,
    ) -> Result<(), JudgeError> {
        sandbox.copy_to_host(part, GUEST_BINARY).await?;
        tokio::fs::set_permissions(part, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(JudgeError::io(format!("cannot chmod '{}'", part.display())))?;
        tokio::fs::rename(part, binary)
            .await
            .map_err(JudgeError::io(format!("cannot store '{}'", binary.display())))?;
        Ok(())
    }
}

/// The single `judge.*` file in `problem_dir`, ignoring `~` backups.
pub async fn find_judge_source(problem_dir: &Path) -> Result<PathBuf, JudgeError> {
    let mut entries = tokio::fs::read_dir(problem_dir)
        .await
        .map_err(|_| JudgeError::ProblemNotFound(problem_dir.to_path_buf()))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(JudgeError::io(format!("cannot list '{}'", problem_dir.display())))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("judge.") && !name.ends_with('~') {
            candidates.push(entry.path());
        }
    }

    match candidates.len() {
        0 => Err(JudgeError::NoJudgeSource(problem_dir.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        _ => Err(JudgeError::MultipleJudgeSources(problem_dir.to_path_buf())),
    }
}
