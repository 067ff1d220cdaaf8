use std::path::PathBuf;

use common::digest::DigestError;
use thiserror::Error;

use super::sandbox::SandboxError;

#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("'{0}' is not a problem directory")]
    ProblemNotFound(PathBuf),

    #[error("No judge source in '{0}'")]
    NoJudgeSource(PathBuf),

    #[error("Multiple judge sources in '{0}'")]
    MultipleJudgeSources(PathBuf),

    #[error("Judge language not supported: '{0}'")]
    UnsupportedLanguage(String),

    #[error("Judge does not compile:\n{0}")]
    CompileFailure(String),

    #[error("Cannot build media image: {0}")]
    Media(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl JudgeError {
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}
