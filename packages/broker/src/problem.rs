use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::Problem;
use common::archive::pack_dir;
use common::config::{find_problem, problem_relative_path};
use tracing::{debug, instrument};

use crate::error::BrokerError;

/// Where the broker gets problem contents from.
#[async_trait]
pub trait ProblemSource: Send + Sync {
    async fn archive(&self, id: &str) -> Result<Problem, BrokerError>;
}

/// Problems laid out as directories under one or more search roots.
#[derive(Debug, Clone)]
pub struct ProblemStore {
    roots: Vec<PathBuf>,
}

impl ProblemStore {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// First root containing `id` as a directory.
    pub fn resolve(&self, id: &str) -> Result<PathBuf, BrokerError> {
        validate_id(id)?;
        find_problem(&self.roots, id).ok_or_else(|| BrokerError::ProblemNotFound(id.to_string()))
    }
}

/// Problem ids are relative paths that stay inside their root.
pub fn validate_id(id: &str) -> Result<&Path, BrokerError> {
    problem_relative_path(id).ok_or_else(|| BrokerError::InvalidProblemId(id.to_string()))
}

#[async_trait]
impl ProblemSource for ProblemStore {
    #[instrument(skip(self))]
    async fn archive(&self, id: &str) -> Result<Problem, BrokerError> {
        let dir = self.resolve(id)?;
        let targz = tokio::task::spawn_blocking(move || pack_dir(&dir))
            .await
            .map_err(|e| BrokerError::Archive {
                id: id.to_string(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| BrokerError::Archive {
                id: id.to_string(),
                source,
            })?;

        debug!(bytes = targz.len(), "Problem packaged");
        Ok(Problem {
            id: id.to_string(),
            targz,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("cpp/sum").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("/etc").is_err());
        assert!(validate_id("cpp/../../etc").is_err());
    }

    #[test]
    fn test_resolve_searches_roots_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::create_dir_all(second.path().join("cpp/sum")).unwrap();

        let store = ProblemStore::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(
            store.resolve("cpp/sum").unwrap(),
            second.path().join("cpp/sum")
        );
        assert!(matches!(
            store.resolve("cpp/missing"),
            Err(BrokerError::ProblemNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("sum");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("judge.go"), "package main\n").unwrap();

        let store = ProblemStore::new(vec![root.path().to_path_buf()]);
        assert!(store.contains("sum").await);

        let problem = store.archive("sum").await.unwrap();
        assert_eq!(problem.id, "sum");

        let out = tempfile::tempdir().unwrap();
        common::archive::unpack(&problem.targz, out.path()).unwrap();
        assert_eq!(
            fs::read_to_string(out.path().join("judge.go")).unwrap(),
            "package main\n"
        );
    }
}
