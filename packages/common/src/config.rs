use std::env;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

/// Prefix for environment overrides, e.g. `GARZON__WORKER__BROKER_ADDR`.
pub const ENV_PREFIX: &str = "GARZON";

/// Resolve the config file path (without extension), honouring `GARZON_CONFIG`.
pub fn config_path(default: &str) -> String {
    env::var("GARZON_CONFIG").unwrap_or_else(|_| default.to_string())
}

/// Split an OS path list (`GARZON_PATH` style) into directories.
/// An empty or missing list means the current directory.
pub fn split_search_path(list: Option<&str>) -> Vec<PathBuf> {
    match list {
        Some(list) if !list.is_empty() => env::split_paths(list).collect(),
        _ => vec![PathBuf::from(".")],
    }
}

/// A problem id as a path relative to a search root, or `None` if it is
/// empty, absolute or climbs out of the root.
pub fn problem_relative_path(id: &str) -> Option<&Path> {
    let path = Path::new(id);
    let well_formed = !id.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    well_formed.then_some(path)
}

/// First root holding `id` as a directory.
pub fn find_problem(roots: &[PathBuf], id: &str) -> Option<PathBuf> {
    let relative = problem_relative_path(id)?;
    roots
        .iter()
        .map(|root| root.join(relative))
        .find(|candidate| candidate.is_dir())
}

/// Settings shared by both ends of a broker connection.
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Largest accepted JSON frame in bytes. Default: 64 MiB.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_max_frame_bytes() -> usize {
    crate::wire::DEFAULT_MAX_FRAME
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}
