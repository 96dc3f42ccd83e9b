//! Project root resolution.
//!
//! Commands run from the enclosing project root when there is one, otherwise
//! from the caller's directory.

use std::path::{Path, PathBuf};

/// Finds the project a directory belongs to.
pub trait ProjectResolver: Send + Sync {
    fn project_root(&self, start: &Path) -> Option<PathBuf>;
}

/// Walks up from the start directory looking for marker files.
///
/// Markers are tried in order over the whole ancestor chain: a `mix.exs`
/// anywhere above wins over a nearer `.git`.
#[derive(Debug, Clone)]
pub struct MarkerResolver {
    markers: Vec<String>,
}

impl MarkerResolver {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for MarkerResolver {
    fn default() -> Self {
        Self::new(["mix.exs", ".git"])
    }
}

impl ProjectResolver for MarkerResolver {
    fn project_root(&self, start: &Path) -> Option<PathBuf> {
        self.markers.iter().find_map(|marker| {
            start
                .ancestors()
                .find(|dir| dir.join(marker).exists())
                .map(Path::to_path_buf)
        })
    }
}

/// Resolves nothing; commands run where the caller is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProject;

impl ProjectResolver for NoProject {
    fn project_root(&self, _start: &Path) -> Option<PathBuf> {
        None
    }
}

/// Project root of `start`, falling back to `start` itself
pub fn resolve_working_dir(resolver: &dyn ProjectResolver, start: &Path) -> PathBuf {
    resolver
        .project_root(start)
        .unwrap_or_else(|| start.to_path_buf())
}
