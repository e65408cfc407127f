//! Artifact path sandbox.
//!
//! An artifact is only sent to a remote provider if its path is absolute and
//! its canonical target is a regular file under one of the allowed roots.
//! Canonicalization happens before the containment check, so a symlink that
//! sits inside a root but points outside every root is rejected.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path must be absolute: {0}")]
    NotAbsolute(String),
    #[error("Path not under allowed directories: {0}")]
    OutsideRoots(String),
    #[error("Artifact not found: {0}")]
    NotFound(String),
    #[error("Artifact is not a regular file: {0}")]
    NotAFile(String),
    #[error("Cannot resolve {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Allowed roots for artifact reads.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    roots: Vec<PathBuf>,
}

impl PathSandbox {
    /// Build a sandbox from absolute roots. Roots that exist are
    /// canonicalized; missing ones are kept in normalized form.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let roots = roots
            .into_iter()
            .map(Into::into)
            .filter(|root: &PathBuf| root.is_absolute())
            .map(|root| root.canonicalize().unwrap_or_else(|_| normalize(&root)))
            .collect();
        Self { roots }
    }

    /// The usual pair: the project root (working directory) and `$HOME`.
    pub fn project_and_home() -> Result<Self, SandboxError> {
        let cwd = std::env::current_dir().map_err(|source| SandboxError::Io {
            path: ".".to_string(),
            source,
        })?;
        let mut roots = vec![cwd];
        if let Ok(home) = std::env::var("HOME") {
            roots.push(PathBuf::from(home));
        }
        Ok(Self::new(roots))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Validate `path` and return its canonical form.
    pub fn validate(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let candidate = Path::new(path);
        if !candidate.is_absolute() {
            return Err(SandboxError::NotAbsolute(path.to_string()));
        }

        let resolved = match candidate.canonicalize() {
            Ok(resolved) => resolved,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // Report escapes before absence.
                if !self.contains(&resolve_missing(candidate)) {
                    return Err(SandboxError::OutsideRoots(path.to_string()));
                }
                return Err(SandboxError::NotFound(path.to_string()));
            }
            Err(source) => {
                return Err(SandboxError::Io {
                    path: path.to_string(),
                    source,
                })
            }
        };

        if !self.contains(&resolved) {
            return Err(SandboxError::OutsideRoots(path.to_string()));
        }

        if !resolved.is_file() {
            return Err(SandboxError::NotAFile(path.to_string()));
        }

        Ok(resolved)
    }

    fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }
}

/// Best-effort resolution of a path that does not exist: canonicalize the
/// deepest existing ancestor and append the rest lexically.
fn resolve_missing(path: &Path) -> PathBuf {
    let normalized = normalize(path);
    for ancestor in normalized.ancestors().skip(1) {
        if let Ok(base) = ancestor.canonicalize() {
            if let Ok(rest) = normalized.strip_prefix(ancestor) {
                return base.join(rest);
            }
        }
    }
    normalized
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
