//! Maps a path observed in a failed file-access syscall back to a host file and
//! to the place it has to land inside the sandbox.

use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Host executable search.
pub trait ExecutableLookup {
    fn find(&self, program: &str) -> Option<PathBuf>;
}

/// Searches `$PATH` the way a shell would.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathLookup;

impl ExecutableLookup for PathLookup {
    fn find(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

impl<L: ExecutableLookup + ?Sized> ExecutableLookup for &L {
    fn find(&self, program: &str) -> Option<PathBuf> {
        (**self).find(program)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    /// The raw trace fragment the dependency was inferred from.
    pub fragment: String,
    pub host_source: PathBuf,
    pub sandbox_destination: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unparsable trace fragment {fragment:?}: {reason}")]
    UnparsableFragment {
        fragment: String,
        reason: &'static str,
    },
    #[error("program {program} not found on host")]
    ProgramNotFound { program: String },
    #[error("dependency not found on host: {sandbox_path}")]
    DependencyNotFound {
        sandbox_path: String,
        host_path: PathBuf,
    },
}

/// The path argument pulled out of a trace fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate<'a> {
    Absolute(&'a str),
    Relative(&'a str),
}

/// Extract the quoted path from a fragment such as `"/lib/libfoo.so"`.
pub fn extract_candidate(fragment: &str) -> Result<Candidate<'_>, ResolveError> {
    let reject = |reason| ResolveError::UnparsableFragment {
        fragment: fragment.to_string(),
        reason,
    };

    let trimmed = fragment.trim();
    let inner = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(|| reject("not a quoted string"))?;

    if inner.is_empty() {
        return Err(reject("empty path"));
    }
    if inner.contains('"') || inner.contains('\0') {
        return Err(reject("embedded quote or NUL"));
    }
    if Path::new(inner)
        .components()
        .any(|component| component == Component::ParentDir)
    {
        return Err(reject("path escapes its root"));
    }

    if inner.starts_with('/') {
        Ok(Candidate::Absolute(inner))
    } else {
        Ok(Candidate::Relative(inner))
    }
}

/// Resolves trace fragments against the host filesystem.
#[derive(Debug, Clone)]
pub struct HostResolver<L = PathLookup> {
    lookup: L,
    sandbox_bin_dir: String,
}

impl HostResolver<PathLookup> {
    pub fn new(sandbox_bin_dir: impl Into<String>) -> Self {
        Self::with_lookup(PathLookup, sandbox_bin_dir)
    }
}

impl<L: ExecutableLookup> HostResolver<L> {
    pub fn with_lookup(lookup: L, sandbox_bin_dir: impl Into<String>) -> Self {
        Self {
            lookup,
            sandbox_bin_dir: sandbox_bin_dir.into(),
        }
    }

    pub fn sandbox_bin_dir(&self) -> &str {
        &self.sandbox_bin_dir
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Absolute candidates mirror host and sandbox paths. Relative candidates are
    /// taken relative to the directory holding the traced program on the host and
    /// land under the sandbox binary directory.
    pub fn resolve(&self, fragment: &str, command: &[String]) -> Result<MissingDependency, ResolveError> {
        let (host_source, sandbox_destination) = match extract_candidate(fragment)? {
            Candidate::Absolute(path) => (PathBuf::from(path), path.to_string()),
            Candidate::Relative(path) => {
                let program = command.first().map(String::as_str).unwrap_or_default();
                let binary = self
                    .lookup
                    .find(program)
                    .ok_or_else(|| ResolveError::ProgramNotFound {
                        program: program.to_string(),
                    })?;
                let base = binary.parent().unwrap_or_else(|| Path::new("/"));
                (base.join(path), self.sandbox_path(path))
            }
        };

        if !host_source.is_file() {
            return Err(ResolveError::DependencyNotFound {
                sandbox_path: sandbox_destination,
                host_path: host_source,
            });
        }

        Ok(MissingDependency {
            fragment: fragment.to_string(),
            host_source,
            sandbox_destination,
        })
    }

    /// Destination for a file named relative to the sandbox binary directory.
    pub fn sandbox_path(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches("./");
        format!("{}/{}", self.sandbox_bin_dir.trim_end_matches('/'), relative)
    }
}
