use crate::sandbox::Sandbox;
use capsules_container_exec::{ContainerRuntime, RuntimeError};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("failed to open host file {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("runtime could not write {destination}: {source}")]
    Runtime {
        destination: String,
        source: RuntimeError,
    },
}

/// Copy one host file into the sandbox at `destination`, keeping its permission bits.
///
/// The destination's parent directory must already exist in the sandbox. Writing
/// the same file twice leaves the same content behind.
pub fn inject<R: ContainerRuntime>(
    runtime: &R,
    sandbox: &Sandbox,
    host_source: &Path,
    destination: &str,
) -> Result<(), InjectError> {
    let mut file = File::open(host_source).map_err(|source| InjectError::Io {
        path: host_source.to_path_buf(),
        source,
    })?;
    let mode = file_mode(&file).map_err(|source| InjectError::Io {
        path: host_source.to_path_buf(),
        source,
    })?;

    debug!(
        sandbox = %sandbox.name(),
        mode = %format!("{:o}", mode),
        "injecting {} -> {}",
        host_source.display(),
        destination
    );

    runtime
        .deliver_file(sandbox.id(), destination, mode, &mut file)
        .map_err(|source| InjectError::Runtime {
            destination: destination.to_string(),
            source,
        })
}

#[cfg(unix)]
fn file_mode(file: &File) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(file.metadata()?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(file: &File) -> io::Result<u32> {
    Ok(if file.metadata()?.permissions().readonly() {
        0o444
    } else {
        0o644
    })
}
