//! Isolated-execution provider boundary.
//!
//! The dependency engine never talks to a container runtime directly. It goes
//! through [`ContainerRuntime`], which is small enough to be backed by the
//! `docker` CLI ([`DockerCli`]) in production and by scripted doubles in tests.

use std::io::{self, Read};
use thiserror::Error;

pub mod docker;
pub mod stream;

pub use docker::{DockerCli, DockerExec};
pub use stream::{demux, StreamKind};

/// Environment variable naming the runtime binary used by [`DockerCli::from_env`].
pub const RUNTIME_ENV: &str = "SBOX_CONTAINER_RUNTIME";

/// Status of an exec'd process as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: Option<i32>,
}

impl ExecStatus {
    pub fn running() -> Self {
        Self {
            running: true,
            exit_code: None,
        }
    }

    pub fn exited(code: i32) -> Self {
        Self {
            running: false,
            exit_code: Some(code),
        }
    }
}

/// Output transport handed back by [`ContainerRuntime::attach`].
pub enum Transport {
    /// A single stream carrying stdout and stderr frames (Docker raw-stream framing).
    Multiplexed(Box<dyn Read + Send>),
    /// Streams the runtime already separated for us.
    Split {
        stdout: Box<dyn Read + Send>,
        stderr: Box<dyn Read + Send>,
    },
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Multiplexed(_) => f.write_str("Transport::Multiplexed"),
            Transport::Split { .. } => f.write_str("Transport::Split"),
        }
    }
}

/// Operations the engine needs from an isolated-execution provider.
///
/// All calls block. Implementations must tolerate `terminate` and `remove`
/// being called on a container whose processes already exited.
pub trait ContainerRuntime {
    /// Handle for one exec'd process.
    type Exec;

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container from `image` and return the runtime-assigned identity.
    fn create(&self, image: &str, name: &str) -> Result<String, RuntimeError>;

    fn start(&self, container_id: &str) -> Result<(), RuntimeError>;

    fn exec(&self, container_id: &str, argv: &[String]) -> Result<Self::Exec, RuntimeError>;

    /// Bind to the output of an exec. Can only succeed once per exec.
    fn attach(&self, exec: &mut Self::Exec) -> Result<Transport, RuntimeError>;

    fn poll(&self, exec: &mut Self::Exec) -> Result<ExecStatus, RuntimeError>;

    fn terminate(&self, container_id: &str, signal: &str) -> Result<(), RuntimeError>;

    /// Write `content` to `destination` inside the container, replacing any
    /// existing file. Parent directories are not created.
    fn deliver_file(
        &self,
        container_id: &str,
        destination: &str,
        mode: u32,
        content: &mut dyn Read,
    ) -> Result<(), RuntimeError>;

    fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to spawn container runtime {runtime}: {source}")]
    Spawn {
        runtime: String,
        source: io::Error,
    },
    #[error("Permission denied while running `{operation}`: {message}")]
    PermissionDenied {
        operation: &'static str,
        message: String,
    },
    #[error("`{operation}` failed with {status}: {stderr}")]
    CommandFailed {
        operation: &'static str,
        status: String,
        stderr: String,
    },
    #[error("Exec output already attached")]
    AlreadyAttached,
    #[error("I/O error during `{operation}`: {source}")]
    Io {
        operation: &'static str,
        source: io::Error,
    },
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::Spawn { .. } => "RUNTIME_SPAWN_ERROR",
            RuntimeError::PermissionDenied { .. } => "RUNTIME_PERMISSION_DENIED",
            RuntimeError::CommandFailed { .. } => "RUNTIME_COMMAND_FAILED",
            RuntimeError::AlreadyAttached => "RUNTIME_ALREADY_ATTACHED",
            RuntimeError::Io { .. } => "RUNTIME_IO_ERROR",
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RuntimeError::PermissionDenied { .. })
    }
}
