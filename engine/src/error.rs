use crate::inject::InjectError;
use crate::profile::ProfileReadError;
use capsules_container_exec::RuntimeError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a resolution session failed. Every variant names the sandbox involved.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("command to resolve is empty")]
    EmptyCommand,
    #[error("failed to launch traced command in sandbox {sandbox}: {source}")]
    Launch {
        sandbox: String,
        source: RuntimeError,
    },
    #[error("failed to attach to traced command in sandbox {sandbox}: {source}")]
    Attach {
        sandbox: String,
        source: RuntimeError,
    },
    #[error("failed to collect trace output from sandbox {sandbox}: {source}")]
    Io { sandbox: String, source: io::Error },
    #[error("container runtime failed for sandbox {sandbox}: {source}")]
    Runtime {
        sandbox: String,
        source: RuntimeError,
    },
    #[error("dependency not found on host: {sandbox_path} (sandbox {sandbox})")]
    DependencyNotFound {
        sandbox: String,
        sandbox_path: String,
        host_path: PathBuf,
    },
    #[error("program {program} not found on host (sandbox {sandbox})")]
    ProgramNotFound { sandbox: String, program: String },
    #[error("failed to inject dependency into sandbox {sandbox}: {source}")]
    Inject {
        sandbox: String,
        source: InjectError,
    },
    #[error("traced command in sandbox {sandbox} was still running after {polls} status polls")]
    TraceTimeout { sandbox: String, polls: u32 },
    #[error("resolution of sandbox {sandbox} was cancelled")]
    Cancelled { sandbox: String },
    #[error("dependencies of sandbox {sandbox} still unresolved after {iterations} iterations")]
    UnresolvedDependencies { sandbox: String, iterations: u32 },
}

impl ResolutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ResolutionError::EmptyCommand => "RESOLUTION_EMPTY_COMMAND",
            ResolutionError::Launch { .. } => "RESOLUTION_LAUNCH_ERROR",
            ResolutionError::Attach { .. } => "RESOLUTION_ATTACH_ERROR",
            ResolutionError::Io { .. } => "RESOLUTION_IO_ERROR",
            ResolutionError::Runtime { .. } => "RESOLUTION_RUNTIME_ERROR",
            ResolutionError::DependencyNotFound { .. } => "RESOLUTION_DEPENDENCY_NOT_FOUND",
            ResolutionError::ProgramNotFound { .. } => "RESOLUTION_PROGRAM_NOT_FOUND",
            ResolutionError::Inject { .. } => "RESOLUTION_INJECT_ERROR",
            ResolutionError::TraceTimeout { .. } => "RESOLUTION_TRACE_TIMEOUT",
            ResolutionError::Cancelled { .. } => "RESOLUTION_CANCELLED",
            ResolutionError::UnresolvedDependencies { .. } => "RESOLUTION_UNRESOLVED",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Profile(#[from] ProfileReadError),
    #[error("command to sandbox is empty")]
    EmptyCommand,
    #[error("sandbox provisioning is not supported on {family} hosts")]
    UnsupportedFamily { family: String },
    #[error("host release descriptor names no distribution flavor; set an image explicitly")]
    NoImage,
    #[error("permission denied while pulling {image} (try running as root or joining the docker group): {message}")]
    PermissionDenied { image: String, message: String },
    #[error("failed to pull image {image}: {source}")]
    ImagePull { image: String, source: RuntimeError },
    #[error("failed to create container {name} from {image}: {source}")]
    Create {
        image: String,
        name: String,
        source: RuntimeError,
    },
    #[error("failed to start container {name}: {source}")]
    Start { name: String, source: RuntimeError },
    #[error("program {program} not found on host")]
    ProgramNotFound { program: String },
    #[error("failed to copy {program} into container {name}: {source}")]
    BinaryCopy {
        program: String,
        name: String,
        source: InjectError,
    },
}

impl ProvisionError {
    pub fn code(&self) -> &'static str {
        match self {
            ProvisionError::Profile(_) => "PROVISION_PROFILE_READ_ERROR",
            ProvisionError::EmptyCommand => "PROVISION_EMPTY_COMMAND",
            ProvisionError::UnsupportedFamily { .. } => "PROVISION_UNSUPPORTED_FAMILY",
            ProvisionError::NoImage => "PROVISION_NO_IMAGE",
            ProvisionError::PermissionDenied { .. } => "PROVISION_PERMISSION_DENIED",
            ProvisionError::ImagePull { .. } => "PROVISION_IMAGE_PULL_ERROR",
            ProvisionError::Create { .. } => "PROVISION_CREATE_ERROR",
            ProvisionError::Start { .. } => "PROVISION_START_ERROR",
            ProvisionError::ProgramNotFound { .. } => "PROVISION_PROGRAM_NOT_FOUND",
            ProvisionError::BinaryCopy { .. } => "PROVISION_BINARY_COPY_ERROR",
        }
    }
}
