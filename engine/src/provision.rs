use crate::error::ProvisionError;
use crate::inject::inject;
use crate::profile::{self, SystemProfile};
use crate::resolver::ExecutableLookup;
use crate::sandbox::{generate_name, program_file_name, Sandbox};
use crate::settings::EngineSettings;
use capsules_container_exec::{ContainerRuntime, RuntimeError};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Detect the host profile, from `release_file` when given.
pub fn host_profile(release_file: Option<&Path>) -> Result<SystemProfile, ProvisionError> {
    let profile = match release_file {
        Some(path) => profile::read_from(path)?,
        None => profile::read()?,
    };
    Ok(profile)
}

/// Create and start a sandbox matching the host distribution, with the target
/// program already installed in the sandbox binary directory.
///
/// The program is located on the host before anything is pulled, and a
/// container that cannot be completed is removed again.
#[instrument(skip_all, fields(program = command.first().map(String::as_str).unwrap_or_default()))]
pub fn provision<R: ContainerRuntime, L: ExecutableLookup>(
    runtime: &R,
    profile: &SystemProfile,
    command: &[String],
    settings: &EngineSettings,
    lookup: &L,
) -> Result<Sandbox, ProvisionError> {
    let program = command.first().ok_or(ProvisionError::EmptyCommand)?;

    let image = match (&settings.image, profile) {
        (Some(image), _) => image.clone(),
        (None, SystemProfile::Windows) => {
            return Err(ProvisionError::UnsupportedFamily {
                family: "windows".to_string(),
            })
        }
        (None, SystemProfile::Posix(_)) => profile.image_reference().ok_or(ProvisionError::NoImage)?,
    };

    let binary = lookup
        .find(program)
        .ok_or_else(|| ProvisionError::ProgramNotFound {
            program: program.clone(),
        })?;
    let installed_name = program_file_name(program).unwrap_or(program.as_str());

    info!(image = %image, "pulling sandbox image");
    runtime.pull_image(&image).map_err(|source| match source {
        RuntimeError::PermissionDenied { message, .. } => ProvisionError::PermissionDenied {
            image: image.clone(),
            message,
        },
        source => ProvisionError::ImagePull {
            image: image.clone(),
            source,
        },
    })?;

    let name = generate_name(profile.flavor().unwrap_or("sbox"));
    let id = runtime
        .create(&image, &name)
        .map_err(|source| ProvisionError::Create {
            image: image.clone(),
            name: name.clone(),
            source,
        })?;
    let sandbox = Sandbox::new(id, name, command.to_vec());

    if let Err(source) = runtime.start(sandbox.id()) {
        discard(runtime, &sandbox);
        return Err(ProvisionError::Start {
            name: sandbox.name().to_string(),
            source,
        });
    }

    let destination = format!(
        "{}/{}",
        settings.sandbox_bin_dir.trim_end_matches('/'),
        installed_name
    );
    if let Err(source) = inject(runtime, &sandbox, &binary, &destination) {
        discard(runtime, &sandbox);
        return Err(ProvisionError::BinaryCopy {
            program: program.clone(),
            name: sandbox.name().to_string(),
            source,
        });
    }

    info!(
        sandbox = %sandbox.name(),
        id = %sandbox.id(),
        binary = %binary.display(),
        destination = %destination,
        "sandbox ready"
    );
    Ok(sandbox)
}

/// Remove the sandbox container. The sandbox cannot be used afterwards.
pub fn teardown<R: ContainerRuntime>(runtime: &R, sandbox: Sandbox) -> Result<(), RuntimeError> {
    info!(sandbox = %sandbox.name(), "removing sandbox");
    runtime.remove(sandbox.id())
}

fn discard<R: ContainerRuntime>(runtime: &R, sandbox: &Sandbox) {
    if let Err(err) = runtime.remove(sandbox.id()) {
        warn!(sandbox = %sandbox.name(), error = %err, "failed to remove incomplete sandbox");
    }
}
