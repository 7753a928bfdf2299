mod common;

use common::{write_file, FakeRuntime, FixedLookup};
use sbox_engine::profile::parse_release;
use sbox_engine::{
    host_profile, inject, provision, teardown, EngineSettings, InjectError, ProvisionError, Sandbox,
    SystemProfile,
};
use tempfile::TempDir;

fn ubuntu() -> SystemProfile {
    SystemProfile::Posix(parse_release(
        "linux",
        "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\nID_LIKE=debian\n",
    ))
}

fn command() -> Vec<String> {
    vec!["tool".to_string(), "--version".to_string()]
}

#[test]
fn given_posix_host_when_provisioning_then_flavor_image_is_started_with_binary_installed() {
    let host = TempDir::new().unwrap();
    let binary = write_file(&host.path().join("tool"), b"\x7fELF tool");
    let runtime = FakeRuntime::scripted(vec![]);

    let sandbox = provision(
        &runtime,
        &ubuntu(),
        &command(),
        &EngineSettings::default(),
        &FixedLookup(Some(binary)),
    )
    .unwrap();

    assert!(sandbox.name().starts_with("ubuntu_sandbox_"));
    assert_eq!(sandbox.id(), format!("id-{}", sandbox.name()));
    assert_eq!(sandbox.command(), command().as_slice());

    let calls = runtime.calls();
    assert_eq!(calls[0], "pull ubuntu:latest");
    assert_eq!(calls[1], format!("create ubuntu:latest {}", sandbox.name()));
    assert_eq!(calls[2], format!("start {}", sandbox.id()));
    assert_eq!(calls[3], format!("deliver {} /usr/bin/tool", sandbox.id()));
    assert_eq!(runtime.file("/usr/bin/tool").unwrap().1, b"\x7fELF tool");
}

#[test]
fn given_explicit_image_then_it_overrides_the_flavor() {
    let host = TempDir::new().unwrap();
    let binary = write_file(&host.path().join("tool"), b"");
    let runtime = FakeRuntime::scripted(vec![]);
    let settings = EngineSettings {
        image: Some("debian:bookworm-slim".to_string()),
        sandbox_bin_dir: "/opt/bin/".to_string(),
        ..EngineSettings::default()
    };

    provision(&runtime, &ubuntu(), &command(), &settings, &FixedLookup(Some(binary))).unwrap();

    let calls = runtime.calls();
    assert_eq!(calls[0], "pull debian:bookworm-slim");
    assert!(calls[3].ends_with(" /opt/bin/tool"));
}

#[test]
fn given_permission_denied_pull_then_actionable_error_and_no_container() {
    let host = TempDir::new().unwrap();
    let binary = write_file(&host.path().join("tool"), b"");
    let mut runtime = FakeRuntime::scripted(vec![]);
    runtime.deny_pull = true;

    let err = provision(
        &runtime,
        &ubuntu(),
        &command(),
        &EngineSettings::default(),
        &FixedLookup(Some(binary)),
    )
    .unwrap_err();

    assert!(matches!(err, ProvisionError::PermissionDenied { ref image, .. } if image == "ubuntu:latest"));
    assert_eq!(err.code(), "PROVISION_PERMISSION_DENIED");
    assert!(err.to_string().contains("docker group"));
    assert_eq!(runtime.calls(), vec!["pull ubuntu:latest".to_string()]);
}

#[test]
fn given_windows_host_then_unsupported_before_any_runtime_call() {
    let runtime = FakeRuntime::scripted(vec![]);

    let err = provision(
        &runtime,
        &SystemProfile::Windows,
        &command(),
        &EngineSettings::default(),
        &FixedLookup(None),
    )
    .unwrap_err();

    assert!(matches!(err, ProvisionError::UnsupportedFamily { .. }));
    assert!(runtime.calls().is_empty());
}

#[test]
fn given_release_without_id_then_no_image() {
    let runtime = FakeRuntime::scripted(vec![]);
    let profile = SystemProfile::Posix(parse_release("linux", "NAME=Mystery\n"));

    let err = provision(
        &runtime,
        &profile,
        &command(),
        &EngineSettings::default(),
        &FixedLookup(None),
    )
    .unwrap_err();

    assert!(matches!(err, ProvisionError::NoImage));
}

#[test]
fn given_program_missing_on_host_then_fails_before_pulling() {
    let runtime = FakeRuntime::scripted(vec![]);

    let err = provision(
        &runtime,
        &ubuntu(),
        &command(),
        &EngineSettings::default(),
        &FixedLookup(None),
    )
    .unwrap_err();

    assert!(matches!(err, ProvisionError::ProgramNotFound { ref program } if program == "tool"));
    assert!(runtime.calls().is_empty());
}

#[test]
fn given_release_file_when_reading_host_profile_then_flavor_is_detected() {
    let host = TempDir::new().unwrap();
    let release = write_file(&host.path().join("os-release"), b"ID=debian\nVERSION_ID=12\n");

    let profile = host_profile(Some(release.as_path())).unwrap();
    assert_eq!(profile.flavor(), Some("debian"));
}

#[test]
fn given_unreadable_release_file_then_profile_error_with_its_code() {
    let host = TempDir::new().unwrap();
    let missing = host.path().join("os-release");

    let err = host_profile(Some(missing.as_path())).unwrap_err();
    assert!(matches!(err, ProvisionError::Profile(ref source) if source.path == missing));
    assert_eq!(err.code(), "PROVISION_PROFILE_READ_ERROR");
    assert!(err.to_string().contains("os-release"));
}

#[test]
fn given_empty_command_then_rejected() {
    let runtime = FakeRuntime::scripted(vec![]);
    let err = provision(
        &runtime,
        &ubuntu(),
        &[],
        &EngineSettings::default(),
        &FixedLookup(None),
    )
    .unwrap_err();
    assert!(matches!(err, ProvisionError::EmptyCommand));
}

#[test]
fn given_start_failure_then_container_is_removed() {
    let host = TempDir::new().unwrap();
    let binary = write_file(&host.path().join("tool"), b"");
    let mut runtime = FakeRuntime::scripted(vec![]);
    runtime.fail_start = true;

    let err = provision(
        &runtime,
        &ubuntu(),
        &command(),
        &EngineSettings::default(),
        &FixedLookup(Some(binary)),
    )
    .unwrap_err();

    assert!(matches!(err, ProvisionError::Start { .. }));
    assert!(runtime.calls().last().unwrap().starts_with("remove id-ubuntu_sandbox_"));
}

#[test]
fn given_binary_copy_failure_then_container_is_removed() {
    let host = TempDir::new().unwrap();
    let binary = write_file(&host.path().join("tool"), b"");
    let mut runtime = FakeRuntime::scripted(vec![]);
    runtime.fail_delivery = true;

    let err = provision(
        &runtime,
        &ubuntu(),
        &command(),
        &EngineSettings::default(),
        &FixedLookup(Some(binary)),
    )
    .unwrap_err();

    assert!(matches!(err, ProvisionError::BinaryCopy { .. }));
    assert!(runtime.calls().last().unwrap().starts_with("remove "));
}

#[test]
fn given_sandbox_when_torn_down_then_container_removed() {
    let runtime = FakeRuntime::scripted(vec![]);
    let sandbox = Sandbox::new("c1", "ubuntu_sandbox_x", command());

    teardown(&runtime, sandbox).unwrap();

    assert_eq!(runtime.calls(), vec!["remove c1".to_string()]);
}

#[test]
fn given_same_file_injected_twice_then_content_is_unchanged() {
    let host = TempDir::new().unwrap();
    let lib = write_file(&host.path().join("libdup.so"), b"stable bytes");
    let runtime = FakeRuntime::scripted(vec![]);
    let sandbox = Sandbox::new("c1", "ubuntu_sandbox_x", command());

    inject(&runtime, &sandbox, &lib, "/usr/lib/libdup.so").unwrap();
    let first = runtime.file("/usr/lib/libdup.so").unwrap();
    inject(&runtime, &sandbox, &lib, "/usr/lib/libdup.so").unwrap();
    let second = runtime.file("/usr/lib/libdup.so").unwrap();

    assert_eq!(first, second);
    assert_eq!(second.1, b"stable bytes");
}

#[cfg(unix)]
#[test]
fn given_executable_host_file_then_mode_is_preserved() {
    use std::os::unix::fs::PermissionsExt;

    let host = TempDir::new().unwrap();
    let helper = write_file(&host.path().join("helper"), b"#!/bin/sh\n");
    std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o750)).unwrap();
    let runtime = FakeRuntime::scripted(vec![]);
    let sandbox = Sandbox::new("c1", "ubuntu_sandbox_x", command());

    inject(&runtime, &sandbox, &helper, "/usr/bin/helper").unwrap();

    assert_eq!(runtime.file("/usr/bin/helper").unwrap().0, 0o750);
}

#[test]
fn given_missing_host_file_then_inject_reports_io() {
    let runtime = FakeRuntime::scripted(vec![]);
    let sandbox = Sandbox::new("c1", "ubuntu_sandbox_x", command());

    let err = inject(
        &runtime,
        &sandbox,
        std::path::Path::new("/nonexistent/sbox-test/lib.so"),
        "/usr/lib/lib.so",
    )
    .unwrap_err();

    assert!(matches!(err, InjectError::Io { .. }));
    assert!(runtime.calls().is_empty());
}
