//! [`ContainerRuntime`] backed by the `docker` CLI (or a compatible binary such as `podman`).

use crate::{ContainerRuntime, ExecStatus, RuntimeError, Transport, RUNTIME_ENV};
use std::env;
use std::io::{self, Read};
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

/// A running `docker exec` client process.
#[derive(Debug)]
pub struct DockerExec {
    child: Child,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Use `$SBOX_CONTAINER_RUNTIME` when set and non-empty, `docker` otherwise.
    pub fn from_env() -> Self {
        match env::var(RUNTIME_ENV) {
            Ok(val) if !val.trim().is_empty() => Self::new(val.trim()),
            _ => Self::new("docker"),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn base(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.stdin(Stdio::null());
        command
    }

    pub(crate) fn pull_command(&self, image: &str) -> Command {
        let mut command = self.base();
        command.arg("pull").arg(image);
        command
    }

    pub(crate) fn create_command(&self, image: &str, name: &str) -> Command {
        let mut command = self.base();
        command
            .arg("create")
            .arg("--tty")
            .arg("--name")
            .arg(name)
            .arg(image);
        command
    }

    pub(crate) fn start_command(&self, container_id: &str) -> Command {
        let mut command = self.base();
        command.arg("start").arg(container_id);
        command
    }

    pub(crate) fn exec_command(&self, container_id: &str, argv: &[String]) -> Command {
        let mut command = self.base();
        command.arg("exec").arg(container_id);
        for part in argv {
            command.arg(part);
        }
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
    }

    pub(crate) fn kill_command(&self, container_id: &str, signal: &str) -> Command {
        let mut command = self.base();
        command
            .arg("kill")
            .arg("--signal")
            .arg(signal)
            .arg(container_id);
        command
    }

    /// `$1` is the destination and `$2` the octal mode, so neither needs quoting.
    pub(crate) fn deliver_command(&self, container_id: &str, destination: &str, mode: u32) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("exec")
            .arg("-i")
            .arg(container_id)
            .arg("sh")
            .arg("-c")
            .arg("cat > \"$1\" && chmod \"$2\" \"$1\"")
            .arg("sbox-deliver")
            .arg(destination)
            .arg(format!("{:o}", mode & 0o7777));
        command.stdin(Stdio::piped());
        command.stdout(Stdio::null());
        command.stderr(Stdio::piped());
        command
    }

    pub(crate) fn remove_command(&self, container_id: &str) -> Command {
        let mut command = self.base();
        command.arg("rm").arg("--force").arg(container_id);
        command
    }

    fn run(&self, operation: &'static str, mut command: Command) -> Result<Output, RuntimeError> {
        debug!(runtime = %self.binary, operation, "running container runtime command");
        let output = command.output().map_err(|err| RuntimeError::Spawn {
            runtime: self.binary.clone(),
            source: err,
        })?;
        check_status(operation, output)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::from_env()
    }
}

fn check_status(operation: &'static str, output: Output) -> Result<Output, RuntimeError> {
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(classify_failure(operation, output.status.to_string(), stderr))
}

pub(crate) fn classify_failure(operation: &'static str, status: String, stderr: String) -> RuntimeError {
    if stderr.to_ascii_lowercase().contains("permission denied") {
        RuntimeError::PermissionDenied {
            operation,
            message: stderr,
        }
    } else {
        RuntimeError::CommandFailed {
            operation,
            status,
            stderr,
        }
    }
}

impl ContainerRuntime for DockerCli {
    type Exec = DockerExec;

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let output = self.run("pull", self.pull_command(image))?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(image, "{}", line);
        }
        Ok(())
    }

    fn create(&self, image: &str, name: &str) -> Result<String, RuntimeError> {
        let output = self.run("create", self.create_command(image, name))?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::CommandFailed {
                operation: "create",
                status: output.status.to_string(),
                stderr: "runtime did not print a container id".to_string(),
            });
        }
        Ok(id)
    }

    fn start(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.run("start", self.start_command(container_id))?;
        Ok(())
    }

    fn exec(&self, container_id: &str, argv: &[String]) -> Result<DockerExec, RuntimeError> {
        let child = self
            .exec_command(container_id, argv)
            .spawn()
            .map_err(|err| RuntimeError::Spawn {
                runtime: self.binary.clone(),
                source: err,
            })?;
        Ok(DockerExec { child })
    }

    fn attach(&self, exec: &mut DockerExec) -> Result<Transport, RuntimeError> {
        // The CLI already demultiplexes the engine stream onto its own stdout/stderr.
        match (exec.child.stdout.take(), exec.child.stderr.take()) {
            (Some(stdout), Some(stderr)) => Ok(Transport::Split {
                stdout: Box::new(stdout),
                stderr: Box::new(stderr),
            }),
            _ => Err(RuntimeError::AlreadyAttached),
        }
    }

    fn poll(&self, exec: &mut DockerExec) -> Result<ExecStatus, RuntimeError> {
        let status = exec.child.try_wait().map_err(|err| RuntimeError::Io {
            operation: "exec status",
            source: err,
        })?;
        Ok(match status {
            None => ExecStatus::running(),
            Some(status) => ExecStatus {
                running: false,
                // Killed by a signal: no code, report the conventional 128 + n where possible.
                exit_code: status.code().or_else(|| signal_exit_code(&status)),
            },
        })
    }

    fn terminate(&self, container_id: &str, signal: &str) -> Result<(), RuntimeError> {
        self.run("kill", self.kill_command(container_id, signal))?;
        Ok(())
    }

    fn deliver_file(
        &self,
        container_id: &str,
        destination: &str,
        mode: u32,
        content: &mut dyn Read,
    ) -> Result<(), RuntimeError> {
        let mut child = self
            .deliver_command(container_id, destination, mode)
            .spawn()
            .map_err(|err| RuntimeError::Spawn {
                runtime: self.binary.clone(),
                source: err,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = io::copy(content, &mut stdin) {
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                return Err(RuntimeError::Io {
                    operation: "deliver",
                    source: err,
                });
            }
        }

        let output = child.wait_with_output().map_err(|err| RuntimeError::Io {
            operation: "deliver",
            source: err,
        })?;
        check_status("deliver", output)?;
        Ok(())
    }

    fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.run("rm", self.remove_command(container_id))?;
        Ok(())
    }
}

#[cfg(unix)]
fn signal_exit_code(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| 128 + sig)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

impl Drop for DockerExec {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(err) = self.child.kill() {
                warn!("failed to kill exec client: {}", err);
                return;
            }
            match self.child.wait_timeout(REAP_TIMEOUT) {
                Ok(Some(_)) => {}
                Ok(None) => warn!("exec client did not exit within {:?}", REAP_TIMEOUT),
                Err(err) => warn!("failed to reap exec client: {}", err),
            }
        }
    }
}
