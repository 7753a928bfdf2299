#![allow(dead_code)]

use capsules_container_exec::{ContainerRuntime, ExecStatus, RuntimeError, Transport};
use sbox_engine::{CancelToken, EngineSettings, ExecutableLookup};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted traced run.
#[derive(Debug, Clone)]
pub struct Run {
    pub stderr: String,
    /// `None` keeps the process running forever.
    pub exit: Option<i32>,
}

impl Run {
    pub fn exits(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit: Some(code),
        }
    }

    pub fn hangs() -> Self {
        Self {
            stderr: String::new(),
            exit: None,
        }
    }
}

enum Behaviour {
    /// Runs are replayed in order; the last one repeats.
    Scripted(Vec<Run>),
    /// Every run reports the listed paths missing until they have been delivered.
    Needs(Vec<String>),
}

/// In-memory container runtime that records every call.
pub struct FakeRuntime {
    behaviour: Behaviour,
    launches: AtomicUsize,
    active: Arc<AtomicBool>,
    overlapping_launches: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
    pub files: Mutex<BTreeMap<String, (u32, Vec<u8>)>>,
    pub deny_pull: bool,
    pub fail_start: bool,
    pub fail_delivery: bool,
    pub fail_exec: bool,
    pub fail_attach: bool,
    pub fail_poll: bool,
    /// Cut the output stream off in the middle of a frame.
    pub truncate_output: bool,
    /// Cancelled from inside the first status poll.
    pub cancel_on_poll: Option<CancelToken>,
}

pub struct FakeExec {
    run: Run,
    attached: bool,
    active: Arc<AtomicBool>,
}

impl Drop for FakeExec {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl FakeRuntime {
    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            launches: AtomicUsize::new(0),
            active: Arc::new(AtomicBool::new(false)),
            overlapping_launches: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            files: Mutex::new(BTreeMap::new()),
            deny_pull: false,
            fail_start: false,
            fail_delivery: false,
            fail_exec: false,
            fail_attach: false,
            fail_poll: false,
            truncate_output: false,
            cancel_on_poll: None,
        }
    }

    pub fn scripted(runs: Vec<Run>) -> Self {
        Self::with_behaviour(Behaviour::Scripted(runs))
    }

    pub fn needing(paths: &[&str]) -> Self {
        Self::with_behaviour(Behaviour::Needs(paths.iter().map(|p| p.to_string()).collect()))
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn overlapping_launches(&self) -> usize {
        self.overlapping_launches.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn file(&self, path: &str) -> Option<(u32, Vec<u8>)> {
        self.files.lock().unwrap().get(path).cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_run(&self, launch: usize) -> Run {
        match &self.behaviour {
            Behaviour::Scripted(runs) => runs
                .get(launch)
                .or_else(|| runs.last())
                .cloned()
                .unwrap_or_else(|| Run::exits(0, "")),
            Behaviour::Needs(paths) => {
                let files = self.files.lock().unwrap();
                let missing: Vec<&String> = paths.iter().filter(|p| !files.contains_key(*p)).collect();
                if missing.is_empty() {
                    return Run::exits(0, "");
                }
                let stderr = missing
                    .iter()
                    .map(|p| {
                        format!(
                            "openat(AT_FDCWD, \"{}\", O_RDONLY|O_CLOEXEC) = -1 ENOENT (No such file or directory)\n",
                            p
                        )
                    })
                    .collect::<String>();
                Run::exits(127, stderr)
            }
        }
    }
}

fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![kind, 0, 0, 0];
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn failed(operation: &'static str) -> RuntimeError {
    RuntimeError::CommandFailed {
        operation,
        status: "exit status: 1".to_string(),
        stderr: format!("scripted {} failure", operation),
    }
}

impl ContainerRuntime for FakeRuntime {
    type Exec = FakeExec;

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(format!("pull {}", image));
        if self.deny_pull {
            return Err(RuntimeError::PermissionDenied {
                operation: "pull",
                message: "Got permission denied while trying to connect to the Docker daemon socket"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn create(&self, image: &str, name: &str) -> Result<String, RuntimeError> {
        self.record(format!("create {} {}", image, name));
        Ok(format!("id-{}", name))
    }

    fn start(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start {}", container_id));
        if self.fail_start {
            return Err(failed("start"));
        }
        Ok(())
    }

    fn exec(&self, container_id: &str, argv: &[String]) -> Result<FakeExec, RuntimeError> {
        if self.fail_exec {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.record(format!("exec {} {}", container_id, argv.join(" ")));
            return Err(failed("exec"));
        }
        if self.active.swap(true, Ordering::SeqCst) {
            self.overlapping_launches.fetch_add(1, Ordering::SeqCst);
        }
        let launch = self.launches.fetch_add(1, Ordering::SeqCst);
        self.record(format!("exec {} {}", container_id, argv.join(" ")));
        Ok(FakeExec {
            run: self.next_run(launch),
            attached: false,
            active: Arc::clone(&self.active),
        })
    }

    fn attach(&self, exec: &mut FakeExec) -> Result<Transport, RuntimeError> {
        if exec.attached {
            return Err(RuntimeError::AlreadyAttached);
        }
        exec.attached = true;
        if self.fail_attach {
            return Err(failed("attach"));
        }
        let mut bytes = frame(1, b"starting\n");
        if !exec.run.stderr.is_empty() {
            bytes.extend(frame(2, exec.run.stderr.as_bytes()));
        }
        if self.truncate_output {
            bytes.extend(&frame(2, b"openat(AT_FDCWD, \"/lib/libcut.so\"")[..12]);
        }
        Ok(Transport::Multiplexed(Box::new(Cursor::new(bytes))))
    }

    fn poll(&self, exec: &mut FakeExec) -> Result<ExecStatus, RuntimeError> {
        if self.fail_poll {
            return Err(failed("poll"));
        }
        if let Some(token) = &self.cancel_on_poll {
            token.cancel();
            return Ok(ExecStatus::running());
        }
        Ok(match exec.run.exit {
            Some(code) => ExecStatus::exited(code),
            None => ExecStatus::running(),
        })
    }

    fn terminate(&self, container_id: &str, signal: &str) -> Result<(), RuntimeError> {
        self.record(format!("terminate {} {}", container_id, signal));
        Ok(())
    }

    fn deliver_file(
        &self,
        container_id: &str,
        destination: &str,
        mode: u32,
        content: &mut dyn Read,
    ) -> Result<(), RuntimeError> {
        self.record(format!("deliver {} {}", container_id, destination));
        if self.fail_delivery {
            return Err(failed("deliver"));
        }
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).map_err(|source| RuntimeError::Io {
            operation: "deliver",
            source,
        })?;
        self.files
            .lock()
            .unwrap()
            .insert(destination.to_string(), (mode, buf));
        Ok(())
    }

    fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove {}", container_id));
        Ok(())
    }
}

/// Host executable search pinned to one path.
pub struct FixedLookup(pub Option<PathBuf>);

impl ExecutableLookup for FixedLookup {
    fn find(&self, _program: &str) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Settings that do not sleep between polls.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        poll_interval_ms: 0,
        poll_ceiling: 3,
        ..EngineSettings::default()
    }
}

pub fn write_file(path: &Path, content: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    path.to_path_buf()
}

pub fn enoent(path: &str) -> String {
    format!(
        "openat(AT_FDCWD, \"{}\", O_RDONLY|O_CLOEXEC) = -1 ENOENT (No such file or directory)\n",
        path
    )
}
