//! Runs the target command under a syscall tracer inside the sandbox and turns
//! the captured output into candidate trace fragments.

use crate::cancel::CancelToken;
use crate::error::ResolutionError;
use crate::sandbox::{program_file_name, Sandbox};
use crate::settings::EngineSettings;
use capsules_container_exec::{demux, ContainerRuntime, ExecStatus, Transport};
use std::collections::HashMap;
use std::io::{self, Read};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Marker the tracer prints for a failed lookup of a file that does not exist.
pub const MISSING_MARKER: &str = "ENOENT";

/// Everything one traced run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceResult {
    /// `None` when the process had to be force-terminated or the runtime did not
    /// report a code.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set when the process was still running at the poll ceiling.
    pub still_running: bool,
}

impl TraceResult {
    pub fn succeeded(&self) -> bool {
        !self.still_running && self.exit_code == Some(0)
    }

    /// Both streams as a single line-oriented corpus.
    pub fn corpus(&self) -> String {
        let mut corpus = String::from_utf8_lossy(&self.stdout).into_owned();
        if !corpus.is_empty() && !corpus.ends_with('\n') {
            corpus.push('\n');
        }
        corpus.push_str(&String::from_utf8_lossy(&self.stderr));
        corpus
    }
}

/// Candidate fragments from every `ENOENT` line of `corpus`, in order.
///
/// The fragment is the second `", "`-separated field, which for `open*`/`access`
/// style output is the quoted path argument. Lines without the marker, or without
/// a second field, are skipped.
///
/// With `-f` a call can be split into an `<unfinished ...>` line and a later
/// `<... resumed>` line for the same pid. The marker is on the resumed half and the
/// path on the unfinished half, so the two are paired up per pid.
pub fn missing_fragments(corpus: &str) -> impl Iterator<Item = &str> + '_ {
    let mut unfinished: HashMap<&str, &str> = HashMap::new();
    corpus
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(move |line| {
            let (pid, call) = split_pid(line);
            if let Some(head) = call.strip_suffix(UNFINISHED_SUFFIX) {
                unfinished.insert(pid, head);
                return None;
            }
            if call.starts_with(RESUMED_PREFIX) {
                let head = unfinished.remove(pid)?;
                return if call.contains(MISSING_MARKER) {
                    second_field(head)
                } else {
                    None
                };
            }
            if line.contains(MISSING_MARKER) {
                second_field(line)
            } else {
                None
            }
        })
}

const UNFINISHED_SUFFIX: &str = " <unfinished ...>";
const RESUMED_PREFIX: &str = "<... ";

/// `[pid 42] rest` → `("42", "rest")`; lines without a pid prefix share the key `""`.
fn split_pid(line: &str) -> (&str, &str) {
    line.strip_prefix("[pid ")
        .and_then(|rest| rest.split_once("] "))
        .map(|(pid, call)| (pid.trim(), call))
        .unwrap_or(("", line))
}

fn second_field(line: &str) -> Option<&str> {
    line.split(", ").nth(1)
}

/// `<tracer> -f -e trace=<syscalls> <bin_dir>/<program> <args...>`
pub fn traced_command(settings: &EngineSettings, command: &[String]) -> Vec<String> {
    let mut argv = vec![
        settings.tracer.clone(),
        "-f".to_string(),
        "-e".to_string(),
        format!("trace={}", settings.syscalls.join(",")),
    ];
    if let Some((program, args)) = command.split_first() {
        let installed = program_file_name(program).unwrap_or(program.as_str());
        argv.push(format!(
            "{}/{}",
            settings.sandbox_bin_dir.trim_end_matches('/'),
            installed
        ));
        argv.extend(args.iter().cloned());
    }
    argv
}

struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    error: Option<io::Error>,
}

enum Capture {
    Multiplexed(JoinHandle<Captured>),
    Split {
        stdout: JoinHandle<(Vec<u8>, Option<io::Error>)>,
        stderr: JoinHandle<(Vec<u8>, Option<io::Error>)>,
    },
}

impl Capture {
    fn start(transport: Transport) -> Self {
        match transport {
            Transport::Multiplexed(mut reader) => Capture::Multiplexed(thread::spawn(move || {
                let mut stdout = Vec::new();
                let mut stderr = Vec::new();
                let error = demux(&mut reader, &mut stdout, &mut stderr).err();
                Captured {
                    stdout,
                    stderr,
                    error,
                }
            })),
            Transport::Split { stdout, stderr } => Capture::Split {
                stdout: thread::spawn(move || drain(stdout)),
                stderr: thread::spawn(move || drain(stderr)),
            },
        }
    }

    fn finish(self) -> Captured {
        match self {
            Capture::Multiplexed(handle) => handle.join().unwrap_or_else(|_| Captured {
                stdout: Vec::new(),
                stderr: Vec::new(),
                error: Some(panicked()),
            }),
            Capture::Split { stdout, stderr } => {
                let (stdout, out_err) = stdout.join().unwrap_or_else(|_| (Vec::new(), Some(panicked())));
                let (stderr, err_err) = stderr.join().unwrap_or_else(|_| (Vec::new(), Some(panicked())));
                Captured {
                    stdout,
                    stderr,
                    error: out_err.or(err_err),
                }
            }
        }
    }
}

fn drain(mut reader: Box<dyn Read + Send>) -> (Vec<u8>, Option<io::Error>) {
    let mut buf = Vec::new();
    let error = reader.read_to_end(&mut buf).err();
    (buf, error)
}

fn panicked() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "output capture thread panicked")
}

/// Launch one traced run of `command` and wait for it to finish.
///
/// The exec handle is dropped and the capture threads joined before this returns,
/// on every path, so a caller can launch again straight away.
pub fn trace<R: ContainerRuntime>(
    runtime: &R,
    sandbox: &Sandbox,
    command: &[String],
    settings: &EngineSettings,
    cancel: &CancelToken,
) -> Result<TraceResult, ResolutionError> {
    let argv = traced_command(settings, command);
    debug!(sandbox = %sandbox.name(), argv = ?argv, "launching traced command");

    let mut exec = runtime
        .exec(sandbox.id(), &argv)
        .map_err(|source| ResolutionError::Launch {
            sandbox: sandbox.name().to_string(),
            source,
        })?;
    let transport = runtime
        .attach(&mut exec)
        .map_err(|source| ResolutionError::Attach {
            sandbox: sandbox.name().to_string(),
            source,
        })?;
    let capture = Capture::start(transport);

    let ceiling = settings.poll_ceiling.max(1);
    let mut polls = 0;
    let status: Option<ExecStatus> = loop {
        if cancel.is_cancelled() {
            stop(runtime, sandbox);
            drop(exec);
            capture.finish();
            return Err(ResolutionError::Cancelled {
                sandbox: sandbox.name().to_string(),
            });
        }
        let status = match runtime.poll(&mut exec) {
            Ok(status) => status,
            Err(source) => {
                drop(exec);
                capture.finish();
                return Err(ResolutionError::Runtime {
                    sandbox: sandbox.name().to_string(),
                    source,
                });
            }
        };
        polls += 1;
        if !status.running {
            break Some(status);
        }
        if polls >= ceiling {
            break None;
        }
        thread::sleep(settings.poll_interval());
    };

    let still_running = status.is_none();
    if still_running {
        warn!(
            sandbox = %sandbox.name(),
            polls,
            "traced command still running at poll ceiling; terminating"
        );
        stop(runtime, sandbox);
    }
    drop(exec);

    let captured = capture.finish();
    if let Some(error) = captured.error {
        if !still_running {
            return Err(ResolutionError::Io {
                sandbox: sandbox.name().to_string(),
                source: error,
            });
        }
        debug!(sandbox = %sandbox.name(), error = %error, "output truncated by termination");
    }

    let exit_code = status.and_then(|status| status.exit_code);
    debug!(
        sandbox = %sandbox.name(),
        ?exit_code,
        stdout_bytes = captured.stdout.len(),
        stderr_bytes = captured.stderr.len(),
        "trace finished"
    );
    Ok(TraceResult {
        exit_code,
        stdout: captured.stdout,
        stderr: captured.stderr,
        still_running,
    })
}

fn stop<R: ContainerRuntime>(runtime: &R, sandbox: &Sandbox) {
    if let Err(err) = runtime.terminate(sandbox.id(), "SIGKILL") {
        warn!(sandbox = %sandbox.name(), error = %err, "failed to terminate traced command");
    }
}
