//! The trace → resolve → inject loop that drives a sandbox to a state where its
//! command runs without missing files.

use crate::cancel::CancelToken;
use crate::error::ResolutionError;
use crate::inject::inject;
use crate::resolver::{ExecutableLookup, HostResolver, MissingDependency, PathLookup, ResolveError};
use crate::sandbox::Sandbox;
use crate::settings::{EngineSettings, MissingPolicy, TimeoutPolicy};
use crate::trace::{missing_fragments, trace, TraceResult};
use capsules_container_exec::ContainerRuntime;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Number of consecutive iterations that may fail without finding anything new.
const EMPTY_ITERATION_LIMIT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The traced command exited with status zero.
    Resolved,
    /// The traced command was still running at the poll ceiling and was killed.
    ForcedResolved,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub outcome: Outcome,
    pub iterations: u32,
    pub injected: Vec<MissingDependency>,
    /// Sandbox paths with no host counterpart that were left alone.
    pub skipped: Vec<String>,
    pub unparsable: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResolutionReport {
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

enum Step {
    Done(Outcome),
    Retry { new_dependencies: usize },
}

/// Per-session bookkeeping.
struct Session {
    iterations: u32,
    empty_streak: u32,
    injected: Vec<MissingDependency>,
    skipped: Vec<String>,
    unparsable: usize,
    started_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Self {
            iterations: 0,
            empty_streak: 0,
            injected: Vec::new(),
            skipped: Vec::new(),
            unparsable: 0,
            started_at: Utc::now(),
        }
    }

    fn into_report(self, outcome: Outcome) -> ResolutionReport {
        ResolutionReport {
            outcome,
            iterations: self.iterations,
            injected: self.injected,
            skipped: self.skipped,
            unparsable: self.unparsable,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

pub struct Convergence<'r, R, L = PathLookup> {
    runtime: &'r R,
    resolver: HostResolver<L>,
    settings: EngineSettings,
    cancel: CancelToken,
}

impl<'r, R: ContainerRuntime> Convergence<'r, R, PathLookup> {
    pub fn new(runtime: &'r R, settings: EngineSettings) -> Self {
        Self::with_lookup(runtime, settings, PathLookup)
    }
}

impl<'r, R: ContainerRuntime, L: ExecutableLookup> Convergence<'r, R, L> {
    pub fn with_lookup(runtime: &'r R, settings: EngineSettings, lookup: L) -> Self {
        let resolver = HostResolver::with_lookup(lookup, settings.sandbox_bin_dir.clone());
        Self {
            runtime,
            resolver,
            settings,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run `command` in `sandbox` until it exits cleanly, injecting every missing
    /// host file the tracer reports along the way.
    ///
    /// Only one traced run is in flight at a time; each iteration's output is
    /// fully collected and its injections finished before the next launch.
    #[instrument(skip(self, sandbox, command), fields(sandbox = %sandbox.name()))]
    pub fn resolve_dependencies(
        &self,
        sandbox: &mut Sandbox,
        command: &[String],
    ) -> Result<ResolutionReport, ResolutionError> {
        if command.is_empty() {
            return Err(ResolutionError::EmptyCommand);
        }

        let mut session = Session::new();
        let max_iterations = self.settings.max_iterations.max(1);

        loop {
            if session.iterations >= max_iterations {
                warn!(iterations = session.iterations, "iteration cap reached");
                return Err(ResolutionError::UnresolvedDependencies {
                    sandbox: sandbox.name().to_string(),
                    iterations: session.iterations,
                });
            }
            self.check_cancelled(sandbox)?;

            session.iterations += 1;
            debug!(iteration = session.iterations, "launch");
            let result = trace(self.runtime, sandbox, command, &self.settings, &self.cancel)?;

            match self.inspect(sandbox, command, &result, &mut session)? {
                Step::Done(outcome) => {
                    let report = session.into_report(outcome);
                    info!(
                        outcome = ?report.outcome,
                        iterations = report.iterations,
                        injected = report.injected.len(),
                        elapsed = %humantime::format_duration(truncate_to_millis(report.elapsed())),
                        "dependencies resolved"
                    );
                    return Ok(report);
                }
                Step::Retry { new_dependencies: 0 } => {
                    session.empty_streak += 1;
                    if session.empty_streak >= EMPTY_ITERATION_LIMIT {
                        return Err(ResolutionError::UnresolvedDependencies {
                            sandbox: sandbox.name().to_string(),
                            iterations: session.iterations,
                        });
                    }
                    info!(
                        exit_code = ?result.exit_code,
                        "command failed without reporting missing files; retrying once"
                    );
                }
                Step::Retry { new_dependencies } => {
                    session.empty_streak = 0;
                    info!(new_dependencies, "injected dependencies; relaunching");
                }
            }
        }
    }

    fn inspect(
        &self,
        sandbox: &mut Sandbox,
        command: &[String],
        result: &TraceResult,
        session: &mut Session,
    ) -> Result<Step, ResolutionError> {
        if result.still_running {
            return match self.settings.on_timeout {
                TimeoutPolicy::AssumeResolved => Ok(Step::Done(Outcome::ForcedResolved)),
                TimeoutPolicy::Fail => Err(ResolutionError::TraceTimeout {
                    sandbox: sandbox.name().to_string(),
                    polls: self.settings.poll_ceiling.max(1),
                }),
            };
        }
        if result.succeeded() {
            return Ok(Step::Done(Outcome::Resolved));
        }
        self.check_cancelled(sandbox)?;

        let corpus = result.corpus();
        let mut new_dependencies = 0;
        for fragment in missing_fragments(&corpus) {
            let dependency = match self.resolver.resolve(fragment, command) {
                Ok(dependency) => dependency,
                Err(ResolveError::UnparsableFragment { fragment, reason }) => {
                    warn!(fragment = %fragment, reason, "dropping unparsable trace fragment");
                    session.unparsable += 1;
                    continue;
                }
                Err(ResolveError::ProgramNotFound { program }) => {
                    return Err(ResolutionError::ProgramNotFound {
                        sandbox: sandbox.name().to_string(),
                        program,
                    });
                }
                Err(ResolveError::DependencyNotFound {
                    sandbox_path,
                    host_path,
                }) => match self.settings.missing_on_host {
                    MissingPolicy::Fail => {
                        return Err(ResolutionError::DependencyNotFound {
                            sandbox: sandbox.name().to_string(),
                            sandbox_path,
                            host_path,
                        });
                    }
                    MissingPolicy::Skip => {
                        if !session.skipped.contains(&sandbox_path) {
                            debug!(path = %sandbox_path, "no host counterpart; skipping");
                            session.skipped.push(sandbox_path);
                        }
                        continue;
                    }
                },
            };

            if sandbox.has_injected(&dependency.sandbox_destination) {
                continue;
            }
            inject(
                self.runtime,
                sandbox,
                &dependency.host_source,
                &dependency.sandbox_destination,
            )
            .map_err(|source| ResolutionError::Inject {
                sandbox: sandbox.name().to_string(),
                source,
            })?;
            sandbox.record_injection(&dependency.sandbox_destination);
            info!(
                host = %dependency.host_source.display(),
                destination = %dependency.sandbox_destination,
                "injected dependency"
            );
            session.injected.push(dependency);
            new_dependencies += 1;
        }

        Ok(Step::Retry { new_dependencies })
    }

    fn check_cancelled(&self, sandbox: &Sandbox) -> Result<(), ResolutionError> {
        if self.cancel.is_cancelled() {
            return Err(ResolutionError::Cancelled {
                sandbox: sandbox.name().to_string(),
            });
        }
        Ok(())
    }
}

fn truncate_to_millis(duration: Duration) -> Duration {
    Duration::new(duration.as_secs(), duration.subsec_millis() * 1_000_000)
}
