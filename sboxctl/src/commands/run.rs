use anyhow::{Context, Result};
use capsules_container_exec::DockerCli;
use clap::Args;
use config_loader::ConfigManager;
use sbox_engine::{
    provision, teardown, CancelToken, Convergence, EngineSettings, MissingPolicy, PathLookup,
    ResolutionReport, Sandbox, TimeoutPolicy,
};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use super::read_profile;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Base image (default: `<host flavor>:latest`)
    #[arg(long, env = "SBOX_IMAGE")]
    pub image: Option<String>,

    /// Give up after this many trace iterations
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub max_iterations: Option<u32>,

    /// Time between status polls of a traced run, e.g. "500ms" (at most 1h)
    #[arg(long, value_name = "DURATION", value_parser = parse_poll_interval)]
    pub poll_interval: Option<u64>,

    /// Status polls before a still-running trace is killed
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_POLL_CEILING))]
    pub poll_ceiling: Option<u32>,

    /// What a trace still running at the poll ceiling means: assume-resolved | fail
    #[arg(long)]
    pub on_timeout: Option<TimeoutPolicy>,

    /// What to do with traced paths missing on the host: fail | skip
    #[arg(long)]
    pub missing_on_host: Option<MissingPolicy>,

    /// Remove the sandbox after a successful resolution
    #[arg(long)]
    pub rm: bool,

    /// Keep the sandbox when resolution fails
    #[arg(long)]
    pub keep_on_failure: bool,

    /// Output machine-readable JSON
    #[arg(long)]
    pub json: bool,

    /// Program to sandbox, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

/// Bounds shared with `engine-config.v1.json`.
const MAX_POLL_INTERVAL_MS: u64 = 3_600_000;
const MAX_POLL_CEILING: i64 = 86_400;

fn parse_poll_interval(raw: &str) -> Result<u64, String> {
    let interval = humantime::parse_duration(raw).map_err(|err| err.to_string())?;
    match u64::try_from(interval.as_millis()) {
        Ok(ms) if ms <= MAX_POLL_INTERVAL_MS => Ok(ms),
        _ => Err(format!(
            "must be at most {}",
            humantime::format_duration(Duration::from_millis(MAX_POLL_INTERVAL_MS))
        )),
    }
}

impl RunArgs {
    fn apply(&self, mut settings: EngineSettings) -> EngineSettings {
        if let Some(image) = &self.image {
            settings.image = Some(image.clone());
        }
        if let Some(max_iterations) = self.max_iterations {
            settings.max_iterations = max_iterations;
        }
        if let Some(interval_ms) = self.poll_interval {
            settings.poll_interval_ms = interval_ms;
        }
        if let Some(ceiling) = self.poll_ceiling {
            settings.poll_ceiling = ceiling;
        }
        if let Some(policy) = self.on_timeout {
            settings.on_timeout = policy;
        }
        if let Some(policy) = self.missing_on_host {
            settings.missing_on_host = policy;
        }
        settings
    }
}

pub fn run(args: RunArgs) -> Result<()> {
    let config = ConfigManager::new();
    let settings: EngineSettings = config.load("engine").with_context(|| {
        format!(
            "invalid engine configuration in {}",
            config.config_dir().join("engine.json").display()
        )
    })?;
    let settings = args.apply(settings);
    info!(
        max_iterations = settings.max_iterations,
        poll_budget = %humantime::format_duration(settings.poll_budget()),
        "engine settings loaded"
    );

    let profile = read_profile()?;
    let runtime = DockerCli::from_env();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("failed to install Ctrl-C handler")?;

    let mut sandbox = provision(&runtime, &profile, &args.command, &settings, &PathLookup)
        .context("failed to provision sandbox")?;

    let convergence = Convergence::new(&runtime, settings).with_cancel(cancel);
    match convergence.resolve_dependencies(&mut sandbox, &args.command) {
        Ok(report) => {
            print_report(&sandbox, &report, args.json)?;
            if args.rm {
                teardown(&runtime, sandbox).context("failed to remove sandbox")?;
            }
            Ok(())
        }
        Err(err) => {
            if args.keep_on_failure {
                eprintln!(
                    "Keeping sandbox {} ({}) for inspection",
                    sandbox.name(),
                    sandbox.id()
                );
            } else if let Err(remove_err) = teardown(&runtime, sandbox) {
                warn!(error = %remove_err, "failed to remove sandbox after failed resolution");
            }
            Err(err).context("dependency resolution failed")
        }
    }
}

fn whole_millis(elapsed: Duration) -> Duration {
    Duration::new(elapsed.as_secs(), elapsed.subsec_millis() * 1_000_000)
}

fn print_report(sandbox: &Sandbox, report: &ResolutionReport, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(&json!({
            "sandbox": { "name": sandbox.name(), "id": sandbox.id() },
            "report": report,
        }))
        .context("failed to serialize resolution report")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!(
        "Sandbox {} ({}) ready: {:?} after {} iteration(s) in {}",
        sandbox.name(),
        sandbox.id(),
        report.outcome,
        report.iterations,
        humantime::format_duration(whole_millis(report.elapsed()))
    );
    for dependency in &report.injected {
        println!(
            "  + {} <- {}",
            dependency.sandbox_destination,
            dependency.host_source.display()
        );
    }
    for path in &report.skipped {
        println!("  ? {} (not on host)", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_parsed_to_milliseconds() {
        assert_eq!(parse_poll_interval("500ms"), Ok(500));
        assert_eq!(parse_poll_interval("1h"), Ok(3_600_000));
    }

    #[test]
    fn poll_interval_beyond_an_hour_is_rejected() {
        assert!(parse_poll_interval("1h 1ms").is_err());
        assert!(parse_poll_interval("100000h").is_err());
        assert!(parse_poll_interval("600000000years").is_err());
        assert!(parse_poll_interval("soon").is_err());
    }

    #[test]
    fn elapsed_time_is_cut_to_whole_milliseconds() {
        assert_eq!(
            whole_millis(Duration::new(7, 123_456_789)),
            Duration::new(7, 123_000_000)
        );
        assert_eq!(
            whole_millis(Duration::MAX),
            Duration::new(u64::MAX, 999_000_000)
        );
    }
}
