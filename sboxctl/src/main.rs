use anyhow::Result;
use clap::{Parser, Subcommand};
use config_loader::ConfigError;
use std::process;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "sboxctl", version)]
#[command(about = "Run a host program in a container and pull in the files it is missing", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a sandbox for COMMAND and inject its missing dependencies
    Run(commands::run::RunArgs),
    /// Print the host path of an executable
    Find {
        #[arg(value_name = "BINARY")]
        binary: String,
    },
    /// Show the detected host system profile
    Profile {
        /// Output machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Print version and exit
    Version,
}

fn init_tracing(json: bool) {
    let builder = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Commands::Run(args) => commands::run::run(args),
        Commands::Find { binary } => commands::find::run(&binary),
        Commands::Profile { json } => commands::profile::run(json),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// 2 for configuration problems, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        2
    } else {
        1
    }
}
