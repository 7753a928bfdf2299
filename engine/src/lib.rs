//! Dependency-discovering sandbox engine.
//!
//! A sandbox is a container built from the host's own distribution image. The
//! target program is traced inside it, and every file it fails to open is copied
//! in from the host until the program runs cleanly.

pub mod cancel;
pub mod convergence;
pub mod error;
pub mod inject;
pub mod profile;
pub mod provision;
pub mod resolver;
pub mod sandbox;
pub mod settings;
pub mod trace;

pub use cancel::CancelToken;
pub use convergence::{Convergence, Outcome, ResolutionReport};
pub use error::{ProvisionError, ResolutionError};
pub use inject::{inject, InjectError};
pub use profile::{PosixProfile, ProfileReadError, SystemProfile};
pub use provision::{host_profile, provision, teardown};
pub use resolver::{ExecutableLookup, HostResolver, MissingDependency, PathLookup, ResolveError};
pub use sandbox::Sandbox;
pub use settings::{EngineSettings, MissingPolicy, TimeoutPolicy};
pub use trace::TraceResult;
