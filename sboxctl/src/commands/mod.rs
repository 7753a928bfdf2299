pub mod find;
pub mod profile;
pub mod run;

use anyhow::{Context, Result};
use sbox_engine::{host_profile, SystemProfile};
use std::env;
use std::path::Path;

/// Overrides the host release descriptor, mostly for tests.
pub const RELEASE_FILE_ENV: &str = "SBOX_RELEASE_FILE";

pub fn read_profile() -> Result<SystemProfile> {
    let release_file = env::var_os(RELEASE_FILE_ENV);
    host_profile(release_file.as_deref().map(Path::new))
        .context("failed to detect host system profile")
}
