//! Host system profile: which OS family we run on and, for POSIX hosts, which
//! distribution flavor the sandbox image should match.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const RELEASE_FILE: &str = "/etc/os-release";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum SystemProfile {
    /// Flavor-specific provisioning does not apply to Windows hosts.
    Windows,
    Posix(PosixProfile),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PosixProfile {
    pub base: String,
    pub flavor: String,
    pub version: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Error)]
#[error("failed to read OS release descriptor {}: {source}", .path.display())]
pub struct ProfileReadError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl SystemProfile {
    pub fn base(&self) -> &str {
        match self {
            SystemProfile::Windows => "windows",
            SystemProfile::Posix(profile) => &profile.base,
        }
    }

    pub fn flavor(&self) -> Option<&str> {
        match self {
            SystemProfile::Posix(profile) if !profile.flavor.is_empty() => Some(profile.flavor.as_str()),
            _ => None,
        }
    }

    /// `<flavor>:latest`, or `None` when there is no flavor to match.
    pub fn image_reference(&self) -> Option<String> {
        self.flavor().map(|flavor| format!("{}:latest", flavor))
    }
}

/// Detect the host profile.
pub fn read() -> Result<SystemProfile, ProfileReadError> {
    if cfg!(windows) {
        return Ok(SystemProfile::Windows);
    }
    read_from(Path::new(RELEASE_FILE))
}

/// Read a POSIX profile from an explicit release descriptor.
pub fn read_from(path: &Path) -> Result<SystemProfile, ProfileReadError> {
    let text = fs::read_to_string(path).map_err(|source| ProfileReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let profile = parse_release(std::env::consts::OS, &text);
    debug!(
        flavor = %profile.flavor,
        version = %profile.version,
        aliases = ?profile.aliases,
        "read host release descriptor {}",
        path.display()
    );
    Ok(SystemProfile::Posix(profile))
}

/// Parse `KEY=VALUE` lines. A key that repeats keeps its last value.
pub fn parse_release(base: &str, text: &str) -> PosixProfile {
    let mut profile = PosixProfile {
        base: base.to_string(),
        ..Default::default()
    };

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim() {
            "ID" => profile.flavor = value.to_string(),
            "VERSION_ID" => profile.version = value.to_string(),
            "ID_LIKE" => {
                profile.aliases = value
                    .split(' ')
                    .filter(|alias| !alias.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            _ => {}
        }
    }

    profile
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
