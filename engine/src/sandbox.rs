use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

const NAME_SUFFIX_LEN: usize = 16;

/// One provisioned container bound to a single target command.
///
/// The identity is assigned by the runtime at creation and cannot change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sandbox {
    id: String,
    name: String,
    command: Vec<String>,
    /// Sandbox paths already written by injection, across all sessions.
    injected: BTreeSet<String>,
}

impl Sandbox {
    pub fn new(id: impl Into<String>, name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            command,
            injected: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn injected(&self) -> impl Iterator<Item = &str> {
        self.injected.iter().map(String::as_str)
    }

    pub fn has_injected(&self, destination: &str) -> bool {
        self.injected.contains(destination)
    }

    /// Returns false if `destination` was already recorded.
    pub(crate) fn record_injection(&mut self, destination: &str) -> bool {
        self.injected.insert(destination.to_string())
    }

    /// File name of the target program, which is how it is installed in the sandbox.
    pub fn program_name(&self) -> Option<&str> {
        self.command.first().and_then(|program| program_file_name(program))
    }
}

pub(crate) fn program_file_name(program: &str) -> Option<&str> {
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
}

/// `<flavor>_sandbox_<16 alphanumerics>`, restricted to characters container
/// runtimes accept in names.
pub fn generate_name(flavor: &str) -> String {
    let flavor: String = flavor
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let flavor = match flavor.trim_start_matches(&['.', '-', '_'][..]) {
        "" => "sbox",
        trimmed => trimmed,
    };
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(NAME_SUFFIX_LEN)
        .collect();
    format!("{}_sandbox_{}", flavor, suffix)
}
