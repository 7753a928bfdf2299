use anyhow::{bail, Result};
use sbox_engine::{ExecutableLookup, PathLookup};

pub fn run(binary: &str) -> Result<()> {
    match PathLookup.find(binary) {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("{} not found on host PATH", binary),
    }
}
