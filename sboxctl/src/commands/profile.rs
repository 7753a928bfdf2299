use anyhow::{Context, Result};
use sbox_engine::SystemProfile;

use super::read_profile;

pub fn run(json: bool) -> Result<()> {
    let profile = read_profile()?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&profile).context("failed to serialize system profile")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("You're using {}!", profile.base());
    if let SystemProfile::Posix(posix) = &profile {
        if !posix.flavor.is_empty() {
            println!("Distribution: {} {}", posix.flavor, posix.version);
        }
        if !posix.aliases.is_empty() {
            println!("Like: {}", posix.aliases.join(", "));
        }
    }
    match profile.image_reference() {
        Some(image) => println!("Sandbox image: {}", image),
        None => println!("Sandbox image: none (set `image` in engine.json or pass --image)"),
    }
    Ok(())
}
