use anyhow::{Context, Result};

use thuis::config::Settings;
use thuis::credentials;

pub fn cmd_setup(settings: &Settings) -> Result<()> {
    let path = settings.credentials_path();

    eprintln!("🔑 Storing VRT MAX credentials");
    eprintln!("⚠️  They are kept in plain text at {}", path.display());
    eprintln!("   Anyone who can read that file can log in as you.\n");

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stderr();
    let creds = credentials::prompt(&mut input, &mut output)
        .context("Failed to read credentials")?;

    credentials::save(&path, &creds).context("Failed to save credentials")?;
    println!("✅ Credentials saved to {}", path.display());
    Ok(())
}
