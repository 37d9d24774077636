//! Hash-password command implementation.

use anyhow::{anyhow, Result};
use colored::Colorize;
use tracing::debug;

/// Execute the hash-password command.
///
/// Produces the same argon2id hashes the server verifies Basic
/// credentials against.
pub fn execute(password: &str, quiet: bool) -> Result<()> {
    debug!("Hashing password with argon2id");

    let hash =
        ducat_server::hash_password(password).map_err(|e| anyhow!("Failed to hash password: {e}"))?;

    if quiet {
        println!("{hash}");
        return Ok(());
    }

    println!();
    println!("{}", "Password hash generated".green().bold());
    println!();
    println!("   {} {}", "Hash:".dimmed(), hash);
    println!();
    println!("Add it to the \"users\" table of your server configuration:");
    println!(
        "   {}",
        format!("\"auth\": {{ \"users\": {{ \"<username>\": \"{hash}\" }} }}").dimmed()
    );

    Ok(())
}
