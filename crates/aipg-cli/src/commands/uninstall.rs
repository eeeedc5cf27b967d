//! Uninstall command - remove a service installation.

use super::{lookup, Options};

pub(crate) async fn run(options: &Options, name: &str) -> miette::Result<()> {
    let registry = options.registry()?;
    let service = lookup(&registry, name)?;

    let status = service
        .uninstall()
        .await
        .map_err(|e| miette::miette!("Failed to uninstall {}: {}", name, e))?;
    println!("{} is now {}", name, status);

    Ok(())
}
