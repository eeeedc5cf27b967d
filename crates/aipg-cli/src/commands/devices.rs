//! Devices command - show what a service would run on.

use aipg_devices::Device;

use super::{lookup, Options};

pub(crate) async fn run(options: &Options, name: &str) -> miette::Result<()> {
    let registry = options.registry()?;
    let service = lookup(&registry, name)?;
    let devices = service.detect_devices().await;

    let selector = service.profile().device_selector;
    let (key, value) = selector.env_for(&devices);

    if devices.is_empty() {
        println!("No devices detected for {}.", name);
    } else {
        println!("Devices for {}:", name);
        for Device { id, name: device_name, arch, selected } in &devices {
            let marker = if *selected { "*" } else { " " };
            println!("  {} {:<6} {:<40} {}", marker, id, device_name, arch);
        }
    }
    println!();
    println!("{}={}", key, value);

    Ok(())
}
