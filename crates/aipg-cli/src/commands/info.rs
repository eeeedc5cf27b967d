//! Info command - show directories and configuration.

use aipg_services::paths::ServicePaths;
use aipg_services::profiles;

use super::Options;

pub(crate) fn run(options: &Options) -> miette::Result<()> {
    let config = options.config();
    let paths = ServicePaths::new(&config.base_dir);

    println!("aipg backend services");
    println!("=====================");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Base directory:   {}", paths.base_dir().display());
    println!("Media directory:  {}", config.media_dir.display());
    println!("Resources:        {}", paths.resources_dir().display());
    println!("Versions file:    {}", paths.versions_file().display());
    println!("  Exists: {}", paths.versions_file().exists());
    if let Some(url) = &config.remote_versions_url {
        println!("Remote versions:  {}", url);
    }
    if let Some(arch) = config.device_arch_override {
        println!("Device override:  {}", arch);
    }
    println!("Preview services: {}", config.enable_preview_features);
    println!();

    println!("Services:");
    for profile in profiles::all() {
        let layout = profile.layout(&paths);
        let note = if profile.preview_only { " (preview)" } else { "" };
        println!(
            "  {:<18} ports {}-{}  dir {}{}",
            profile.name,
            profile.port_range.start(),
            profile.port_range.end(),
            layout.service_dir.display(),
            note
        );
    }

    Ok(())
}
