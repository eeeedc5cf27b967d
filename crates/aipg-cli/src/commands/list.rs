//! List command - show every registered service.

use super::Options;

pub(crate) async fn run(options: &Options, json: bool) -> miette::Result<()> {
    let registry = options.registry()?;
    let infos = registry.service_information();

    if json {
        let out = serde_json::to_string_pretty(&infos)
            .map_err(|e| miette::miette!("Failed to serialize service info: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    println!("{:<18} {:<20} {:<8} URL", "SERVICE", "STATUS", "PORT");
    for info in infos {
        let marker = if info.is_required { "*" } else { "" };
        println!(
            "{:<18} {:<20} {:<8} {}",
            format!("{}{}", info.service_name, marker),
            info.status.as_str(),
            info.port,
            info.base_url
        );
    }
    println!();
    println!("* required service");

    Ok(())
}
