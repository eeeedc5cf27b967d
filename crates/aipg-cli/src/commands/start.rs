//! Start and boot commands - run services until interrupted.

use aipg_services::{BackendStatus, ServiceRegistry};

use super::{lookup, Options};

pub(crate) async fn run(options: &Options, name: &str, device: Option<&str>) -> miette::Result<()> {
    let registry = options.registry()?;
    let service = lookup(&registry, name)?;

    if let Some(id) = device {
        service.detect_devices().await;
        if !service.select_device(id) {
            return Err(miette::miette!("Service {} has no device {}", name, id));
        }
    }

    let status = service
        .start()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    if status != BackendStatus::Running {
        let reason = service
            .last_error()
            .map(|d| d.message)
            .unwrap_or_else(|| status.to_string());
        return Err(miette::miette!("Service {} failed to start: {}", name, reason));
    }

    println!("{} running at {}", name, service.base_url());
    wait_for_interrupt(&registry).await
}

pub(crate) async fn boot(options: &Options) -> miette::Result<()> {
    let registry = options.registry()?;
    registry
        .required()
        .map_err(|e| miette::miette!("{}", e))?;

    let results = registry.boot_up_all_set_up_services().await;
    if results.is_empty() {
        println!("No installed services. Run `aipg setup <service>` first.");
        return Ok(());
    }
    for result in &results {
        println!("{:<18} {}", result.service_name, result.state);
    }
    wait_for_interrupt(&registry).await
}

async fn wait_for_interrupt(registry: &ServiceRegistry) -> miette::Result<()> {
    println!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for Ctrl-C: {}", e))?;

    for result in registry.stop_all_services().await {
        tracing::debug!("{} -> {}", result.service_name, result.state);
    }
    Ok(())
}
