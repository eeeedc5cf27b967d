//! Setup command - install a service and follow its progress.

use aipg_services::ProgressStatus;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::{lookup, Options};

pub(crate) async fn run(options: &Options, name: &str) -> miette::Result<()> {
    let registry = options.registry()?;
    let service = lookup(&registry, name)?;

    let mut progress = service
        .set_up()
        .map_err(|e| miette::miette!("Cannot set up {}: {}", name, e))?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} {wide_msg}")
            .map_err(|e| miette::miette!("Invalid progress template: {}", e))?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    while let Some(event) = progress.next().await {
        pb.set_prefix(event.step.clone());
        match event.status {
            ProgressStatus::Executing => pb.set_message(event.debug_message),
            ProgressStatus::Success => {
                pb.finish_with_message(event.debug_message);
                return Ok(());
            }
            ProgressStatus::Failed => {
                pb.abandon_with_message("setup failed");
                if let Some(details) = &event.error_details {
                    if let Some(command) = &details.command {
                        eprintln!("command: {}", command);
                    }
                    if let Some(stderr) = details.stderr.as_deref().filter(|s| !s.is_empty()) {
                        eprintln!("{}", stderr.trim_end());
                    }
                }
                return Err(miette::miette!("{}", event.debug_message));
            }
        }
    }

    pb.abandon();
    Err(miette::miette!("Setup of {} ended without a result", name))
}
