//! Session progress report (`feature-tracker progress`).

use anyhow::Result;

use feature_tracker::config::TrackerConfig;
use feature_tracker::features::FeatureClient;
use feature_tracker::progress::{ProgressReporter, WebhookOutcome, summary_line};

/// Best effort: an unreachable API is reported, not treated as failure.
pub async fn cmd_progress(config: &TrackerConfig) -> Result<()> {
    let client = FeatureClient::new(config.base_url()?)?;
    let reporter = ProgressReporter::new(
        client,
        config.webhook_url(),
        &config.project_dir,
        config.cache_path(),
    )?;

    let report = match reporter.report().await {
        Ok(report) => report,
        Err(e) => {
            println!(
                "{} Feature API unavailable: {:#}",
                console::style("⚠").yellow(),
                e
            );
            return Ok(());
        }
    };

    println!();
    println!("{}", summary_line(&report.stats));
    match report.webhook {
        WebhookOutcome::Sent { completed } => println!(
            "{}",
            console::style(format!("Webhook notified ({} newly passing)", completed)).dim()
        ),
        WebhookOutcome::Failed(reason) => println!(
            "{} Webhook notification failed: {}",
            console::style("⚠").yellow(),
            reason
        ),
        WebhookOutcome::NotConfigured | WebhookOutcome::NoProgress => {}
    }
    Ok(())
}
