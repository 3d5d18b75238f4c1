//! Commands that talk to a running feature API: `stats`, `next`, `list`, `mark`.

use anyhow::{Context, Result};

use feature_tracker::config::TrackerConfig;
use feature_tracker::features::{Feature, FeatureClient, FeatureFilter};
use feature_tracker::progress::summary_line;

async fn connect(config: &TrackerConfig) -> Result<FeatureClient> {
    let client = FeatureClient::new(config.base_url()?)?;
    client.health().await.with_context(|| {
        format!(
            "No feature API at {}. Is `feature-tracker serve` running?",
            client.base_url()
        )
    })?;
    Ok(client)
}

fn print_feature(feature: &Feature) {
    let status = if feature.passes {
        console::style("PASS").green().bold()
    } else {
        console::style("TODO").yellow()
    };
    println!(
        "#{:<4} {} [{}] {} {}",
        feature.id,
        status,
        feature.category,
        feature.name,
        console::style(format!("(priority {})", feature.priority)).dim()
    );
}

pub async fn cmd_stats(config: &TrackerConfig) -> Result<()> {
    let client = connect(config).await?;
    let stats = client.stats().await?;
    println!("{}", summary_line(&stats));
    Ok(())
}

pub async fn cmd_next(config: &TrackerConfig) -> Result<()> {
    let client = connect(config).await?;
    match client.next_pending().await? {
        Some(feature) => {
            print_feature(&feature);
            println!();
            println!("{}", feature.description);
            for (i, step) in feature.steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
        None => println!("{}", console::style("All features are passing.").green()),
    }
    Ok(())
}

pub async fn cmd_list(
    config: &TrackerConfig,
    passes: Option<bool>,
    category: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<()> {
    let client = connect(config).await?;
    let page = client
        .list(&FeatureFilter { passes, category }, limit, offset)
        .await?;

    if page.features.is_empty() {
        println!("No matching features.");
        return Ok(());
    }
    for feature in &page.features {
        print_feature(feature);
    }
    println!();
    println!(
        "{}",
        console::style(format!(
            "Showing {}-{} of {}{}",
            page.offset + 1,
            page.offset + page.features.len() as i64,
            page.total,
            if page.has_more { " (more with --offset)" } else { "" }
        ))
        .dim()
    );
    Ok(())
}

pub async fn cmd_mark(config: &TrackerConfig, id: i64, passes: bool) -> Result<()> {
    let client = connect(config).await?;
    let feature = client.mark(id, passes).await?;
    print_feature(&feature);
    Ok(())
}
