//! One-shot analysis of a data directory.
//!
//! Writes the same file the server loads its cache from, so a later server
//! start serves this result without recomputing.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use dotenv::dotenv;
use tracing::{info, warn};

use thread_sentiment::batch::{BatchCoordinator, CancelFlag};
use thread_sentiment::config::{parse_workers, AppConfig};
use thread_sentiment::persist;
use thread_sentiment::scorer::LexiconScorer;
use thread_sentiment::store::DirectoryStore;

const USAGE: &str = "Usage: run_analysis [--data-dir <dir>] [--output <file>] [--workers <n>]";

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AppConfig::from_env()?;
    let mut data_dir = config.data_dir;
    let mut output = config.cache_file;
    let mut workers = config.workers;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--data-dir" => {
                data_dir = args.next().map(PathBuf::from).context(USAGE)?;
            }
            "--output" => {
                output = args.next().map(PathBuf::from).context(USAGE)?;
            }
            "--workers" => {
                let raw = args.next().context(USAGE)?;
                workers = parse_workers(&raw);
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other => bail!("unknown argument {:?}\n{}", other, USAGE),
        }
    }

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, finishing in-flight documents");
                on_signal.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let coordinator = BatchCoordinator::new(Arc::new(LexiconScorer::new()));
    let report = coordinator
        .analyze_batch_with_cancel(Arc::new(DirectoryStore::new(&data_dir)), workers, &cancel)
        .await?;
    if report.cancelled {
        bail!("analysis of {} was interrupted", data_dir.display());
    }

    persist::save(&output, Utc::now(), &report.aggregate).await?;
    info!("[{}] Result saved to {}", report.run_id, output.display());

    let stats = &report.aggregate.overall_statistics;
    let dist = &stats.sentiment_distribution;
    let scored = dist.total();

    println!("Posts:              {}", stats.total_posts);
    println!("Comments:           {} ({} scored)", stats.total_comments, scored);
    println!("Average sentiment:  {:.4}", stats.avg_sentiment_score);
    println!("Positive:           {} ({:.1}%)", dist.positive, percent(dist.positive, scored));
    println!("Negative:           {} ({:.1}%)", dist.negative, percent(dist.negative, scored));
    println!("Neutral:            {} ({:.1}%)", dist.neutral, percent(dist.neutral, scored));
    println!(
        "Documents skipped:  {} unreadable, {} failed",
        report.stats.read_failures, report.stats.analysis_failures
    );
    println!("Saved to:           {}", output.display());

    Ok(())
}
