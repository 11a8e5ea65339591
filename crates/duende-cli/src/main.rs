use anyhow::Result;
use clap::{Parser, Subcommand};
use duende_enrich::{
    run_backfill_from_env, run_batch_from_env, run_force_update_from_env, ForceOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "duende-cli")]
#[command(about = "Duende artist profile enrichment command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one enrichment batch over artists needing work.
    Batch,
    /// Re-verify and republish a single artist's profile.
    ForceUpdate { artist_name: String },
    /// Fill missing short bios from already-published pages.
    BackfillShortBios,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Batch) {
        Commands::Batch => {
            let summary = run_batch_from_env().await?;
            println!(
                "batch complete: run_id={} selected={} completed={} placeholders={} failed={} unresolved={}",
                summary.run_id,
                summary.selected,
                summary.completed,
                summary.placeholders,
                summary.failed,
                summary.unresolved
            );
        }
        Commands::ForceUpdate { artist_name } => {
            match run_force_update_from_env(&artist_name).await? {
                ForceOutcome::Updated {
                    outcome_is_complete,
                    url,
                } => {
                    let kind = if outcome_is_complete { "complete" } else { "placeholder" };
                    println!(
                        "force update finished: {kind} profile at {}",
                        url.as_deref().unwrap_or("<unchanged>")
                    );
                }
                ForceOutcome::Failed => {
                    eprintln!("force update for '{artist_name}' failed; see logs");
                }
                ForceOutcome::ArtistNotFound => {
                    eprintln!("no artist named '{artist_name}' in the store");
                }
            }
        }
        Commands::BackfillShortBios => {
            let summary = run_backfill_from_env().await?;
            println!(
                "backfill complete: selected={} updated={} skipped={}",
                summary.selected, summary.updated, summary.skipped
            );
        }
    }

    Ok(())
}
