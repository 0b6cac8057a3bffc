use clap::Parser;
use crftag_trainer::{TrainConfig, run_training};
use tracing_subscriber::EnvFilter;

/// Train a BiLSTM-CRF sequence tagger on a CoNLL-style corpus.
#[derive(Parser)]
#[command(name = "train", version, about)]
struct Cli {
    #[command(flatten)]
    config: TrainConfig,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let reports = run_training(cli.config)?;

    if let Some(best) = reports
        .iter()
        .filter_map(|r| r.dev.as_ref().map(|eval| (r.epoch, eval)))
        .max_by(|a, b| a.1.headline().total_cmp(&b.1.headline()))
    {
        println!("best dev epoch {}: {}", best.0, best.1);
    }
    Ok(())
}
