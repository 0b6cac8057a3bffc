use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use candle_core::Device;
use clap::Parser;
use crftag_trainer::{Evaluation, TagScheme, TaggerModel, read_corpus, read_tokens};
use tracing_subscriber::EnvFilter;

/// Tag a CoNLL-style file with a trained model.
#[derive(Parser)]
#[command(name = "tag", version, about)]
struct Cli {
    /// Model directory written by `train`
    #[arg(short, long)]
    model: PathBuf,

    /// Input, one token per line, blank line between sentences
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Input carries gold tags in its last column; report accuracy and F1
    #[arg(long)]
    evaluate: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let model = TaggerModel::load(&cli.model, &Device::Cpu)?;

    let sentences = if cli.evaluate {
        read_corpus(&cli.input)?
    } else {
        read_tokens(&cli.input)?
    };

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut eval = Evaluation::new(TagScheme::detect(model.tags().names()));
    let snapshot = model.snapshot()?;
    for sentence in &sentences {
        let predicted = model.tag_with(&snapshot, &sentence.tokens)?;
        for (token, tag) in sentence.tokens.iter().zip(&predicted) {
            writeln!(out, "{token}\t{tag}")?;
        }
        writeln!(out)?;
        if cli.evaluate {
            eval.accumulate(&sentence.tags, &predicted);
        }
    }
    out.flush()?;

    if cli.evaluate {
        eprintln!("{eval}");
    }
    Ok(())
}
