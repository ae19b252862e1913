use std::fmt::Write;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use tracing_subscriber::EnvFilter;

use anonymizer::io::{read_records, write_json};
use anonymizer::pipeline::{anonymize, AnonymizeOptions};
use anonymizer::policy::Policy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file (JSON keyed by record type, or CSV)
    #[arg(short, long)]
    input: String,
    /// Anonymization policy (JSON)
    #[arg(short, long)]
    policy: String,
    /// Output file
    #[arg(short, long)]
    output: String,
    /// Seed for randomization
    #[arg(short, long)]
    seed: Option<u64>,
    /// Drop original values from the output
    #[arg(long)]
    exclude_original: bool,
    /// Record type of CSV input
    #[arg(short, long)]
    record_type: Option<String>,
    /// Delimiter for CSV input
    #[arg(short, long, default_value = ",")]
    delimiter: char,
    /// Columns to ignore in CSV input (comma-separated)
    #[arg(long, value_delimiter = ',', num_args = 0..)]
    ignore_cols: Option<Vec<String>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let policy = Policy::from_file(&args.policy).context("Could not load policy")?;
    let ignore_cols = args.ignore_cols.unwrap_or_default();
    let mut store = read_records(
        &args.input,
        args.delimiter,
        args.record_type.as_deref(),
        &ignore_cols,
    )
    .context("Could not read input file")?;

    let options = AnonymizeOptions {
        seed: args.seed,
        exclude_original: args.exclude_original,
        progress: progress_bar()?,
    };
    let batch = anonymize(&mut store, &policy, &options);
    write_json(&args.output, &store, &batch).context("Could not write output file")?;
    Ok(())
}

fn progress_bar() -> Result<ProgressBar> {
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>7}/{len:7} ({eta})",
        )?
        .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
        })
        .progress_chars("#>-"),
    );
    Ok(progress)
}
