//! Vocabulary trainer front-end.
//!
//! Indexes the corpus if needed, extracts (or cache-loads) the candidate
//! array, runs the annealing selector, and saves the resulting vocabulary.
//! Pressing Enter stops the run at the next pass boundary.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use kiln_engine::{
    Corpus, Selector, SelectorOptions, TaskPool, TokenGraph, TrainConfig, Vocab,
    corpus_candidates,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Train a subword vocabulary on a corpus.
#[derive(Parser, Debug)]
#[command(name = "kiln-train")]
#[command(about = "Train a subword vocabulary by simulated annealing")]
struct Cli {
    /// Corpus root directory (indexed on first use)
    root: PathBuf,

    /// Optional TOML config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum candidate length in code points
    #[arg(long)]
    max_len: Option<u8>,

    /// Only process the first N corpus files
    #[arg(long)]
    file_limit: Option<usize>,

    /// Target vocabulary size P
    #[arg(short, long)]
    tokens: Option<usize>,

    /// Candidates toggled per worker task
    #[arg(long)]
    batch_size: Option<usize>,

    /// Annealing passes (default: run until Enter is pressed)
    #[arg(long)]
    passes: Option<usize>,

    /// Worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Ignore the candidate cache and re-extract
    #[arg(long)]
    rebuild: bool,

    /// NFKC-normalize corpus text before extraction
    #[arg(long)]
    normalize: bool,

    /// Seed for the selector's random streams
    #[arg(long)]
    seed: Option<u64>,

    /// Output vocabulary file
    #[arg(short, long, default_value = "tokens.json")]
    output: PathBuf,
}

impl Cli {
    fn into_config(self) -> Result<(TrainConfig, PathBuf, PathBuf)> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_toml_file(path)?,
            None => TrainConfig::default(),
        };
        if let Some(max_len) = self.max_len {
            config.max_len = max_len;
        }
        if self.file_limit.is_some() {
            config.file_limit = self.file_limit;
        }
        if let Some(tokens) = self.tokens {
            config.pref_token_count = tokens;
        }
        if self.batch_size.is_some() {
            config.batch_size = self.batch_size;
        }
        if self.passes.is_some() {
            config.pass_count = self.passes;
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        config.rebuild |= self.rebuild;
        config.normalize |= self.normalize;
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok((config, self.root, self.output))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let (config, root, output) = Cli::parse().into_config()?;

    let corpus = Corpus::load_or_index(&root)
        .with_context(|| format!("opening corpus at {}", root.display()))?;
    info!(files = corpus.file_count(), "corpus ready");

    let extract_pool = TaskPool::with_default_threads();
    let tokens = corpus_candidates(&corpus, &config, &extract_pool);
    drop(extract_pool);

    let selector = Selector::new(
        TokenGraph::new(tokens),
        &SelectorOptions {
            pref_token_count: config.pref_token_count,
            batch_size: config.batch_size,
            threads: config.threads,
            seed: config.seed,
        },
    );
    let select_pool = TaskPool::new(selector.threads());

    // Stop at the next pass boundary once a line arrives on stdin.
    let (line_tx, line_rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() || line_tx.send(()).is_err() {
                break;
            }
        }
    });

    let bar = match config.pass_count {
        Some(passes) => {
            let bar = ProgressBar::new(passes as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] pass {pos}/{len} {msg}")
                    .expect("progress template is valid")
                    .progress_chars("=>-"),
            );
            bar
        }
        None => ProgressBar::new_spinner(),
    };
    selector.run(&select_pool, config.pass_count, |report| {
        bar.set_position(report.pass as u64);
        bar.set_message(format!(
            "score {:.5}  enabled {}  temp {:.2e}",
            report.score, report.enabled, report.temp
        ));
        line_rx.try_recv().is_err()
    });
    bar.finish_and_clear();

    let solution = selector.solution();
    info!(
        selected = selector.enabled_count(),
        score = selector.score(),
        "selection finished"
    );
    let vocab = Vocab::new(solution);
    vocab
        .save(&output)
        .with_context(|| format!("writing vocabulary {}", output.display()))?;
    info!(tokens = vocab.len(), path = %output.display(), "vocabulary saved");
    Ok(())
}
