//! Apply a trained vocabulary: corpus benchmark and interactive loop.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use kiln_engine::{Corpus, Scheduler, TaskPool, Vocab};
use tracing_subscriber::EnvFilter;

/// Tokenize text with a trained vocabulary.
#[derive(Parser, Debug)]
#[command(name = "kiln-tokenize")]
#[command(about = "Tokenize text with a trained vocabulary")]
struct Cli {
    /// Vocabulary file produced by kiln-train
    vocab: PathBuf,

    /// Benchmark compression on the last file of this corpus before the
    /// interactive loop
    #[arg(long)]
    root: Option<PathBuf>,
}

fn benchmark(vocab: &Arc<Vocab>, root: &PathBuf) -> Result<()> {
    let corpus = Corpus::load_or_index(root)
        .with_context(|| format!("opening corpus at {}", root.display()))?;
    let Some(file) = corpus.last_file() else {
        println!("corpus is empty, skipping benchmark");
        return Ok(());
    };
    let file = file?;
    println!("benchmark on {}", file.path.display());

    let chars = Arc::new(AtomicUsize::new(0));
    let tokens = Arc::new(AtomicUsize::new(0));
    let pool = TaskPool::with_default_threads();
    for text in file.texts {
        let vocab = Arc::clone(vocab);
        let chars = Arc::clone(&chars);
        let tokens = Arc::clone(&tokens);
        pool.enqueue(Box::new(move || {
            chars.fetch_add(text.chars().count(), Ordering::Relaxed);
            tokens.fetch_add(vocab.tokenize(&text).len() - 2, Ordering::Relaxed);
        }));
    }
    pool.wait_all();

    let chars = chars.load(Ordering::Relaxed);
    let tokens = tokens.load(Ordering::Relaxed).max(1);
    println!(
        "{chars} characters, {tokens} tokens - compression factor {:.4}",
        chars as f64 / tokens as f64
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let vocab = Arc::new(
        Vocab::load(&cli.vocab)
            .with_context(|| format!("loading vocabulary {}", cli.vocab.display()))?,
    );
    println!("loaded {} tokens", vocab.len());

    if let Some(root) = &cli.root {
        benchmark(&vocab, root)?;
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line == "exit" {
            break;
        }
        let ids = vocab.tokenize(&line);
        println!("{}", vocab.prettify(&ids));
        let emitted = ids.len() - 2;
        if emitted > 0 {
            println!(
                "compression factor {:.4}",
                line.chars().count() as f64 / emitted as f64
            );
        }
    }
    Ok(())
}
