//! kiln-engine: subword vocabulary training.
//!
//! The trainer sweeps a corpus into a frequency trie of bounded-length
//! substrings, flattens it into a flat token graph, and then runs a
//! multithreaded simulated-annealing selection that keeps roughly the
//! requested number of multi-character tokens enabled while minimizing the
//! encoded size of the corpus.

use std::sync::{Mutex, MutexGuard};

pub mod anneal;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod extract;
pub mod lomax;
pub mod pool;
pub mod token;
pub mod trie;
pub mod vocab;

/// Version string stamped into the candidate cache and vocabulary files.
pub const FORMAT_VERSION: &str = "1.2.0";

pub use anneal::{PassReport, Selector, SelectorOptions};
pub use cache::CacheError;
pub use config::TrainConfig;
pub use corpus::{Corpus, CorpusError, CorpusFile, Entry};
pub use extract::{ExtractOptions, corpus_candidates, extract_candidates};
pub use lomax::LomaxDist;
pub use pool::{InlinePool, Scheduler, TaskPool, TaskRef};
pub use token::{Token, TokenGraph};
pub use trie::Trie;
pub use vocab::{Vocab, VocabError};

/// Lock a mutex, continuing through poisoning: a panicked worker must not
/// wedge the rest of the run.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
