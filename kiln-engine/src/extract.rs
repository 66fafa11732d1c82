//! Candidate extraction: sweep the corpus into per-worker tries, merge them
//! into a global trie, and flatten it into the token array.
//!
//! Every worker owns a private trie keyed by its thread id. A worker trie
//! that grows past `MERGE_SIZE` nodes is folded into the global trie under
//! the merge mutex, bounding peak memory. File-level tasks run behind a
//! small dependency window so only a few files are in flight at once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::cache::{self, CacheError};
use crate::config::TrainConfig;
use crate::corpus::{Corpus, CorpusError, CorpusFile};
use crate::lock;
use crate::pool::Scheduler;
use crate::token::Token;
use crate::trie::Trie;

/// Worker tries are merged into the global trie once they reach this many
/// nodes.
const MERGE_SIZE: u32 = 4_000_000;

/// File `i` waits on file `i - DEP_WINDOW` before dispatching.
const DEP_WINDOW: usize = 3;

/// Extraction parameters.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Maximum candidate length in code points.
    pub max_len: u8,
    /// Apply NFKC normalization to each text before sweeping.
    pub normalize: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_len: 255,
            normalize: false,
        }
    }
}

struct SweepState {
    max_len: usize,
    normalize: bool,
    global: Mutex<Trie>,
    locals: Mutex<HashMap<ThreadId, Trie>>,
}

impl SweepState {
    fn sweep_text(&self, text: &str) {
        let normalized;
        let text = if self.normalize {
            normalized = text.nfkc().collect::<String>();
            &normalized
        } else {
            text
        };
        let cps: Vec<char> = text.chars().collect();

        let tid = thread::current().id();
        let mut trie = lock(&self.locals).remove(&tid).unwrap_or_default();
        for i in 0..cps.len() {
            let end = i.saturating_add(self.max_len).min(cps.len());
            trie.add_str(&cps[i..end]);
        }

        if trie.node_count() >= MERGE_SIZE {
            let mut global = lock(&self.global);
            global.merge(trie);
            debug!(nodes = global.node_count(), "folded worker trie into global");
        } else {
            lock(&self.locals).insert(tid, trie);
        }
    }
}

/// Sweep every text of every file into the candidate trie and flatten it.
/// Unreadable files and empty texts are reported and skipped; the pipeline
/// never fails.
pub fn extract_candidates<I>(
    files: I,
    options: &ExtractOptions,
    pool: &dyn Scheduler,
) -> Vec<Token>
where
    I: IntoIterator<Item = Result<CorpusFile, CorpusError>>,
{
    let state = Arc::new(SweepState {
        max_len: options.max_len as usize,
        normalize: options.normalize,
        global: Mutex::new(Trie::new()),
        locals: Mutex::new(HashMap::new()),
    });

    let mut window: VecDeque<_> = VecDeque::new();
    for file in files {
        let file = match file {
            Ok(file) => file,
            Err(err) => {
                warn!(%err, "skipping unreadable corpus file");
                continue;
            }
        };
        if window.len() >= DEP_WINDOW {
            let oldest = window.pop_front().expect("window is non-empty");
            pool.wait(&[oldest]);
        }
        debug!(path = %file.path.display(), entries = file.texts.len(), "sweeping file");
        let mut tasks = Vec::with_capacity(file.texts.len());
        for text in file.texts {
            if text.is_empty() {
                debug!(path = %file.path.display(), "skipping empty entry");
                continue;
            }
            let state = Arc::clone(&state);
            tasks.push(pool.enqueue(Box::new(move || state.sweep_text(&text))));
        }
        let path = file.path;
        window.push_back(pool.enqueue_after(
            Box::new(move || debug!(path = %path.display(), "file done")),
            &tasks,
        ));
    }
    let markers: Vec<_> = window.drain(..).collect();
    pool.wait(&markers);

    // Fold whatever the workers still hold.
    let mut global = std::mem::take(&mut *lock(&state.global));
    let locals = std::mem::take(&mut *lock(&state.locals));
    for (_, trie) in locals {
        global.merge(trie);
    }
    info!(
        nodes = global.node_count(),
        positions = global.total(),
        "extraction complete"
    );
    global.build_tokens()
}

/// Load the candidate array from the cache when possible, otherwise extract
/// it from the corpus and refresh the cache.
pub fn corpus_candidates(
    corpus: &Corpus,
    config: &TrainConfig,
    pool: &dyn Scheduler,
) -> Vec<Token> {
    let path = cache::cache_path(corpus.root(), config.file_limit, config.max_len);
    if !config.rebuild {
        match cache::read_tokens_file(&path) {
            Ok(tokens) => {
                info!(tokens = tokens.len(), path = %path.display(), "loaded candidate cache");
                return tokens;
            }
            Err(CacheError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), %err, "rejecting candidate cache"),
        }
    }

    let options = ExtractOptions {
        max_len: config.max_len,
        normalize: config.normalize,
    };
    let tokens = extract_candidates(corpus.files(config.file_limit), &options, pool);

    if let Err(err) = cache::write_tokens_file(&path, &tokens) {
        warn!(path = %path.display(), %err, "failed to write candidate cache");
    } else {
        info!(tokens = tokens.len(), path = %path.display(), "saved candidate cache");
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{InlinePool, TaskPool};
    use crate::token::TokenGraph;
    use std::path::PathBuf;

    fn file(texts: &[&str]) -> Result<CorpusFile, CorpusError> {
        Ok(CorpusFile {
            path: PathBuf::from("mem.json"),
            texts: texts.iter().map(|t| t.to_string()).collect(),
        })
    }

    fn graph_names(graph: &TokenGraph) -> Vec<String> {
        (0..graph.len() as u32).map(|i| graph.name(i)).collect()
    }

    #[test]
    fn extracts_bounded_candidates() {
        let options = ExtractOptions {
            max_len: 2,
            ..Default::default()
        };
        let tokens = extract_candidates([file(&["aa"])], &options, &InlinePool);
        let graph = TokenGraph::new(tokens);
        assert_eq!(graph_names(&graph), ["a", "aa"]);
        assert_eq!(graph.get(0).left_uses(), 2);
        assert_eq!(graph.get(1).left_uses(), 1);
    }

    #[test]
    fn empty_and_unreadable_inputs_are_skipped() {
        let options = ExtractOptions {
            max_len: 2,
            ..Default::default()
        };
        let inputs = vec![
            file(&["", "ab"]),
            Err(CorpusError::Format("bad file".into())),
        ];
        let tokens = extract_candidates(inputs, &options, &InlinePool);
        let graph = TokenGraph::new(tokens);
        assert_eq!(graph_names(&graph), ["a", "ab", "b"]);
    }

    #[test]
    fn threaded_and_inline_extraction_agree() {
        let texts: Vec<String> = (0..40)
            .map(|i| format!("the quick brown fox {i} jumps over the lazy dog"))
            .collect();
        let texts: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let options = ExtractOptions {
            max_len: 4,
            ..Default::default()
        };

        let inline = {
            let tokens = extract_candidates([file(&texts)], &options, &InlinePool);
            TokenGraph::new(tokens)
        };
        let threaded = {
            let pool = TaskPool::new(4);
            let files: Vec<_> = texts.chunks(7).map(|chunk| file(chunk)).collect();
            let tokens = extract_candidates(files, &options, &pool);
            TokenGraph::new(tokens)
        };

        assert_eq!(inline.len(), threaded.len());
        for i in 0..inline.len() as u32 {
            assert_eq!(inline.name(i), threaded.name(i));
            assert_eq!(inline.get(i).left_uses(), threaded.get(i).left_uses());
        }
    }

    #[test]
    fn nfkc_normalization_folds_width() {
        let options = ExtractOptions {
            max_len: 1,
            normalize: true,
        };
        // Full-width 'Ａ' normalizes to ASCII 'A'.
        let tokens = extract_candidates([file(&["\u{FF21}A"])], &options, &InlinePool);
        let graph = TokenGraph::new(tokens);
        assert_eq!(graph_names(&graph), ["A"]);
        assert_eq!(graph.get(0).left_uses(), 2);
    }
}
