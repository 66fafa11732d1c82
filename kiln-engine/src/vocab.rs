//! Vocabulary file and greedy forward tokenizer.
//!
//! The final ordered token list is persisted as `{version, tokens}` JSON.
//! When loaded, ids 0 and 1 are the `<START>`/`<END>` sentinels and the
//! remaining ids follow the stored order. Tokenization lowercases the
//! input and matches greedily, longest first; a code point covered by no
//! token maps to the unknown sentinel.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::FORMAT_VERSION;

pub const START_TOKEN: &str = "<START>";
pub const END_TOKEN: &str = "<END>";
pub const UNKNOWN_TOKEN: &str = "<UNKNOWN>";

/// Id used for code points outside the vocabulary.
pub const UNKNOWN_ID: usize = usize::MAX;

#[derive(Debug, thiserror::Error)]
pub enum VocabError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON parse error")]
    Json(#[from] serde_json::Error),

    #[error("invalid vocabulary file: {0}")]
    Format(String),
}

type Result<T> = std::result::Result<T, VocabError>;

#[derive(Serialize, Deserialize)]
struct VocabDoc {
    version: String,
    tokens: Vec<String>,
}

/// An applied vocabulary: token strings, their ids, and the longest token
/// length for the greedy matcher.
#[derive(Debug)]
pub struct Vocab {
    tokens: Vec<String>,
    ids: HashMap<String, usize>,
    max_len: usize,
}

impl Vocab {
    /// Build from an ordered solution (multi-character tokens first, then
    /// roots). Sentinels are prepended as ids 0 and 1.
    pub fn new(solution: Vec<String>) -> Self {
        let mut tokens = Vec::with_capacity(solution.len() + 2);
        tokens.push(START_TOKEN.to_string());
        tokens.push(END_TOKEN.to_string());
        tokens.extend(solution);

        let mut ids = HashMap::with_capacity(tokens.len());
        let mut max_len = 0;
        for (id, token) in tokens.iter().enumerate().skip(2) {
            max_len = max_len.max(token.chars().count());
            ids.entry(token.clone()).or_insert(id);
        }
        Self {
            tokens,
            ids,
            max_len,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let doc = VocabDoc {
            version: FORMAT_VERSION.to_string(),
            tokens: self.tokens[2..].to_vec(),
        };
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, &doc)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let doc: VocabDoc = serde_json::from_reader(BufReader::new(file))?;
        if doc.version != FORMAT_VERSION {
            return Err(VocabError::Format(format!(
                "version {} (expected {FORMAT_VERSION})",
                doc.version
            )));
        }
        Ok(Self::new(doc.tokens))
    }

    /// Number of tokens, sentinels included.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.len() <= 2
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.ids.get(token).copied()
    }

    pub fn token(&self, id: usize) -> &str {
        self.tokens.get(id).map_or(UNKNOWN_TOKEN, |t| t.as_str())
    }

    /// Encode `text` by greedy longest match, wrapped in sentinels. The
    /// input is lowercased before matching.
    pub fn tokenize(&self, text: &str) -> Vec<usize> {
        let text = text.to_lowercase();
        let cps: Vec<char> = text.chars().collect();
        let mut ids = vec![0];
        let mut pos = 0;
        let mut buf = String::new();
        while pos < cps.len() {
            let top = self.max_len.min(cps.len() - pos);
            let mut matched = false;
            for len in (1..=top).rev() {
                buf.clear();
                buf.extend(&cps[pos..pos + len]);
                if let Some(&id) = self.ids.get(buf.as_str()) {
                    ids.push(id);
                    pos += len;
                    matched = true;
                    break;
                }
            }
            if !matched {
                ids.push(UNKNOWN_ID);
                pos += 1;
            }
        }
        ids.push(1);
        ids
    }

    pub fn detokenize(&self, ids: &[usize]) -> String {
        ids.iter().map(|&id| self.token(id)).collect()
    }

    /// Human-readable rendering with `|` between tokens.
    pub fn prettify(&self, ids: &[usize]) -> String {
        let parts: Vec<&str> = ids.iter().map(|&id| self.token(id)).collect();
        parts.join("|")
    }

    /// Code points per emitted token, sentinels excluded.
    pub fn compression_factor(&self, text: &str) -> f64 {
        let tokens = self.tokenize(text).len() - 2;
        if tokens == 0 {
            return 0.0;
        }
        text.chars().count() as f64 / tokens as f64
    }
}
