//! Training configuration.
//!
//! All knobs of the extraction/selection pipeline, with defaults matching
//! the standalone trainer. Loadable from TOML; binaries overlay their
//! command-line flags on top.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Maximum candidate length in code points.
    pub max_len: u8,
    /// Cap on the number of corpus files processed (`None` = all).
    pub file_limit: Option<usize>,
    /// Target vocabulary size P.
    pub pref_token_count: usize,
    /// Candidates toggled per worker task (`None` = hardware threads).
    pub batch_size: Option<usize>,
    /// Annealing passes to run (`None` = until a control signal arrives).
    pub pass_count: Option<usize>,
    /// Worker threads (`None` = hardware threads).
    pub threads: Option<usize>,
    /// Ignore the candidate cache and re-extract.
    pub rebuild: bool,
    /// NFKC-normalize corpus text before extraction.
    pub normalize: bool,
    /// Seed for the selector's random streams (`None` = OS entropy).
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            max_len: 255,
            file_limit: None,
            pref_token_count: 30_000,
            batch_size: None,
            pass_count: None,
            threads: None,
            rebuild: false,
            normalize: false,
            seed: None,
        }
    }
}

impl TrainConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"pref_token_count = 500\nmax_len = 8\n").unwrap();
        f.flush().unwrap();

        let config = TrainConfig::from_toml_file(f.path()).unwrap();
        assert_eq!(config.pref_token_count, 500);
        assert_eq!(config.max_len, 8);
        assert_eq!(config.file_limit, None);
        assert!(!config.rebuild);
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"pref_token_count = \"many\"\n").unwrap();
        f.flush().unwrap();
        assert!(TrainConfig::from_toml_file(f.path()).is_err());
    }
}
