//! Built-in sequence models.
//!
//! The neural decoder that normally sits behind [`LogitOracle`] is an
//! external collaborator. These two oracles let the crate run end to end
//! without it:
//!
//! - [`UniformOracle`] scores every token equally, so the grammar alone
//!   shapes the walk.
//! - [`BigramOracle`] learns next-token log frequencies from a corpus of
//!   existing topology artifacts.

use std::path::Path;

use anyhow::Result;
use itertools::Itertools;
use tracing::{info, warn};

use crate::{
    decode::{LogitOracle, OracleError},
    sequence,
    vocabulary::{TokenId, Vocabulary},
};

/// Flat logits over the whole vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformOracle {
    vocab_size: usize,
}

impl UniformOracle {
    pub fn new(vocab_size: usize) -> Self {
        Self { vocab_size }
    }
}

impl LogitOracle for UniformOracle {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn next_token_logits(&self, _prefix: &[TokenId], _window: usize) -> Result<Vec<f32>, OracleError> {
        Ok(vec![0.0; self.vocab_size])
    }
}

/// Files seen while loading a corpus directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub files: usize,
    /// Files that could not be read or held unknown tokens.
    pub skipped: usize,
}

impl CorpusStats {
    pub fn sequences(&self) -> usize {
        self.files - self.skipped
    }
}

/// Add-one smoothed bigram model: the logit of `b` after `a` is
/// `ln((count(a, b) + 1) / (count(a) + V))`.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use topogen::decode::LogitOracle;
/// use topogen::oracle::BigramOracle;
/// use topogen::vocabulary::Vocabulary;
///
/// let vocab = Vocabulary::analog()?;
/// let walk: Vec<_> = ["VSS", "M_S", "NM1"]
///     .iter()
///     .map(|t| vocab.id_of(t))
///     .collect::<Result<_, _>>()?;
/// let oracle = BigramOracle::from_sequences(vocab.len(), &[walk.clone()]);
///
/// let logits = oracle.next_token_logits(&walk[..1], 1024)?;
/// assert!(logits[walk[1] as usize] > logits[walk[2] as usize]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BigramOracle {
    vocab_size: usize,
    /// Row-major `vocab_size × vocab_size` table of log probabilities.
    table: Vec<f32>,
}

impl BigramOracle {
    /// Count bigrams over tokenized sequences.
    pub fn from_sequences(vocab_size: usize, sequences: &[Vec<TokenId>]) -> Self {
        let mut counts = vec![0u32; vocab_size * vocab_size];
        for (a, b) in sequences.iter().flat_map(|s| s.iter().copied().tuple_windows()) {
            let (a, b) = (a as usize, b as usize);
            if a < vocab_size && b < vocab_size {
                counts[a * vocab_size + b] += 1;
            }
        }

        let mut table = vec![0.0; vocab_size * vocab_size];
        for (row, out) in counts
            .chunks(vocab_size.max(1))
            .zip(table.chunks_mut(vocab_size.max(1)))
        {
            let total: u32 = row.iter().sum();
            let denominator = (total as f32 + vocab_size as f32).ln();
            for (count, logit) in row.iter().zip(out.iter_mut()) {
                *logit = (*count as f32 + 1.0).ln() - denominator;
            }
        }

        Self { vocab_size, table }
    }

    /// Learn from every `.txt` artifact under `dir`.
    ///
    /// Files that cannot be read or tokenized are logged and skipped; the
    /// returned [`CorpusStats`] says how many.
    pub fn from_corpus_dir(vocab: &Vocabulary, dir: &Path) -> Result<(Self, CorpusStats)> {
        let files = sequence::artifact_files(dir)?;
        let mut stats = CorpusStats {
            files: files.len(),
            skipped: 0,
        };

        let mut sequences: Vec<Vec<TokenId>> = Vec::with_capacity(files.len());
        for path in files.iter() {
            match sequence::read_artifact(vocab, path) {
                Ok(ids) => sequences.push(ids),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "corpus file skipped");
                    stats.skipped += 1;
                }
            }
        }

        info!(
            files = stats.files,
            sequences = sequences.len(),
            skipped = stats.skipped,
            "bigram corpus loaded"
        );
        Ok((Self::from_sequences(vocab.len(), &sequences), stats))
    }
}

impl LogitOracle for BigramOracle {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn next_token_logits(&self, prefix: &[TokenId], window: usize) -> Result<Vec<f32>, OracleError> {
        let context = &prefix[prefix.len().saturating_sub(window)..];
        match context.last() {
            Some(&last) if (last as usize) < self.vocab_size => {
                let start = last as usize * self.vocab_size;
                Ok(self.table[start..start + self.vocab_size].to_vec())
            }
            Some(&last) => Err(OracleError::Inference(format!(
                "token #{} outside the model vocabulary",
                last
            ))),
            None => Ok(vec![0.0; self.vocab_size]),
        }
    }
}
