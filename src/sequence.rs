//! Text and fixed-length forms of token sequences.
//!
//! Two persisted forms exist:
//!
//! - **Artifacts**: the content of a sequence, tag first and the first
//!   terminator last, joined with `->` into one line of text.
//! - **Fixed-length arrays**: the content left-justified in an array of
//!   `budget` token strings, the tail padded with the terminator.
//!
//! Reading is lenient: whitespace around delimiters, a trailing `->` and
//! padding terminators after the first one are all accepted.

use std::{
    error::Error,
    fmt, fs,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;

use crate::vocabulary::{Symbol, TokenId, UnknownTokenError, Vocabulary};

/// Delimiter between tokens in an artifact.
pub const DELIMITER: &str = "->";

/// Token budget of the fixed-length array form.
pub const FIXED_LENGTH: usize = 1025;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    UnknownToken(UnknownTokenError),
    /// The content does not fit the fixed-length budget.
    TooLong { length: usize, budget: usize },
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceError::UnknownToken(err) => write!(f, "{}", err),
            SequenceError::TooLong { length, budget } => write!(
                f,
                "Sequence of {} tokens does not fit a budget of {}",
                length, budget
            ),
        }
    }
}

impl Error for SequenceError {}

impl From<UnknownTokenError> for SequenceError {
    fn from(err: UnknownTokenError) -> Self {
        SequenceError::UnknownToken(err)
    }
}

/// The content of `ids`: everything up to and including the first terminator.
pub fn strip_padding<'a>(vocab: &Vocabulary, ids: &'a [TokenId]) -> &'a [TokenId] {
    match ids.iter().position(|&id| id == vocab.terminator()) {
        Some(end) => &ids[..=end],
        None => ids,
    }
}

/// Join the content of `ids` into an artifact line.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use topogen::sequence::{parse_artifact, to_artifact, encode};
/// use topogen::vocabulary::Vocabulary;
///
/// let vocab = Vocabulary::analog()?;
/// let ids = encode(&vocab, &parse_artifact("VSS -> M_S -> NM1 ->"))?;
/// assert_eq!(to_artifact(&vocab, &ids)?, "VSS->M_S->NM1");
/// # Ok(())
/// # }
/// ```
pub fn to_artifact(vocab: &Vocabulary, ids: &[TokenId]) -> Result<String, UnknownTokenError> {
    let tokens = strip_padding(vocab, ids)
        .iter()
        .map(|&id| vocab.token_of(id).map(|t| t.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tokens.join(DELIMITER))
}

/// Split an artifact line into token strings.
pub fn parse_artifact(text: &str) -> Vec<Symbol> {
    lazy_static! {
        static ref SPLIT: Regex = Regex::new(r"\s*->\s*").unwrap();
    }

    SPLIT
        .split(text.trim())
        .filter(|token| !token.is_empty())
        .map(Symbol::from)
        .collect()
}

/// Map token strings to ids.
pub fn encode<S: Deref<Target = str>>(
    vocab: &Vocabulary,
    tokens: &[S],
) -> Result<Vec<TokenId>, UnknownTokenError> {
    tokens.iter().map(|t| vocab.id_of(t)).collect()
}

/// Map ids to token strings.
pub fn decode(vocab: &Vocabulary, ids: &[TokenId]) -> Result<Vec<Symbol>, UnknownTokenError> {
    ids.iter().map(|&id| vocab.token_of(id).cloned()).collect()
}

/// Left-justify the content of `ids` in an array of `budget` token strings.
pub fn to_fixed_array(
    vocab: &Vocabulary,
    ids: &[TokenId],
    budget: usize,
) -> Result<Vec<Symbol>, SequenceError> {
    let content = strip_padding(vocab, ids);
    if content.len() > budget {
        return Err(SequenceError::TooLong {
            length: content.len(),
            budget,
        });
    }
    let mut tokens = decode(vocab, content)?;
    let padding = vocab.token_of(vocab.terminator())?.clone();
    tokens.resize(budget, padding);
    Ok(tokens)
}

/// Read a token sequence back from a fixed-length array.
pub fn from_fixed_array<S: Deref<Target = str>>(
    vocab: &Vocabulary,
    tokens: &[S],
) -> Result<Vec<TokenId>, UnknownTokenError> {
    let ids = encode(vocab, tokens)?;
    Ok(strip_padding(vocab, &ids).to_vec())
}

/// Read one artifact file.
pub fn read_artifact(vocab: &Vocabulary, path: &Path) -> Result<Vec<TokenId>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let ids = encode(vocab, &parse_artifact(&text))
        .with_context(|| format!("Failed to tokenize {}", path.display()))?;
    Ok(strip_padding(vocab, &ids).to_vec())
}

/// Write one artifact file.
pub fn write_artifact(vocab: &Vocabulary, path: &Path, ids: &[TokenId]) -> Result<()> {
    fs::write(path, to_artifact(vocab, ids)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// The `.txt` files under `path`, sorted; `path` itself if it is a file.
pub fn artifact_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let entry = entry?.path();
            if entry.is_dir() {
                pending.push(entry);
            } else if entry.extension().is_some_and(|ext| ext == "txt") {
                files.push(entry);
            }
        }
    }
    files.sort();
    Ok(files)
}
