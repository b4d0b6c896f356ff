//! Grammar-guided generation of analog circuit topologies
//!
//! This library generates, checks and converts analog circuit topologies
//! written as token sequences: depth-first walks over a bipartite graph of
//! devices and nets, where every hop names the device pins it connects.
//!
//! # Overview
//!
//! A sequence model proposes the next token; a grammar state machine masks
//! every token that would break the walk or the electrical rules tracked so
//! far (pin reuse, dangling nets, duplicate connections), and sampling only
//! ever picks from what is left. Candidates that cannot be closed are
//! discarded and counted, so a batch holds exactly the sequences that passed
//! the grammar.
//!
//! # Main Workflows
//!
//! 1. **Generation** ([`generate`]): batches of grammar-valid sequences per circuit type
//! 2. **Checking** ([`erc`]): offline rule audit of sequence artifacts
//! 3. **Graph conversion** ([`graph`]): DOT export and classifier input layout
//!
//! # Usage Example
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use topogen::sequence::{encode, parse_artifact};
//! use topogen::{BatchConfig, BigramOracle, DecodeConfig, Vocabulary, check_sequence, generate_batch};
//!
//! let vocab = Vocabulary::analog()?;
//! let mirror = encode(
//!     &vocab,
//!     &parse_artifact("CIRCUIT_Mirror->VSS->M_BS->NM1->M_DG->NET1->M_DG->NM2->M_BS->VSS->TRUNCATE"),
//! )?;
//! let oracle = BigramOracle::from_sequences(vocab.len(), &vec![mirror.clone(); 200]);
//! let decode = DecodeConfig { temperature: 0.0, ..DecodeConfig::default() };
//! let batch = BatchConfig { max_attempts: Some(4), seed: 7, ..BatchConfig::default() };
//!
//! let report = generate_batch(&vocab, &oracle, vocab.circuit_type("Mirror")?, 2, &decode, &batch)?;
//!
//! // Greedy decoding under the grammar reproduces the two-transistor mirror.
//! assert_eq!(report.accepted.len(), 2);
//! for tokens in report.accepted.iter() {
//!     assert!(check_sequence(&vocab, tokens).is_clean());
//!     assert_eq!(tokens, &mirror);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - **[`vocabulary`]**: Token registry, device families and token classification
//! - **[`grammar`]**: Connectivity tracker and the grammar state machine
//! - **[`decode`]**: Logit masking, sampling and the single-candidate decoding loop
//! - **[`oracle`]**: Built-in sequence models (uniform, bigram)
//! - **[`generate`]**: Batch orchestration and artifact output
//! - **[`sequence`]**: Artifact text and fixed-length array forms
//! - **[`erc`]**: Offline electrical rule check
//! - **[`graph`]**: Device/net graphs and the classifier audit

use clap::Parser;
use std::{error::Error, fmt, path::PathBuf};

pub mod decode;
pub mod erc;
pub mod generate;
pub mod grammar;
pub mod graph;
pub mod oracle;
pub mod sequence;
pub mod vocabulary;

pub use decode::{CandidateError, DecodeConfig, LogitOracle, OracleError, decode_candidate};
pub use erc::{CheckArgs, ErcReport, Violation, check_main, check_sequence};
pub use generate::{
    BatchConfig, BatchReport, DiscardReason, GenerateArgs, generate_all, generate_batch,
    generate_main,
};
pub use grammar::{GrammarMachine, GrammarState};
pub use graph::{GraphArgs, graph_main};
pub use oracle::{BigramOracle, CorpusStats, UniformOracle};
pub use vocabulary::{Symbol, TokenId, TokenKind, Vocabulary};

/// Application-level errors of the command-line tools.
#[derive(Debug, PartialEq, Eq)]
pub enum AppError {
    /// No `.txt` artifact was found where one was needed.
    NoArtifacts(PathBuf),
    /// Artifacts were found but none of them could be tokenized.
    UnreadableCorpus { dir: PathBuf, files: usize },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NoArtifacts(path) => write!(f, "No artifacts found in {}", path.display()),
            AppError::UnreadableCorpus { dir, files } => write!(
                f,
                "None of the {} artifacts in {} could be read",
                files,
                dir.display()
            ),
        }
    }
}

impl Error for AppError {}

/// Command-line arguments of the registry listing.
#[derive(Parser, Debug)]
pub struct VocabArgs {
    /// Only list tokens of this category (e.g. `device`, `edge-type`, `net`)
    #[clap(long, short)]
    pub category: Option<String>,
}

/// Print the token registry as an id, token and category table.
pub fn vocab_main(args: VocabArgs) -> anyhow::Result<()> {
    use prettytable::*;

    let vocab = Vocabulary::analog()?;

    let mut table = Table::new();
    table.set_titles(row!["Id", "Token", "Category"]);
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);

    for (id, token) in vocab.tokens().iter().enumerate() {
        let kind = vocab.kind(id as TokenId);
        if args
            .category
            .as_deref()
            .is_some_and(|category| category != kind.category())
        {
            continue;
        }
        table.add_row(row![id, token, kind]);
    }

    let mut stdout = std::io::stdout();
    table.print(&mut stdout)?;
    Ok(())
}

/// Command-line interface arguments for the topology tools.
///
/// This enum defines the main commands available:
/// - `Generate`: Generate grammar-valid topologies per circuit type
/// - `Check`: Audit artifacts against the electrical rules
/// - `Graph`: Convert an artifact to a DOT graph
/// - `Vocab`: List the token registry
#[derive(Debug, Parser)]
#[clap(
    name = "topogen",
    about = "Grammar-guided analog circuit topology generation tools"
)]
pub enum CLIArguments {
    /// Generate topologies for one or more circuit types.
    Generate(GenerateArgs),
    /// Check artifacts for pattern, pin, net, duplicate and termination violations.
    Check(CheckArgs),
    /// Convert one artifact into a Graphviz DOT graph.
    Graph(GraphArgs),
    /// Print the token registry.
    Vocab(VocabArgs),
}
