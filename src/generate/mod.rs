//! Batch generation of circuit topologies.
//!
//! This module turns the single-candidate decoding loop into a batch
//! service: for every requested circuit type it keeps starting fresh
//! candidates until enough grammar-valid sequences are collected or the
//! retry budget is spent, and it accounts for every discarded candidate.
//!
//! # Workflow
//!
//! 1. Build the vocabulary and the sequence model (bigram over a corpus, or uniform)
//! 2. Resolve the requested circuit types
//! 3. Run [`generate_batch`] per type
//! 4. Write `Inference_<TAG>_masked/run<i>.txt` artifacts and a summary table
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use topogen::generate::{GenerateArgs, generate_main};
//!
//! let args = GenerateArgs {
//!     corpus: Some("dataset/".into()),
//!     circuit: vec!["Opamp".into(), "LDO".into()],
//!     count: 100,
//!     output: "generated/".into(),
//!     batch_size: 16,
//!     preset: "default".into(),
//!     max_length: None,
//!     window: None,
//!     temperature: Some(0.5),
//!     closure_bias: None,
//!     seed: 1337,
//!     max_attempts: None,
//!     report: None,
//! };
//!
//! generate_main(args)?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::*;
use clap::Parser;
use prettytable::*;
use tracing::{info, warn};

use crate::{
    AppError,
    decode::{DecodeConfig, LogitOracle},
    oracle::{BigramOracle, UniformOracle},
    sequence::{artifact_files, write_artifact},
    vocabulary::Vocabulary,
};

mod batch;

pub use batch::{
    BatchConfig, BatchError, BatchReport, DiscardReason, generate_all, generate_batch,
};

/// Command-line arguments for the generate command.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Directory of `.txt` artifacts to learn a bigram model from (default: uniform model)
    #[clap(long)]
    pub corpus: Option<PathBuf>,

    /// Circuit type to generate, by tag or bare name; repeatable (default: all types)
    #[clap(long, short)]
    pub circuit: Vec<String>,

    /// Sequences to generate per circuit type
    #[clap(long = "count", short = 'n', default_value_t = 100)]
    pub count: usize,

    /// Output directory receiving one `Inference_<TAG>_masked` directory per type
    #[clap(long, short)]
    pub output: PathBuf,

    /// Candidates decoded per wave
    #[clap(long, default_value_t = 16)]
    pub batch_size: usize,

    /// Decoding preset the following four options override
    #[clap(long, default_value = "default", value_parser = ["default", "strict", "permissive"])]
    pub preset: String,

    /// Token budget of a candidate
    #[clap(long)]
    pub max_length: Option<usize>,

    /// Context window handed to the model
    #[clap(long)]
    pub window: Option<usize>,

    /// Sampling temperature, 0 for greedy decoding
    #[clap(long)]
    pub temperature: Option<f32>,

    /// Logit bonus of the rail that closes a complete circuit
    #[clap(long)]
    pub closure_bias: Option<f32>,

    /// Base random seed
    #[clap(long, default_value_t = 1337)]
    pub seed: u64,

    /// Candidates allowed per circuit type (default: ten per requested sequence)
    #[clap(long)]
    pub max_attempts: Option<usize>,

    /// Report file for the summary table (default: stdout)
    #[clap(long, short)]
    pub report: Option<PathBuf>,
}

/// Directory name of the artifacts of one circuit type.
pub fn output_dir_name(circuit_type: &str) -> String {
    format!("Inference_{}_masked", circuit_type)
}

/// Write the accepted sequences of a report as `run<i>.txt`, numbered from 1.
pub fn write_batch(vocab: &Vocabulary, report: &BatchReport, output: &Path) -> Result<PathBuf> {
    let dir = output.join(output_dir_name(&report.circuit_type));
    fs::create_dir_all(&dir)?;
    for (i, tokens) in report.accepted.iter().enumerate() {
        write_artifact(vocab, &dir.join(format!("run{}.txt", i + 1)), tokens)?;
    }
    Ok(dir)
}

/// Print one row per circuit type with the accepted and discarded counts.
pub fn write_summary(reports: &BTreeMap<String, BatchReport>, writer: &mut dyn Write) -> Result<()> {
    let mut table = Table::new();
    let mut titles = row!["Circuit", "Requested", "Accepted", "Attempted"];
    for reason in DiscardReason::ALL {
        titles.add_cell(Cell::new(&reason.to_string()));
    }
    table.set_titles(titles);
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);

    for (tag, report) in reports.iter() {
        let mut row = row![tag, report.requested, report.accepted.len(), report.attempted];
        for reason in DiscardReason::ALL {
            let count = report.discarded.get(&reason).copied().unwrap_or(0);
            row.add_cell(Cell::new(&count.to_string()));
        }
        table.add_row(row);
    }

    table.print(writer)?;
    Ok(())
}

/// Generate topologies for the requested circuit types and write them out.
///
/// # Arguments
///
/// * `args` - Model, circuit types, counts, decoding and output settings
///
/// # Outputs
///
/// - **Artifacts**: `<output>/Inference_<TAG>_masked/run<i>.txt`
/// - **Report** (stdout or file): requested, accepted, attempted and discarded counts per type
pub fn generate_main(args: GenerateArgs) -> Result<()> {
    let GenerateArgs {
        corpus,
        circuit,
        count,
        output,
        batch_size,
        preset,
        max_length,
        window,
        temperature,
        closure_bias,
        seed,
        max_attempts,
        report,
    } = args;

    let vocab = Vocabulary::analog()?;

    let oracle: Box<dyn LogitOracle> = match corpus {
        Some(dir) => {
            if artifact_files(&dir)?.is_empty() {
                bail!(AppError::NoArtifacts(dir));
            }
            let (oracle, stats) = BigramOracle::from_corpus_dir(&vocab, &dir)?;
            if stats.sequences() == 0 {
                bail!(AppError::UnreadableCorpus {
                    dir,
                    files: stats.files
                });
            }
            if stats.skipped > 0 {
                warn!(
                    skipped = stats.skipped,
                    files = stats.files,
                    "some corpus files were not used"
                );
            }
            Box::new(oracle)
        }
        None => Box::new(UniformOracle::new(vocab.len())),
    };

    let circuit_types = if circuit.is_empty() {
        vocab.circuit_types().to_vec()
    } else {
        circuit
            .iter()
            .map(|name| vocab.circuit_type(name))
            .collect::<Result<Vec<_>, _>>()?
    };

    let base = DecodeConfig::preset(&preset)
        .ok_or_else(|| anyhow!("Unknown decoding preset {}", preset))?;
    let decode = DecodeConfig {
        max_length: max_length.unwrap_or(base.max_length),
        window: window.unwrap_or(base.window),
        temperature: temperature.unwrap_or(base.temperature),
        closure_bias: closure_bias.unwrap_or(base.closure_bias),
    };
    let batch = BatchConfig {
        batch_size,
        max_attempts,
        seed,
        parallel: true,
    };

    let reports = generate_all(&vocab, oracle.as_ref(), &circuit_types, count, &decode, &batch)?;

    for report in reports.values() {
        let dir = write_batch(&vocab, report, &output)?;
        info!(
            circuit_type = %report.circuit_type,
            accepted = report.accepted.len(),
            dir = %dir.display(),
            "artifacts written"
        );
    }

    let mut writer: Box<dyn Write> = match report {
        Some(path) => Box::new(fs::File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    write_summary(&reports, &mut writer)?;

    Ok(())
}
