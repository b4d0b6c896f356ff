use std::{collections::BTreeMap, error::Error, fmt};

use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use tracing::{debug, info, info_span};

use crate::{
    decode::{CandidateError, DecodeConfig, LogitOracle, OracleError, decode_candidate},
    vocabulary::{Symbol, TokenId, TokenKind, Vocabulary},
};

/// Parameters of the batch orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Candidates decoded per wave.
    pub batch_size: usize,
    /// Total candidates allowed per circuit type; ten per requested sequence if unset.
    pub max_attempts: Option<usize>,
    /// Base seed; every candidate derives its own generator from it.
    pub seed: u64,
    /// Decode the candidates of a wave on the rayon pool.
    pub parallel: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_attempts: None,
            seed: 1337,
            parallel: true,
        }
    }
}

impl BatchConfig {
    /// Retry budget for `count` requested sequences.
    pub fn attempt_budget(&self, count: usize) -> usize {
        self.max_attempts.unwrap_or(count.saturating_mul(10))
    }
}

/// Why a candidate was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiscardReason {
    GrammarDeadEnd,
    Truncated,
    PinAlreadyUsed,
    IllegalSample,
    OracleFailure,
}

impl DiscardReason {
    pub const ALL: [DiscardReason; 5] = [
        DiscardReason::GrammarDeadEnd,
        DiscardReason::Truncated,
        DiscardReason::PinAlreadyUsed,
        DiscardReason::IllegalSample,
        DiscardReason::OracleFailure,
    ];
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscardReason::GrammarDeadEnd => "dead end",
            DiscardReason::Truncated => "truncated",
            DiscardReason::PinAlreadyUsed => "pin reuse",
            DiscardReason::IllegalSample => "illegal sample",
            DiscardReason::OracleFailure => "oracle failure",
        };
        write!(f, "{}", name)
    }
}

/// Errors that stop a whole batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchError {
    NotACircuitType(TokenId),
    /// The tag and ground rail prefix is refused by the grammar.
    InvalidPrefix(CandidateError),
    OracleUnavailable(String),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::NotACircuitType(id) => write!(f, "Token #{} is not a circuit type", id),
            BatchError::InvalidPrefix(err) => write!(f, "{}", err),
            BatchError::OracleUnavailable(msg) => write!(f, "Sequence model unavailable: {}", msg),
        }
    }
}

impl Error for BatchError {}

/// Sort a candidate outcome into a discard reason or a batch-level failure.
fn classify(err: CandidateError) -> Result<DiscardReason, BatchError> {
    match err {
        CandidateError::GrammarDeadEnd { .. } => Ok(DiscardReason::GrammarDeadEnd),
        CandidateError::Truncated { .. } => Ok(DiscardReason::Truncated),
        CandidateError::PinAlreadyUsed(_) => Ok(DiscardReason::PinAlreadyUsed),
        CandidateError::IllegalSample { .. } => Ok(DiscardReason::IllegalSample),
        CandidateError::Oracle(OracleError::Unavailable(msg)) => {
            Err(BatchError::OracleUnavailable(msg))
        }
        CandidateError::Oracle(_) => Ok(DiscardReason::OracleFailure),
        err @ CandidateError::InvalidPrefix(_) => Err(BatchError::InvalidPrefix(err)),
    }
}

/// Outcome of a batch for one circuit type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub circuit_type: Symbol,
    pub requested: usize,
    /// Accepted sequences, each ending with the terminator.
    pub accepted: Vec<Vec<TokenId>>,
    /// Candidates started, accepted or not.
    pub attempted: usize,
    pub discarded: BTreeMap<DiscardReason, usize>,
}

impl BatchReport {
    pub fn discarded_total(&self) -> usize {
        self.discarded.values().sum()
    }

    /// Whether the requested count was reached.
    pub fn is_complete(&self) -> bool {
        self.accepted.len() >= self.requested
    }
}

fn candidate_seed(base: u64, circuit_type: TokenId, attempt: usize) -> u64 {
    base.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ ((circuit_type as u64) << 40)
        ^ attempt as u64
}

/// Generate up to `count` grammar-valid sequences of one circuit type.
///
/// Candidates are decoded in waves of at most `batch.batch_size`, never
/// more than are still missing, until `count` sequences are accepted or the
/// attempt budget is spent. Each candidate starts from the tag and the
/// ground rail with its own tracker, grammar and random generator, seeded
/// from `batch.seed` and its attempt number, so results do not depend on
/// thread scheduling.
///
/// # Arguments
///
/// * `vocab` - Token registry
/// * `oracle` - Sequence model
/// * `circuit_type` - Id of the requested circuit-type tag
/// * `count` - Number of sequences wanted
/// * `decode` - Per-candidate decoding parameters
/// * `batch` - Wave size, retry budget, seed and parallelism
///
/// # Returns
///
/// A [`BatchReport`] that may hold fewer than `count` sequences when the
/// budget runs out. Only an unavailable oracle or an unusable prefix is an error.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use topogen::decode::DecodeConfig;
/// use topogen::generate::{BatchConfig, generate_batch};
/// use topogen::oracle::UniformOracle;
/// use topogen::vocabulary::Vocabulary;
///
/// let vocab = Vocabulary::analog()?;
/// let oracle = UniformOracle::new(vocab.len());
/// let batch = BatchConfig { max_attempts: Some(8), ..BatchConfig::default() };
/// let report = generate_batch(
///     &vocab,
///     &oracle,
///     vocab.circuit_type("Opamp")?,
///     2,
///     &DecodeConfig::default(),
///     &batch,
/// )?;
/// assert_eq!(report.attempted, report.accepted.len() + report.discarded_total());
/// # Ok(())
/// # }
/// ```
pub fn generate_batch(
    vocab: &Vocabulary,
    oracle: &dyn LogitOracle,
    circuit_type: TokenId,
    count: usize,
    decode: &DecodeConfig,
    batch: &BatchConfig,
) -> Result<BatchReport, BatchError> {
    if vocab.try_kind(circuit_type) != Some(TokenKind::CircuitType) {
        return Err(BatchError::NotACircuitType(circuit_type));
    }
    let tag = vocab
        .token_of(circuit_type)
        .cloned()
        .map_err(|_| BatchError::NotACircuitType(circuit_type))?;

    let span = info_span!("batch", circuit_type = %tag, count);
    let _guard = span.enter();

    let prefix = [circuit_type, vocab.ground()];
    let banned: Vec<TokenId> = vocab
        .circuit_types()
        .iter()
        .copied()
        .filter(|&t| t != circuit_type)
        .collect();
    let budget = batch.attempt_budget(count);
    let wave_size = batch.batch_size.max(1);

    let run = |attempt: usize| {
        let mut rng = StdRng::seed_from_u64(candidate_seed(batch.seed, circuit_type, attempt));
        decode_candidate(vocab, oracle, &prefix, &banned, decode, &mut rng)
    };

    let mut report = BatchReport {
        circuit_type: tag,
        requested: count,
        accepted: Vec::new(),
        attempted: 0,
        discarded: BTreeMap::new(),
    };

    while report.accepted.len() < count && report.attempted < budget {
        let wave = wave_size
            .min(count - report.accepted.len())
            .min(budget - report.attempted);
        let attempts = report.attempted..report.attempted + wave;

        let outcomes: Vec<_> = if batch.parallel {
            attempts.into_par_iter().map(run).collect()
        } else {
            attempts.map(run).collect()
        };
        report.attempted += wave;

        for outcome in outcomes {
            match outcome {
                Ok(tokens) => report.accepted.push(tokens),
                Err(err) => {
                    debug!(%err, "candidate discarded");
                    *report.discarded.entry(classify(err)?).or_default() += 1;
                }
            }
        }
    }

    info!(
        accepted = report.accepted.len(),
        attempted = report.attempted,
        discarded = report.discarded_total(),
        "batch finished"
    );

    Ok(report)
}

/// Run [`generate_batch`] for several circuit types, keyed by tag.
pub fn generate_all(
    vocab: &Vocabulary,
    oracle: &dyn LogitOracle,
    circuit_types: &[TokenId],
    count: usize,
    decode: &DecodeConfig,
    batch: &BatchConfig,
) -> Result<BTreeMap<String, BatchReport>, BatchError> {
    let mut reports = BTreeMap::new();
    for &circuit_type in circuit_types {
        let report = generate_batch(vocab, oracle, circuit_type, count, decode, batch)?;
        reports.insert(report.circuit_type.to_string(), report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        erc::check_sequence,
        oracle::UniformOracle,
        vocabulary::{DeviceFamily, VocabularyBuilder},
    };

    fn resistors(shorted: bool, count: usize) -> Vocabulary {
        VocabularyBuilder::new()
            .family(DeviceFamily::new("Resistor", "R", "NP", shorted))
            .devices("Resistor", "R", count)
            .rails(["VSS", "VDD"])
            .circuit_types(["Filter", "Mixer"])
            .nets("NET", 3)
            .ports(["VOUT"])
            .build()
            .unwrap()
    }

    struct Unreachable(usize);

    impl LogitOracle for Unreachable {
        fn vocab_size(&self) -> usize {
            self.0
        }

        fn next_token_logits(&self, _: &[TokenId], _: usize) -> Result<Vec<f32>, OracleError> {
            Err(OracleError::Unavailable("connection refused".into()))
        }
    }

    struct Flaky(usize);

    impl LogitOracle for Flaky {
        fn vocab_size(&self) -> usize {
            self.0
        }

        fn next_token_logits(&self, prefix: &[TokenId], _: usize) -> Result<Vec<f32>, OracleError> {
            if prefix.len() > 3 {
                Err(OracleError::Inference("out of memory".into()))
            } else {
                Ok(vec![0.0; self.0])
            }
        }
    }

    #[test]
    fn test_zero_count_is_empty_success() {
        let vocab = resistors(true, 1);
        let oracle = UniformOracle::new(vocab.len());
        let tag = vocab.circuit_type("Filter").unwrap();
        let report =
            generate_batch(&vocab, &oracle, tag, 0, &DecodeConfig::default(), &BatchConfig::default())
                .unwrap();
        assert!(report.accepted.is_empty());
        assert_eq!(report.attempted, 0);
        assert!(report.is_complete());
    }

    /// A single shorted resistor with nowhere to land but the rail always
    /// closes, so every candidate is accepted.
    #[test]
    fn test_exact_count_without_surplus() {
        let vocab = VocabularyBuilder::new()
            .family(DeviceFamily::new("Resistor", "R", "NP", true))
            .devices("Resistor", "R", 1)
            .rails(["VSS"])
            .circuit_types(["Filter"])
            .build()
            .unwrap();
        let oracle = UniformOracle::new(vocab.len());
        let tag = vocab.circuit_type("Filter").unwrap();
        let batch = BatchConfig {
            batch_size: 4,
            ..BatchConfig::default()
        };
        let report =
            generate_batch(&vocab, &oracle, tag, 10, &DecodeConfig::default(), &batch).unwrap();
        assert_eq!(report.accepted.len(), 10);
        assert_eq!(report.attempted, 10);
        assert!(report.discarded.is_empty());
        for tokens in report.accepted.iter() {
            assert_eq!(tokens[0], tag);
            assert_eq!(tokens.len(), 7);
        }
    }

    /// When every candidate dead-ends the report says so instead of padding.
    #[test]
    fn test_restrictive_budget_reports_exact_counts() {
        let vocab = VocabularyBuilder::new()
            .family(DeviceFamily::new("Resistor", "R", "NP", false))
            .devices("Resistor", "R", 1)
            .rails(["VSS"])
            .circuit_types(["Filter"])
            .nets("NET", 1)
            .build()
            .unwrap();
        let oracle = UniformOracle::new(vocab.len());
        let tag = vocab.circuit_type("Filter").unwrap();
        let batch = BatchConfig {
            max_attempts: Some(300),
            ..BatchConfig::default()
        };
        let report =
            generate_batch(&vocab, &oracle, tag, 1000, &DecodeConfig::default(), &batch).unwrap();
        assert!(report.accepted.is_empty());
        assert!(!report.is_complete());
        assert_eq!(report.attempted, 300);
        assert_eq!(report.discarded.get(&DiscardReason::GrammarDeadEnd), Some(&300));
    }

    /// Accepted output passes the offline rule check; counts add up.
    #[test]
    fn test_accepted_sequences_pass_erc() {
        let vocab = resistors(false, 3);
        let oracle = UniformOracle::new(vocab.len());
        let tag = vocab.circuit_type("Mixer").unwrap();
        let decode = DecodeConfig {
            max_length: 40,
            ..DecodeConfig::default()
        };
        let report = generate_batch(&vocab, &oracle, tag, 50, &decode, &BatchConfig::default())
            .unwrap();

        assert_eq!(
            report.attempted,
            report.accepted.len() + report.discarded_total()
        );
        assert!(report.accepted.len() <= 50);
        let mixer = vocab.circuit_type("Mixer").unwrap();
        let filter = vocab.circuit_type("Filter").unwrap();
        for tokens in report.accepted.iter() {
            assert!(check_sequence(&vocab, tokens).is_clean(), "{:?}", tokens);
            assert_eq!(tokens[0], mixer);
            assert!(!tokens.contains(&filter));
        }
    }

    /// The same seed gives the same batch with or without the thread pool.
    #[test]
    fn test_parallel_matches_sequential() {
        let vocab = resistors(false, 3);
        let oracle = UniformOracle::new(vocab.len());
        let tag = vocab.circuit_type("Filter").unwrap();
        let decode = DecodeConfig {
            max_length: 40,
            ..DecodeConfig::default()
        };
        let parallel = BatchConfig::default();
        let sequential = BatchConfig {
            parallel: false,
            ..BatchConfig::default()
        };
        assert_eq!(
            generate_batch(&vocab, &oracle, tag, 20, &decode, &parallel).unwrap(),
            generate_batch(&vocab, &oracle, tag, 20, &decode, &sequential).unwrap()
        );
    }

    #[test]
    fn test_oracle_errors() {
        let vocab = resistors(true, 2);
        let tag = vocab.circuit_type("Filter").unwrap();
        let config = DecodeConfig::default();
        let batch = BatchConfig {
            max_attempts: Some(5),
            ..BatchConfig::default()
        };

        assert_eq!(
            generate_batch(&vocab, &Unreachable(vocab.len()), tag, 3, &config, &batch),
            Err(BatchError::OracleUnavailable("connection refused".into()))
        );

        let report = generate_batch(&vocab, &Flaky(vocab.len()), tag, 3, &config, &batch).unwrap();
        assert!(report.accepted.is_empty());
        assert_eq!(report.discarded.get(&DiscardReason::OracleFailure), Some(&5));
    }

    #[test]
    fn test_rejects_non_tags() {
        let vocab = resistors(true, 1);
        let oracle = UniformOracle::new(vocab.len());
        let vss = vocab.id_of("VSS").unwrap();
        assert_eq!(
            generate_batch(&vocab, &oracle, vss, 1, &DecodeConfig::default(), &BatchConfig::default()),
            Err(BatchError::NotACircuitType(vss))
        );
    }

    #[test]
    fn test_generate_all_groups_by_tag() {
        let vocab = resistors(true, 1);
        let oracle = UniformOracle::new(vocab.len());
        let tags = vocab.circuit_types().to_vec();
        let reports = generate_all(
            &vocab,
            &oracle,
            &tags,
            3,
            &DecodeConfig::default(),
            &BatchConfig::default(),
        )
        .unwrap();
        assert_eq!(
            reports.keys().cloned().collect::<Vec<_>>(),
            vec!["CIRCUIT_Filter", "CIRCUIT_Mixer"]
        );
        for (tag, report) in reports.iter() {
            let id = vocab.id_of(tag).unwrap();
            assert!(report.accepted.iter().all(|t| t[0] == id));
        }
    }
}
