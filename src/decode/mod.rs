//! Masked autoregressive decoding of one candidate sequence.
//!
//! The decoding loop alternates between the [`GrammarMachine`] and a
//! [`LogitOracle`], the sequence model that scores every vocabulary entry as
//! the next token of a prefix:
//!
//! 1. ask the grammar for the legal next tokens
//! 2. ask the oracle for logits conditioned on the prefix
//! 3. mask illegal and banned tokens to negative infinity, and raise the
//!    logit of the rail that would close a complete circuit
//! 4. sample, then feed the token back to the grammar
//!
//! until the terminator is accepted or the length budget runs out. The
//! [`ConstrainedDecoder`] exposes the same steps to callers that drive their
//! own model, and [`decode_candidate`] runs the whole loop.
//!
//! # Example
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use rand::{SeedableRng, rngs::StdRng};
//! use topogen::decode::{DecodeConfig, decode_candidate};
//! use topogen::oracle::UniformOracle;
//! use topogen::vocabulary::Vocabulary;
//!
//! let vocab = Vocabulary::analog()?;
//! let oracle = UniformOracle::new(vocab.len());
//! let prefix = [vocab.circuit_type("Opamp")?, vocab.ground()];
//! let mut rng = StdRng::seed_from_u64(1);
//!
//! match decode_candidate(&vocab, &oracle, &prefix, &[], &DecodeConfig::default(), &mut rng) {
//!     Ok(tokens) => assert_eq!(tokens.last(), Some(&vocab.terminator())),
//!     Err(err) => println!("candidate discarded: {}", err),
//! }
//! # Ok(())
//! # }
//! ```

use std::{error::Error, fmt};

use rand::Rng;
use tracing::{debug, trace};

use crate::{
    grammar::{ConnectivityError, GrammarError, GrammarMachine, GrammarState},
    vocabulary::{TokenId, Vocabulary},
};

mod mask;
mod sampler;

pub use mask::LogitMask;
pub use sampler::sample;

/// Failures of the sequence model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The model cannot be reached at all; aborts the whole batch.
    Unavailable(String),
    /// One inference call failed; only the current candidate is lost.
    Inference(String),
    /// The logit vector does not cover the vocabulary.
    Shape { expected: usize, actual: usize },
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::Unavailable(msg) => write!(f, "Sequence model unavailable: {}", msg),
            OracleError::Inference(msg) => write!(f, "Inference failed: {}", msg),
            OracleError::Shape { expected, actual } => write!(
                f,
                "Oracle returned {} logits for a vocabulary of {}",
                actual, expected
            ),
        }
    }
}

impl Error for OracleError {}

/// A sequence model scoring next tokens.
///
/// Implementations must be shareable between the worker threads of a batch.
pub trait LogitOracle: Sync {
    /// Length of the logit vectors returned by [`LogitOracle::next_token_logits`].
    fn vocab_size(&self) -> usize;

    /// Logits of every token following `prefix`.
    ///
    /// The model may only attend to the last `window` tokens of the prefix.
    fn next_token_logits(&self, prefix: &[TokenId], window: usize)
    -> Result<Vec<f32>, OracleError>;
}

/// Parameters of the decoding loop.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeConfig {
    /// Token budget of a candidate, prefix and terminator included.
    pub max_length: usize,
    /// Context window handed to the oracle.
    pub window: usize,
    /// Softmax temperature; zero decodes greedily.
    pub temperature: f32,
    /// Added to the logit of the opening rail once landing on it would close
    /// an ERC-complete circuit. Zero leaves the choice to the model.
    pub closure_bias: f32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_length: 1020,
            window: 1024,
            temperature: 0.7,
            closure_bias: 4.0,
        }
    }
}

impl DecodeConfig {
    /// Short candidates, a cool sampler and circuits closed as soon as they
    /// are complete.
    pub fn strict() -> Self {
        Self {
            max_length: 256,
            window: 256,
            temperature: 0.3,
            closure_bias: 16.0,
        }
    }

    /// The full fixed-length array budget, an unscaled softmax and no
    /// preference for closing.
    pub fn permissive() -> Self {
        Self {
            max_length: 1025,
            window: 1024,
            temperature: 1.0,
            closure_bias: 0.0,
        }
    }

    /// Look up a preset by name: `default`, `strict` or `permissive`.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "strict" => Some(Self::strict()),
            "permissive" => Some(Self::permissive()),
            _ => None,
        }
    }
}

/// Why a candidate was abandoned.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateError {
    /// The grammar left no legal token.
    GrammarDeadEnd { length: usize, state: GrammarState },
    /// The token budget ran out before the terminator.
    Truncated { length: usize },
    /// The tracker refused a declaration the grammar had admitted.
    PinAlreadyUsed(ConnectivityError),
    /// The sampler produced a token the grammar refuses.
    IllegalSample { token: TokenId, state: GrammarState },
    Oracle(OracleError),
    /// The starting prefix is not a legal sequence start.
    InvalidPrefix(GrammarError),
}

impl fmt::Display for CandidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateError::GrammarDeadEnd { length, state } => {
                write!(f, "Dead end after {} tokens in state {}", length, state)
            }
            CandidateError::Truncated { length } => {
                write!(f, "No terminator within {} tokens", length)
            }
            CandidateError::PinAlreadyUsed(err) => write!(f, "{}", err),
            CandidateError::IllegalSample { token, state } => {
                write!(f, "Sampled token #{} is illegal in state {}", token, state)
            }
            CandidateError::Oracle(err) => write!(f, "{}", err),
            CandidateError::InvalidPrefix(err) => write!(f, "Invalid prefix: {}", err),
        }
    }
}

impl Error for CandidateError {}

impl From<OracleError> for CandidateError {
    fn from(err: OracleError) -> Self {
        CandidateError::Oracle(err)
    }
}

/// Per-step driver of one candidate: hands out masks and accepts tokens.
#[derive(Debug, Clone)]
pub struct ConstrainedDecoder<'v> {
    machine: GrammarMachine<'v>,
    tokens: Vec<TokenId>,
    banned: Vec<TokenId>,
}

impl<'v> ConstrainedDecoder<'v> {
    /// Start a candidate from `prefix`, never sampling `banned` tokens.
    pub fn new(
        vocab: &'v Vocabulary,
        prefix: &[TokenId],
        banned: &[TokenId],
    ) -> Result<Self, GrammarError> {
        Ok(Self {
            machine: GrammarMachine::with_prefix(vocab, prefix)?,
            tokens: prefix.to_vec(),
            banned: banned.to_vec(),
        })
    }

    pub fn machine(&self) -> &GrammarMachine<'v> {
        &self.machine
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<TokenId> {
        self.tokens
    }

    pub fn is_complete(&self) -> bool {
        self.machine.is_complete()
    }

    /// Mask of the next step, banned tokens removed.
    pub fn next_mask(&self, vocab_size: usize) -> LogitMask {
        LogitMask::new(vocab_size, self.machine.legal_tokens()).without(&self.banned)
    }

    /// Accept a sampled token.
    pub fn feed_token(&mut self, token: TokenId) -> Result<(), CandidateError> {
        let state = self.machine.state();
        self.machine.push(token).map_err(|err| match err {
            GrammarError::PinAlreadyUsed(err) => CandidateError::PinAlreadyUsed(err),
            GrammarError::IllegalToken { token, state } => {
                CandidateError::IllegalSample { token, state }
            }
            GrammarError::DeadEnd { state } => CandidateError::GrammarDeadEnd {
                length: self.tokens.len(),
                state,
            },
        })?;
        trace!(token, %state, "accepted");
        self.tokens.push(token);
        Ok(())
    }
}

/// Decode one candidate from `prefix`.
///
/// # Arguments
///
/// * `vocab` - Registry the oracle's logits are indexed by
/// * `oracle` - Sequence model
/// * `prefix` - Starting tokens, normally the circuit-type tag and the ground rail
/// * `banned` - Tokens never to sample, e.g. the other circuit-type tags
/// * `config` - Length budget, context window, temperature and closure bias
/// * `rng` - Source of randomness of this candidate
///
/// # Returns
///
/// The complete token sequence ending with the terminator, or the reason the
/// candidate was abandoned. An oracle sized for another vocabulary fails with
/// [`OracleError::Shape`] before it is ever queried.
pub fn decode_candidate<R: Rng>(
    vocab: &Vocabulary,
    oracle: &dyn LogitOracle,
    prefix: &[TokenId],
    banned: &[TokenId],
    config: &DecodeConfig,
    rng: &mut R,
) -> Result<Vec<TokenId>, CandidateError> {
    if oracle.vocab_size() != vocab.len() {
        return Err(OracleError::Shape {
            expected: vocab.len(),
            actual: oracle.vocab_size(),
        }
        .into());
    }

    let mut decoder =
        ConstrainedDecoder::new(vocab, prefix, banned).map_err(CandidateError::InvalidPrefix)?;

    while !decoder.is_complete() {
        let length = decoder.tokens().len();
        if length >= config.max_length {
            return Err(CandidateError::Truncated { length });
        }

        let mask = decoder.next_mask(vocab.len());
        if mask.is_empty() {
            let machine = decoder.machine();
            debug!(
                length,
                state = %machine.state(),
                unsaturated = machine.tracker().unsaturated_devices(),
                dangling = machine.tracker().dangling_nets(),
                "no legal token"
            );
            return Err(CandidateError::GrammarDeadEnd {
                length,
                state: machine.state(),
            });
        }

        let mut logits = oracle.next_token_logits(decoder.tokens(), config.window)?;
        if logits.len() != vocab.len() {
            return Err(OracleError::Shape {
                expected: vocab.len(),
                actual: logits.len(),
            }
            .into());
        }
        mask.apply_to_logits(&mut logits);
        if let Some(rail) = decoder.machine().closing_rail() {
            logits[rail as usize] += config.closure_bias;
        }

        let token = sample(&logits, &mask, config.temperature, rng).ok_or(
            CandidateError::GrammarDeadEnd {
                length,
                state: decoder.machine().state(),
            },
        )?;

        decoder.feed_token(token)?;
    }

    Ok(decoder.into_tokens())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::UniformOracle;
    use crate::vocabulary::{DeviceFamily, VocabularyBuilder};
    use rand::{SeedableRng, rngs::StdRng};

    /// Prefers the scripted token at each position, zero elsewhere.
    struct ScriptedOracle {
        vocab_size: usize,
        script: Vec<TokenId>,
    }

    impl LogitOracle for ScriptedOracle {
        fn vocab_size(&self) -> usize {
            self.vocab_size
        }

        fn next_token_logits(
            &self,
            prefix: &[TokenId],
            _window: usize,
        ) -> Result<Vec<f32>, OracleError> {
            let mut logits = vec![0.0; self.vocab_size];
            if let Some(&token) = self.script.get(prefix.len()) {
                logits[token as usize] = 10.0;
            }
            Ok(logits)
        }
    }

    struct BrokenOracle(OracleError, usize);

    impl LogitOracle for BrokenOracle {
        fn vocab_size(&self) -> usize {
            self.1
        }

        fn next_token_logits(&self, _: &[TokenId], _: usize) -> Result<Vec<f32>, OracleError> {
            Err(self.0.clone())
        }
    }

    fn resistors(shorted: bool, count: usize) -> Vocabulary {
        VocabularyBuilder::new()
            .family(DeviceFamily::new("Resistor", "R", "NP", shorted))
            .devices("Resistor", "R", count)
            .rails(["VSS"])
            .circuit_types(["Filter", "Mixer"])
            .nets("NET", 1)
            .build()
            .unwrap()
    }

    fn ids(vocab: &Vocabulary, names: &[&str]) -> Vec<TokenId> {
        names.iter().map(|n| vocab.id_of(n).unwrap()).collect()
    }

    /// An oracle proposing `R_P` first walks the shorted resistor back to the rail.
    #[test]
    fn test_scripted_walk_terminates() {
        let vocab = resistors(true, 1);
        let expected = ids(
            &vocab,
            &["CIRCUIT_Filter", "VSS", "R_P", "R1", "R_N", "VSS", "TRUNCATE"],
        );
        let oracle = ScriptedOracle {
            vocab_size: vocab.len(),
            script: expected.clone(),
        };
        let config = DecodeConfig {
            temperature: 0.0,
            ..DecodeConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tokens =
            decode_candidate(&vocab, &oracle, &expected[..2], &[], &config, &mut rng).unwrap();
        assert_eq!(tokens, expected);
    }

    /// Whatever the oracle prefers, sampled tokens obey the grammar.
    #[test]
    fn test_mask_overrides_oracle() {
        let vocab = resistors(true, 1);
        let prefix = ids(&vocab, &["CIRCUIT_Filter", "VSS"]);
        let oracle = ScriptedOracle {
            vocab_size: vocab.len(),
            script: vec![vocab.id_of("NET1").unwrap(); 5],
        };
        let config = DecodeConfig {
            temperature: 0.0,
            ..DecodeConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let tokens = decode_candidate(&vocab, &oracle, &prefix, &[], &config, &mut rng).unwrap();
        assert_eq!(tokens.len(), 7);
        assert!(!tokens.contains(&vocab.id_of("NET1").unwrap()));
    }

    /// The closing rail is favoured but never forced over a confident model.
    #[test]
    fn test_closure_bias() {
        let vocab = resistors(true, 1);
        let prefix = ids(&vocab, &["CIRCUIT_Filter", "VSS"]);
        let mut script = ids(&vocab, &["CIRCUIT_Filter", "VSS", "R_P", "R1", "R_N", "NET1"]);
        script.push(vocab.terminator());
        let oracle = ScriptedOracle {
            vocab_size: vocab.len(),
            script,
        };
        let mut rng = StdRng::seed_from_u64(3);

        let strict = DecodeConfig {
            temperature: 0.0,
            ..DecodeConfig::strict()
        };
        let tokens = decode_candidate(&vocab, &oracle, &prefix, &[], &strict, &mut rng).unwrap();
        assert_eq!(
            tokens,
            ids(&vocab, &["CIRCUIT_Filter", "VSS", "R_P", "R1", "R_N", "VSS", "TRUNCATE"])
        );

        let permissive = DecodeConfig {
            temperature: 0.0,
            ..DecodeConfig::permissive()
        };
        let err = decode_candidate(&vocab, &oracle, &prefix, &[], &permissive, &mut rng).unwrap_err();
        assert!(matches!(err, CandidateError::GrammarDeadEnd { length: 6, .. }));
    }

    #[test]
    fn test_presets() {
        assert_eq!(DecodeConfig::preset("default"), Some(DecodeConfig::default()));
        assert_eq!(DecodeConfig::preset("strict"), Some(DecodeConfig::strict()));
        assert_eq!(DecodeConfig::preset("permissive"), Some(DecodeConfig::permissive()));
        assert_eq!(DecodeConfig::preset("greedy"), None);
        assert!(DecodeConfig::strict().max_length < DecodeConfig::default().max_length);
        assert!(DecodeConfig::permissive().closure_bias < DecodeConfig::default().closure_bias);
    }

    #[test]
    fn test_dead_end_and_truncation() {
        let vocab = resistors(false, 1);
        let prefix = ids(&vocab, &["CIRCUIT_Filter", "VSS"]);
        let oracle = UniformOracle::new(vocab.len());
        let mut rng = StdRng::seed_from_u64(9);

        let err = decode_candidate(&vocab, &oracle, &prefix, &[], &DecodeConfig::default(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, CandidateError::GrammarDeadEnd { length: 6, .. }));

        let short = DecodeConfig {
            max_length: 4,
            ..DecodeConfig::default()
        };
        let err = decode_candidate(&vocab, &oracle, &prefix, &[], &short, &mut rng).unwrap_err();
        assert_eq!(err, CandidateError::Truncated { length: 4 });
    }

    /// Banning every remaining option ends the candidate like a dead end.
    #[test]
    fn test_banned_tokens() {
        let vocab = resistors(true, 1);
        let prefix = ids(&vocab, &["CIRCUIT_Filter", "VSS"]);
        let banned = ids(&vocab, &["R_P", "R_N"]);
        let oracle = UniformOracle::new(vocab.len());
        let mut rng = StdRng::seed_from_u64(2);
        let err = decode_candidate(&vocab, &oracle, &prefix, &banned, &DecodeConfig::default(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, CandidateError::GrammarDeadEnd { length: 2, .. }));
    }

    #[test]
    fn test_oracle_failures() {
        let vocab = resistors(true, 1);
        let prefix = ids(&vocab, &["CIRCUIT_Filter", "VSS"]);
        let mut rng = StdRng::seed_from_u64(4);
        let config = DecodeConfig::default();

        let broken = BrokenOracle(OracleError::Inference("cuda".into()), vocab.len());
        assert_eq!(
            decode_candidate(&vocab, &broken, &prefix, &[], &config, &mut rng),
            Err(CandidateError::Oracle(OracleError::Inference("cuda".into())))
        );

        let narrow = UniformOracle::new(vocab.len() - 1);
        assert_eq!(
            decode_candidate(&vocab, &narrow, &prefix, &[], &config, &mut rng),
            Err(CandidateError::Oracle(OracleError::Shape {
                expected: vocab.len(),
                actual: vocab.len() - 1
            }))
        );
    }

    /// A model sized for another vocabulary is refused before any inference.
    #[test]
    fn test_vocab_size_checked_up_front() {
        let vocab = resistors(true, 1);
        let prefix = ids(&vocab, &["CIRCUIT_Filter", "VSS"]);
        let mut rng = StdRng::seed_from_u64(4);

        let mismatched = BrokenOracle(OracleError::Inference("never called".into()), vocab.len() + 3);
        assert_eq!(
            decode_candidate(&vocab, &mismatched, &prefix, &[], &DecodeConfig::default(), &mut rng),
            Err(CandidateError::Oracle(OracleError::Shape {
                expected: vocab.len(),
                actual: vocab.len() + 3
            }))
        );

        // Declared size matches but the logits do not.
        let lying = ScriptedOracle {
            vocab_size: vocab.len(),
            script: Vec::new(),
        };
        struct Short<'a>(&'a ScriptedOracle);
        impl LogitOracle for Short<'_> {
            fn vocab_size(&self) -> usize {
                self.0.vocab_size()
            }
            fn next_token_logits(&self, prefix: &[TokenId], window: usize) -> Result<Vec<f32>, OracleError> {
                let mut logits = self.0.next_token_logits(prefix, window)?;
                logits.pop();
                Ok(logits)
            }
        }
        assert!(matches!(
            decode_candidate(&vocab, &Short(&lying), &prefix, &[], &DecodeConfig::default(), &mut rng),
            Err(CandidateError::Oracle(OracleError::Shape { .. }))
        ));
    }

    #[test]
    fn test_invalid_prefix() {
        let vocab = resistors(true, 1);
        let prefix = ids(&vocab, &["NET1"]);
        let oracle = UniformOracle::new(vocab.len());
        let mut rng = StdRng::seed_from_u64(4);
        assert!(matches!(
            decode_candidate(&vocab, &oracle, &prefix, &[], &DecodeConfig::default(), &mut rng),
            Err(CandidateError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_decoder_steps() {
        let vocab = resistors(true, 1);
        let prefix = ids(&vocab, &["CIRCUIT_Filter", "VSS"]);
        let mut decoder = ConstrainedDecoder::new(&vocab, &prefix, &[]).unwrap();
        let mask = decoder.next_mask(vocab.len());
        assert_eq!(mask.allowed_ids(), &ids(&vocab, &["R_N", "R_P"])[..]);

        let r1 = vocab.id_of("R1").unwrap();
        assert!(matches!(
            decoder.feed_token(r1),
            Err(CandidateError::IllegalSample { token, .. }) if token == r1
        ));
        decoder.feed_token(vocab.id_of("R_N").unwrap()).unwrap();
        assert_eq!(decoder.tokens().len(), 3);
    }
}
