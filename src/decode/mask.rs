//! Logit masking.

use crate::vocabulary::TokenId;

/// Token ids that may be sampled at one decoding step.
#[derive(Debug, Clone, PartialEq)]
pub struct LogitMask {
    vocab_size: usize,
    /// Sorted and deduplicated.
    allowed: Vec<TokenId>,
}

impl LogitMask {
    /// Create a mask; `allowed` is sorted internally and out-of-range ids are dropped.
    pub fn new(vocab_size: usize, mut allowed: Vec<TokenId>) -> Self {
        allowed.retain(|&id| (id as usize) < vocab_size);
        allowed.sort_unstable();
        allowed.dedup();
        Self {
            vocab_size,
            allowed,
        }
    }

    pub fn allow_all(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            allowed: (0..vocab_size as TokenId).collect(),
        }
    }

    /// Remove `banned` ids from the mask.
    pub fn without(mut self, banned: &[TokenId]) -> Self {
        self.allowed.retain(|id| !banned.contains(id));
        self
    }

    pub fn is_allowed(&self, id: TokenId) -> bool {
        self.allowed.binary_search(&id).is_ok()
    }

    pub fn allowed_ids(&self) -> &[TokenId] {
        &self.allowed
    }

    pub fn allowed_count(&self) -> usize {
        self.allowed.len()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Set every disallowed logit to negative infinity.
    ///
    /// # Panics
    ///
    /// Panics if `logits.len() != vocab_size`.
    pub fn apply_to_logits(&self, logits: &mut [f32]) {
        assert_eq!(
            logits.len(),
            self.vocab_size,
            "logits length {} != vocab_size {}",
            logits.len(),
            self.vocab_size
        );

        let mut next = self.allowed.iter().peekable();
        for (id, logit) in logits.iter_mut().enumerate() {
            if next.peek().is_some_and(|&&allowed| allowed as usize == id) {
                next.next();
            } else {
                *logit = f32::NEG_INFINITY;
            }
        }
    }
}
