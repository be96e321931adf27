//! Text front-end: cleaning policies and symbol encoding.
//!
//! [`TextEncoder::clean_and_encode`] is the single entry point used by the
//! data pipeline and the synthesizer. Every sequence it returns ends with the
//! end-of-sequence symbol.

pub mod cleaners;
pub mod numbers;
pub mod symbols;

use crate::error::{Result, TtsError};
use cleaners::CleanerPolicy;
use symbols::Vocabulary;

/// Encoded text: vocabulary indices terminated by the end symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSequence(Vec<usize>);

impl TextSequence {
    pub fn ids(&self) -> &[usize] {
        &self.0
    }

    /// Number of symbols including the end symbol.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Indices widened for integer tensors.
    pub fn to_i64(&self) -> Vec<i64> {
        self.0.iter().map(|&id| id as i64).collect()
    }
}

/// Cleans raw text with a fixed policy and maps it onto the vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct TextEncoder {
    policy: CleanerPolicy,
    vocab: &'static Vocabulary,
}

impl TextEncoder {
    pub fn new(policy: CleanerPolicy) -> Self {
        Self {
            policy,
            vocab: Vocabulary::global(),
        }
    }

    /// Build an encoder from a policy name such as `english_cleaners`.
    pub fn from_name(name: &str) -> Result<Self> {
        CleanerPolicy::from_name(name)
            .map(Self::new)
            .ok_or_else(|| TtsError::Config(format!("unknown text_cleaner {name:?}")))
    }

    pub fn policy(&self) -> CleanerPolicy {
        self.policy
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Clean `raw` and map every character to its index, appending the end symbol.
    pub fn clean_and_encode(&self, raw: &str) -> Result<TextSequence> {
        let cleaned = self.policy.clean(raw);
        if cleaned.is_empty() {
            return Err(TtsError::EmptyInput);
        }
        let mut ids = Vec::with_capacity(cleaned.len() + 1);
        for (position, symbol) in cleaned.chars().enumerate() {
            let id = self
                .vocab
                .id(symbol)
                .filter(|&id| id != self.vocab.pad_id() && id != self.vocab.eos_id())
                .ok_or_else(|| TtsError::UnknownSymbol {
                    symbol,
                    position,
                    text: cleaned.clone(),
                })?;
            ids.push(id);
        }
        ids.push(self.vocab.eos_id());
        Ok(TextSequence(ids))
    }

    /// Map indices back to text, dropping padding and the end symbol.
    pub fn sequence_to_text(&self, ids: &[usize]) -> String {
        ids.iter()
            .filter(|&&id| id != self.vocab.pad_id() && id != self.vocab.eos_id())
            .filter_map(|&id| self.vocab.symbol(id))
            .collect()
    }
}
