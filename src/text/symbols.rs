//! Character vocabulary shared by every component.
//!
//! The table is fixed: index 0 is padding, index 1 terminates every sequence.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Padding symbol, always index 0.
pub const PAD: char = '_';
/// End-of-sequence symbol, always index 1.
pub const EOS: char = '~';

const PUNCTUATION: &str = "!'(),-.:;? ";
const LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Symbol-to-index mapping built once per process.
#[derive(Debug)]
pub struct Vocabulary {
    symbols: Vec<char>,
    index: HashMap<char, usize>,
}

impl Vocabulary {
    fn build() -> Self {
        let symbols: Vec<char> = [PAD, EOS]
            .into_iter()
            .chain(PUNCTUATION.chars())
            .chain(LETTERS.chars())
            .collect();
        let index = symbols.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { symbols, index }
    }

    /// Shared process-wide vocabulary.
    pub fn global() -> &'static Vocabulary {
        static VOCAB: OnceLock<Vocabulary> = OnceLock::new();
        VOCAB.get_or_init(Vocabulary::build)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Index of `symbol`, if it belongs to the vocabulary.
    pub fn id(&self, symbol: char) -> Option<usize> {
        self.index.get(&symbol).copied()
    }

    /// Symbol stored at `id`.
    pub fn symbol(&self, id: usize) -> Option<char> {
        self.symbols.get(id).copied()
    }

    pub fn pad_id(&self) -> usize {
        0
    }

    pub fn eos_id(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_indices_are_stable() {
        let vocab = Vocabulary::global();
        assert_eq!(vocab.id(PAD), Some(0));
        assert_eq!(vocab.id(EOS), Some(1));
        assert_eq!(vocab.symbol(vocab.eos_id()), Some(EOS));
        assert_eq!(vocab.len(), 2 + 11 + 52);
    }

    #[test]
    fn lookups_are_inverse() {
        let vocab = Vocabulary::global();
        for id in 0..vocab.len() {
            let symbol = vocab.symbol(id).expect("symbol");
            assert_eq!(vocab.id(symbol), Some(id));
        }
        assert!(vocab.id('#').is_none());
    }
}
