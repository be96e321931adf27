//! Named text cleaning policies applied before symbol lookup.

use crate::text::numbers::normalize_numbers;
use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

static ABBREVIATIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        ("mrs", "misess"),
        ("mr", "mister"),
        ("drs", "doctors"),
        ("dr", "doctor"),
        ("st", "saint"),
        ("co", "company"),
        ("jr", "junior"),
        ("maj", "major"),
        ("gen", "general"),
        ("rev", "reverend"),
        ("lt", "lieutenant"),
        ("hon", "honorable"),
        ("sgt", "sergeant"),
        ("capt", "captain"),
        ("esq", "esquire"),
        ("ltd", "limited"),
        ("col", "colonel"),
        ("ft", "fort"),
    ]
    .into_iter()
    .map(|(abbr, full)| {
        let pattern = format!(r"(?i)\b{abbr}\.");
        (Regex::new(&pattern).expect("static pattern"), full)
    })
    .collect()
});

/// Registry of cleaning policies, selected by name from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanerPolicy {
    /// Lowercase and collapse whitespace.
    Basic,
    /// ASCII folding, lowercase, collapse whitespace.
    Transliteration,
    /// Transliteration plus number, currency and abbreviation expansion.
    English,
}

impl CleanerPolicy {
    /// Look up a policy by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "basic_cleaners" => Some(Self::Basic),
            "transliteration_cleaners" => Some(Self::Transliteration),
            "english_cleaners" => Some(Self::English),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Basic => "basic_cleaners",
            Self::Transliteration => "transliteration_cleaners",
            Self::English => "english_cleaners",
        }
    }

    /// Apply the policy to `text`.
    pub fn clean(self, text: &str) -> String {
        let text = match self {
            Self::Basic => text.to_lowercase(),
            Self::Transliteration => to_ascii(text).to_lowercase(),
            Self::English => {
                let text = to_ascii(text).to_lowercase();
                expand_abbreviations(&normalize_numbers(&text))
            }
        };
        collapse_whitespace(&text)
    }
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn expand_abbreviations(text: &str) -> String {
    ABBREVIATIONS
        .iter()
        .fold(text.to_string(), |acc, (re, full)| {
            re.replace_all(&acc, *full).into_owned()
        })
}

/// Strip diacritics and fold typographic punctuation onto the ASCII set.
fn to_ascii(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter_map(|c| match c {
            '\u{2018}' | '\u{2019}' | '`' => Some('\''),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => Some('-'),
            '[' | '{' => Some('('),
            ']' | '}' => Some(')'),
            '\u{2026}' => Some('.'),
            '"' | '\u{201C}' | '\u{201D}' => None,
            c => Some(c),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trips_names() {
        for policy in [
            CleanerPolicy::Basic,
            CleanerPolicy::Transliteration,
            CleanerPolicy::English,
        ] {
            assert_eq!(CleanerPolicy::from_name(policy.name()), Some(policy));
        }
        assert!(CleanerPolicy::from_name("german_cleaners").is_none());
    }

    #[test]
    fn basic_lowercases_and_collapses() {
        assert_eq!(
            CleanerPolicy::Basic.clean("  Hello \t  WORLD \n"),
            "hello world"
        );
    }

    #[test]
    fn transliteration_strips_accents() {
        assert_eq!(
            CleanerPolicy::Transliteration.clean("Café “naïve” — déjà"),
            "cafe naive - deja"
        );
    }

    #[test]
    fn english_expands_abbreviations_and_numbers() {
        assert_eq!(
            CleanerPolicy::English.clean("Dr. Smith paid $5 to Mr. Jones on the 2nd."),
            "doctor smith paid five dollars to mister jones on the second."
        );
    }
}
