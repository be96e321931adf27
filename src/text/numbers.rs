//! English number, currency and ordinal expansion.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static COMMA_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9][0-9,]+[0-9])").expect("static pattern"));
static POUNDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"£([0-9.,]*[0-9]+)").expect("static pattern"));
static DOLLARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([0-9.,]*[0-9]+)").expect("static pattern"));
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)\.([0-9]+)").expect("static pattern"));
static ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)(st|nd|rd|th)").expect("static pattern"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("static pattern"));

const ONES: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];
const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];
const SCALES: [(u64, &str); 4] = [
    (1_000_000_000_000, "trillion"),
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
];

/// Expand every digit run, currency amount and ordinal in `text` into words.
pub fn normalize_numbers(text: &str) -> String {
    let text = COMMA_NUMBER.replace_all(text, |c: &Captures| c[1].replace(',', ""));
    let text = POUNDS.replace_all(&text, "$1 pounds");
    let text = DOLLARS.replace_all(&text, |c: &Captures| expand_dollars(&c[1]));
    let text = DECIMAL.replace_all(&text, "$1 point $2");
    let text = ORDINAL.replace_all(&text, |c: &Captures| match c[1].parse::<u64>() {
        Ok(n) => ordinal_words(n),
        Err(_) => spell_digits(&c[1]),
    });
    NUMBER
        .replace_all(&text, |c: &Captures| expand_number(&c[0]))
        .into_owned()
}

fn expand_dollars(amount: &str) -> String {
    let parts: Vec<&str> = amount.split('.').collect();
    if parts.len() > 2 {
        return format!("{amount} dollars");
    }
    let dollars: u64 = parts[0].parse().unwrap_or(0);
    let cents: u64 = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(0);
    let unit = |n: u64, one: &str, many: &str| {
        if n == 1 {
            format!("{n} {one}")
        } else {
            format!("{n} {many}")
        }
    };
    match (dollars, cents) {
        (0, 0) => "zero dollars".to_string(),
        (d, 0) => unit(d, "dollar", "dollars"),
        (0, c) => unit(c, "cent", "cents"),
        (d, c) => format!("{}, {}", unit(d, "dollar", "dollars"), unit(c, "cent", "cents")),
    }
}

fn expand_number(digits: &str) -> String {
    let Ok(n) = digits.parse::<u64>() else {
        return spell_digits(digits);
    };
    if n > 1000 && n < 3000 {
        year_words(n)
    } else {
        cardinal_words(n)
    }
}

fn spell_digits(digits: &str) -> String {
    digits
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| ONES[d as usize])
        .collect::<Vec<_>>()
        .join(" ")
}

/// Years are read in pairs: 1990 is "nineteen ninety", 1905 "nineteen oh five".
fn year_words(n: u64) -> String {
    if n == 2000 {
        return "two thousand".to_string();
    }
    if n > 2000 && n < 2010 {
        return format!("two thousand {}", cardinal_words(n % 100));
    }
    let (high, low) = (n / 100, n % 100);
    match low {
        0 => format!("{} hundred", cardinal_words(high)),
        1..=9 => format!("{} oh {}", cardinal_words(high), cardinal_words(low)),
        _ => format!("{} {}", cardinal_words(high), cardinal_words(low)),
    }
}

/// Spoken form of `n`, up to the trillions.
pub fn cardinal_words(n: u64) -> String {
    if n >= 1_000_000_000_000_000 {
        return spell_digits(&n.to_string());
    }
    let mut words = Vec::new();
    let mut rest = n;
    for (scale, name) in SCALES {
        if rest >= scale {
            words.push(format!("{} {name}", below_thousand(rest / scale)));
            rest %= scale;
        }
    }
    if rest > 0 || words.is_empty() {
        words.push(below_thousand(rest));
    }
    words.join(" ")
}

fn below_thousand(n: u64) -> String {
    let hundreds = n / 100;
    let rest = n % 100;
    let mut out = String::new();
    if hundreds > 0 {
        out.push_str(ONES[hundreds as usize]);
        out.push_str(" hundred");
        if rest == 0 {
            return out;
        }
        out.push(' ');
    }
    if rest < 20 {
        out.push_str(ONES[rest as usize]);
    } else {
        out.push_str(TENS[(rest / 10) as usize]);
        if rest % 10 != 0 {
            out.push('-');
            out.push_str(ONES[(rest % 10) as usize]);
        }
    }
    out
}

/// Ordinal form of `n` ("twenty-first", "one hundredth").
pub fn ordinal_words(n: u64) -> String {
    let cardinal = cardinal_words(n);
    let split = cardinal.rfind([' ', '-']).map(|i| i + 1).unwrap_or(0);
    let (head, last) = cardinal.split_at(split);
    let last = match last {
        "one" => "first".to_string(),
        "two" => "second".to_string(),
        "three" => "third".to_string(),
        "five" => "fifth".to_string(),
        "eight" => "eighth".to_string(),
        "nine" => "ninth".to_string(),
        "twelve" => "twelfth".to_string(),
        word if word.ends_with('y') => format!("{}ieth", &word[..word.len() - 1]),
        word => format!("{word}th"),
    };
    format!("{head}{last}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinals() {
        assert_eq!(cardinal_words(0), "zero");
        assert_eq!(cardinal_words(42), "forty-two");
        assert_eq!(cardinal_words(100), "one hundred");
        assert_eq!(
            cardinal_words(3_000_017),
            "three million seventeen"
        );
        assert_eq!(
            cardinal_words(1_250_000_000_000),
            "one trillion two hundred fifty billion"
        );
    }

    #[test]
    fn ordinals() {
        assert_eq!(ordinal_words(1), "first");
        assert_eq!(ordinal_words(12), "twelfth");
        assert_eq!(ordinal_words(21), "twenty-first");
        assert_eq!(ordinal_words(40), "fortieth");
        assert_eq!(ordinal_words(100), "one hundredth");
    }

    #[test]
    fn years_read_in_pairs() {
        assert_eq!(normalize_numbers("1990"), "nineteen ninety");
        assert_eq!(normalize_numbers("1905"), "nineteen oh five");
        assert_eq!(normalize_numbers("1900"), "nineteen hundred");
        assert_eq!(normalize_numbers("2005"), "two thousand five");
    }

    #[test]
    fn currency_and_decimals() {
        assert_eq!(
            normalize_numbers("$3.50"),
            "three dollars, fifty cents"
        );
        assert_eq!(normalize_numbers("$1"), "one dollar");
        assert_eq!(normalize_numbers("£20"), "twenty pounds");
        assert_eq!(normalize_numbers("3.14"), "three point fourteen");
    }

    #[test]
    fn commas_and_ordinals_in_context() {
        assert_eq!(
            normalize_numbers("the 3rd of 10,000 ships"),
            "the third of ten thousand ships"
        );
    }
}
