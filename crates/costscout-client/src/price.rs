//! Price text parsing.
//!
//! Handles US and European number formats ("$1,234.56", "1.234,56 €"),
//! currency codes on either side ("EUR 12", "12 GBP") and ranges
//! ("$10 - $20", "10 to 20"). A range yields its midpoint as the price.

use std::sync::LazyLock;

use regex::{Captures, Regex};

const NUMBER: &str = r"\d{1,3}(?:[.,\u{a0}\u{202f}]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?";
const PREFIX: &str = r"\$|€|£|¥|\b(?:USD|EUR|GBP|CAD|AUD|CHF|JPY)\b";
// `$` is prefix-only so "Model 2000 $129" does not bind the symbol to 2000.
const SUFFIX: &str = r"€|£|\b(?:USD|EUR|GBP|CAD|AUD|CHF|JPY)\b";

static PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:(?P<pre>{PREFIX})\s?)?(?P<num>{NUMBER})(?:\s?(?P<post>{SUFFIX}))?"
    ))
    .expect("price pattern compiles")
});

static RANGE_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\s*(?:-|–|—|to)\s*(?:(?:{PREFIX})\s?)?(?P<num>{NUMBER})"
    ))
    .expect("range pattern compiles")
});

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrice {
    pub price: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// ISO code when the text carried a symbol or code.
    pub currency: Option<String>,
}

/// Parse the price in a text that is known to be about a price, such as a
/// price element. Prefers an amount marked with a currency, otherwise takes
/// the first number.
pub fn parse_price(text: &str) -> Option<ParsedPrice> {
    find(text, false)
}

/// Find an amount explicitly marked with a currency in free text.
pub fn find_currency_price(text: &str) -> Option<ParsedPrice> {
    find(text, true)
}

fn find(text: &str, require_currency: bool) -> Option<ParsedPrice> {
    let mut first = None;
    for caps in PRICE.captures_iter(text) {
        if currency_of(&caps).is_some() {
            return build(text, &caps);
        }
        if first.is_none() {
            first = Some(caps);
        }
    }
    if require_currency {
        return None;
    }
    first.and_then(|caps| build(text, &caps))
}

fn build(text: &str, caps: &Captures<'_>) -> Option<ParsedPrice> {
    let whole = caps.get(0)?;
    let amount = normalize_number(caps.name("num")?.as_str())?;
    let currency = currency_of(caps);

    let upper = RANGE_TAIL
        .captures(&text[whole.end()..])
        .and_then(|c| c.name("num"))
        .and_then(|m| normalize_number(m.as_str()));

    Some(match upper {
        Some(other) => {
            let (lo, hi) = if other < amount {
                (other, amount)
            } else {
                (amount, other)
            };
            ParsedPrice {
                price: (lo + hi) / 2.0,
                min: Some(lo),
                max: Some(hi),
                currency,
            }
        }
        None => ParsedPrice {
            price: amount,
            min: None,
            max: None,
            currency,
        },
    })
}

fn currency_of(caps: &Captures<'_>) -> Option<String> {
    let marker = caps.name("pre").or_else(|| caps.name("post"))?.as_str();
    Some(
        match marker {
            "$" => "USD",
            "€" => "EUR",
            "£" => "GBP",
            "¥" => "JPY",
            code => code,
        }
        .to_string(),
    )
}

/// Turn "1,234.56", "1.234,56" or "1\u{a0}234" into a float.
///
/// Only non-breaking spaces group digits. An ASCII space ends the number,
/// so "2 100" reads as 2.
///
/// With both separators present the last one is the decimal point. With one
/// kind, it is a thousands separator when it repeats or is followed by
/// exactly three digits.
fn normalize_number(raw: &str) -> Option<f64> {
    let s: String = raw
        .chars()
        .filter(|c| !matches!(c, '\u{a0}' | '\u{202f}'))
        .collect();

    let decimal = match (s.rfind('.'), s.rfind(',')) {
        (Some(dot), Some(comma)) => Some(dot.max(comma)),
        (Some(i), None) | (None, Some(i)) => {
            let sep = &s[i..=i];
            let digits_after = s.len() - i - 1;
            if s.matches(sep).count() > 1 || digits_after == 3 {
                None
            } else {
                Some(i)
            }
        }
        (None, None) => None,
    };

    let mut out = String::with_capacity(s.len());
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if Some(i) == decimal {
            out.push('.');
        }
    }
    out.parse().ok()
}
