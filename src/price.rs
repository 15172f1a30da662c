//! Price and currency parsing for free-form menu text.

use once_cell::sync::Lazy;
use regex::Regex;

/// First integer or decimal amount, at most two fractional digits.
static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d{1,2})?").expect("valid amount regex"));

static SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[$€£¥₹₩₽]").expect("valid symbol regex"));

static CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(USD|EUR|GBP|JPY|INR|KRW|RUB)\b").expect("valid currency code regex")
});

/// Amount and currency pulled out of a price string.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrice {
    pub amount: Option<f64>,
    pub currency: String,
}

/// Map a currency symbol to its ISO 4217 code.
pub fn currency_for_symbol(symbol: char) -> Option<&'static str> {
    match symbol {
        '$' => Some("USD"),
        '€' => Some("EUR"),
        '£' => Some("GBP"),
        '¥' => Some("JPY"),
        '₹' => Some("INR"),
        '₩' => Some("KRW"),
        '₽' => Some("RUB"),
        _ => None,
    }
}

/// Infer a currency code from text, preferring a symbol over a spelled-out code.
///
/// Returns an empty string when nothing recognizable is present.
pub fn currency_from_text(text: &str) -> String {
    if let Some(symbol) = SYMBOL_RE
        .find(text)
        .and_then(|m| m.as_str().chars().next())
    {
        if let Some(code) = currency_for_symbol(symbol) {
            return code.to_string();
        }
    }

    CODE_RE
        .find(text)
        .map(|m| m.as_str().to_uppercase())
        .unwrap_or_default()
}

/// Extract the numeric amount from a price string.
///
/// Thousands separators and spaces are removed first, so `"1,234.5"` is 1234.5
/// and `"€ 3"` is 3.
pub fn price_to_number(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| *c != ',' && *c != ' ').collect();
    AMOUNT_RE
        .find(&compact)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

pub fn parse_price(raw: &str) -> ParsedPrice {
    ParsedPrice {
        amount: price_to_number(raw),
        currency: currency_from_text(raw),
    }
}
