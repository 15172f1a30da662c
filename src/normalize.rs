//! Conversion of raw model output into canonical, deduplicated menu items.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::price::{currency_from_text, price_to_number};
use crate::TARGET_LLM_REQUEST;

/// A line item as the model returned it. Nothing here is trusted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItemRecord {
    #[serde(default)]
    pub item: Value,
    #[serde(default)]
    pub size: Value,
    #[serde(default)]
    pub price: Value,
    #[serde(default)]
    pub description: Value,
    #[serde(default)]
    pub currency: Value,
    #[serde(default)]
    pub price_symbol: Value,
}

/// A validated menu line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub item: String,
    pub size: String,
    pub price: f64,
    pub description: String,
    pub currency: String,
}

impl CanonicalItem {
    /// Deduplication key: case-insensitive text, exact price in cents.
    fn dedup_key(&self) -> (String, String, i64) {
        (
            self.item.to_lowercase(),
            self.size.to_lowercase(),
            (self.price * 100.0).round() as i64,
        )
    }
}

/// Pull the `items` array out of a model response body.
///
/// Malformed JSON, a missing `items` field or a non-array value all yield no records.
pub fn parse_response(body: &str) -> Vec<RawItemRecord> {
    let json: Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(e) => {
            warn!(target: TARGET_LLM_REQUEST, "Discarding unparsable model response: {}", e);
            return Vec::new();
        }
    };

    let Some(items) = json.get("items").and_then(Value::as_array) else {
        warn!(target: TARGET_LLM_REQUEST, "Model response has no items array");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|value| match value {
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        })
        .collect()
}

fn text_field(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn round_cents(price: f64) -> f64 {
    // `+ 0.0` folds -0.0 into 0.0
    (price * 100.0).round() / 100.0 + 0.0
}

/// Convert one raw record, or `None` when it lacks a name or a usable price.
pub fn canonicalize(record: &RawItemRecord) -> Option<CanonicalItem> {
    let item = text_field(&record.item);
    if item.is_empty() {
        return None;
    }

    let price = match &record.price {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => price_to_number(s),
        _ => None,
    }
    .filter(|p| p.is_finite() && *p >= 0.0)
    .map(round_cents)?;

    let mut currency = text_field(&record.currency).to_uppercase();
    if currency.is_empty() {
        currency = currency_from_text(&text_field(&record.price_symbol));
    }
    if currency.is_empty() {
        if let Value::String(s) = &record.price {
            currency = currency_from_text(s);
        }
    }

    Some(CanonicalItem {
        item,
        size: text_field(&record.size),
        price,
        description: text_field(&record.description),
        currency,
    })
}

/// Drop later items whose key matches an earlier one, keeping first-seen order.
pub fn dedup_items(items: Vec<CanonicalItem>) -> Vec<CanonicalItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.dedup_key()))
        .collect()
}

pub fn normalize_records<'a, I>(records: I) -> Vec<CanonicalItem>
where
    I: IntoIterator<Item = &'a RawItemRecord>,
{
    let mut total = 0;
    let items: Vec<CanonicalItem> = records
        .into_iter()
        .inspect(|_| total += 1)
        .filter_map(canonicalize)
        .collect();
    let kept = items.len();
    let items = dedup_items(items);

    debug!(
        target: TARGET_LLM_REQUEST,
        "Normalized {} raw records: {} valid, {} after dedup",
        total,
        kept,
        items.len()
    );
    items
}

/// Normalize one or more model responses, merging them in the order given.
pub fn normalize_responses<S: AsRef<str>>(bodies: &[S]) -> Vec<CanonicalItem> {
    let records: Vec<RawItemRecord> = bodies
        .iter()
        .flat_map(|body| parse_response(body.as_ref()))
        .collect();
    normalize_records(&records)
}
