//! Strict JSON extraction from free-form model output.
//!
//! Models wrap JSON in prose or markdown fences unpredictably. Decoding is an
//! ordered chain of total strategies: bare parse, labeled fence, plain fence.
//! When the chain is exhausted the raw text travels with the error for
//! diagnosis. There is no partial recovery: a price is never scraped out of
//! prose, so callers never receive a fabricated result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Successful outcome of the pricing flow. Never partially populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingResult {
    pub price: f64,
    pub message: String,
}

/// Fields the model may emit per lead. All optional: extraction is delegated
/// and absent fields default rather than reject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadFields {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Run the strategy chain and return the first JSON value that parses.
fn parse_json_value(raw: &str) -> Result<Value, Error> {
    for candidate in candidates(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate.trim()) {
            return Ok(value);
        }
    }
    Err(Error::Decode {
        raw: raw.to_string(),
    })
}

/// Candidate texts in decreasing order of trust: the whole trimmed output,
/// then the inside of a ```json fence, then the inside of any fence.
fn candidates(raw: &str) -> Vec<&str> {
    let mut out = vec![raw.trim()];

    if let Some(inner) = fenced(raw, "```json") {
        out.push(inner);
    }
    if let Some(inner) = fenced(raw, "```") {
        out.push(inner);
    }

    out
}

fn fenced<'a>(raw: &'a str, opening: &str) -> Option<&'a str> {
    raw.split(opening)
        .nth(1)
        .and_then(|rest| rest.split("```").next())
        .map(str::trim)
        .filter(|inner| !inner.is_empty())
}

/// Decode the pricing flow's output: one object with a numeric `price` and a
/// non-empty `message`.
pub fn decode_pricing(raw: &str) -> Result<PricingResult, Error> {
    let value = parse_json_value(raw)?;

    let obj = value
        .as_object()
        .ok_or_else(|| Error::Schema("expected a JSON object".to_string()))?;

    let price = obj
        .get("price")
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::Schema("`price` missing or not numeric".to_string()))?;

    if price < 0.0 {
        return Err(Error::Schema(format!("`price` is negative: {}", price)));
    }

    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::Schema("`message` missing or empty".to_string()))?;

    Ok(PricingResult {
        price,
        message: message.to_string(),
    })
}

/// Decode the lead flow's output: a JSON array of lead objects.
pub fn decode_lead_array(raw: &str) -> Result<Vec<LeadFields>, Error> {
    let value = parse_json_value(raw)?;

    let items = match value {
        Value::Array(items) => items,
        _ => {
            return Err(Error::Decode {
                raw: raw.to_string(),
            })
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item)
                .map_err(|e| Error::Schema(format!("lead #{}: {}", i + 1, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_json_round_trip() {
        let raw = r#"{"price":650,"message":"Hi Sarah,\n\nI'd love..."}"#;
        let result = decode_pricing(raw).unwrap();
        assert_eq!(result.price, 650.0);
        assert_eq!(result.message, "Hi Sarah,\n\nI'd love...");
    }

    #[test]
    fn test_fenced_json_decodes_like_bare() {
        let raw = "```json\n{\"price\":300,\"message\":\"Hi,\"}\n```";
        let result = decode_pricing(raw).unwrap();
        assert_eq!(result.price, 300.0);
        assert_eq!(result.message, "Hi,");
    }

    #[test]
    fn test_unlabeled_fence_decodes() {
        let raw = "Here you go:\n```\n{\"price\":120,\"message\":\"Hi,\"}\n```";
        let result = decode_pricing(raw).unwrap();
        assert_eq!(result.price, 120.0);
    }

    #[test]
    fn test_prose_rejected_without_extraction() {
        let raw = "Sure! The price is $300.";
        match decode_pricing(raw).unwrap_err() {
            Error::Decode { raw: carried } => assert_eq!(carried, raw),
            other => panic!("expected Decode, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_price_is_schema_error() {
        let raw = r#"{"message":"Hi,"}"#;
        assert!(matches!(decode_pricing(raw), Err(Error::Schema(_))));
    }

    #[test]
    fn test_string_price_is_schema_error() {
        let raw = r#"{"price":"300","message":"Hi,"}"#;
        assert!(matches!(decode_pricing(raw), Err(Error::Schema(_))));
    }

    #[test]
    fn test_empty_message_is_schema_error() {
        let raw = r#"{"price":300,"message":""}"#;
        assert!(matches!(decode_pricing(raw), Err(Error::Schema(_))));
    }

    #[test]
    fn test_negative_price_is_schema_error() {
        let raw = r#"{"price":-5,"message":"Hi,"}"#;
        assert!(matches!(decode_pricing(raw), Err(Error::Schema(_))));
    }

    #[test]
    fn test_lead_array_with_sparse_fields() {
        let raw = r#"[{"customer_name":"Sarah","summary":"wedding"},{"phone_number":"0400 000 000"}]"#;
        let leads = decode_lead_array(raw).unwrap();
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].customer_name.as_deref(), Some("Sarah"));
        assert!(leads[0].price.is_none());
        assert_eq!(leads[1].phone_number.as_deref(), Some("0400 000 000"));
    }

    #[test]
    fn test_fenced_lead_array() {
        let raw = "```json\n[{\"customer_name\":\"Tom\"}]\n```";
        let leads = decode_lead_array(raw).unwrap();
        assert_eq!(leads[0].customer_name.as_deref(), Some("Tom"));
    }

    #[test]
    fn test_lead_object_instead_of_array_rejected() {
        let raw = r#"{"customer_name":"Sarah"}"#;
        assert!(matches!(decode_lead_array(raw), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_empty_lead_array_is_valid() {
        assert!(decode_lead_array("[]").unwrap().is_empty());
    }
}
