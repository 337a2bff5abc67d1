use std::collections::HashMap;

use aws_sdk_dynamodb::{primitives::Blob, types::AttributeValue, Client as DynamoClient};
use base64::{prelude::BASE64_STANDARD, Engine};
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynamoDbError {
    #[error("Failed to get item from {table}: {source}")]
    GetItem {
        table: String,
        #[source]
        source: aws_sdk_dynamodb::Error,
    },
}

/// Fetch one item by key, returned as plain JSON. `None` if absent.
pub async fn get_item(
    client: &DynamoClient,
    table_name: &str,
    key: &Map<String, Value>,
) -> Result<Option<Value>, DynamoDbError> {
    tracing::debug!("Getting item from {} with key {}", table_name, serde_json::Value::Object(key.clone()));

    let result = client
        .get_item()
        .table_name(table_name)
        .set_key(Some(json_to_key(key)))
        .send()
        .await
        .map_err(|e| DynamoDbError::GetItem {
            table: table_name.to_string(),
            source: e.into(),
        })?;

    let item = result.item().map(item_to_json);
    tracing::debug!("Get item from {} found: {}", table_name, item.is_some());
    Ok(item)
}

pub fn json_to_key(key: &Map<String, Value>) -> HashMap<String, AttributeValue> {
    key.iter()
        .map(|(name, value)| (name.clone(), json_to_attribute_value(value)))
        .collect()
}

pub fn json_to_attribute_value(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(json_to_attribute_value).collect()),
        Value::Object(map) => AttributeValue::M(json_to_key(map)),
    }
}

pub fn item_to_json(item: &HashMap<String, AttributeValue>) -> Value {
    Value::Object(
        item.iter()
            .map(|(name, value)| (name.clone(), attribute_value_to_json(value)))
            .collect(),
    )
}

fn number_to_json(n: &str) -> Value {
    if let Ok(i) = n.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(u) = n.parse::<u64>() {
        return Value::from(u);
    }
    n.parse::<f64>()
        .ok()
        .filter(|f| round_trips(n, *f))
        .and_then(Number::from_f64)
        .map(Value::Number)
        // Numbers f64 cannot hold exactly keep their text
        .unwrap_or_else(|| Value::String(n.to_string()))
}

/// Whether `f` carries every significant digit of `text`.
fn round_trips(text: &str, f: f64) -> bool {
    match (significant_digits(text), significant_digits(&format!("{:e}", f))) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

/// Mantissa digits without leading/trailing zeros, plus the decimal exponent
/// of the first one; `None` for anything that is not a plain decimal.
fn significant_digits(text: &str) -> Option<(String, i64)> {
    let text = text.trim().trim_start_matches(['+', '-']);
    let (mantissa, exponent) = match text.find(['e', 'E']) {
        Some(i) => (&text[..i], text[i + 1..].parse::<i64>().ok()?),
        None => (text, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits: String = int_part.chars().chain(frac_part.chars()).collect();
    let leading = digits.len() - digits.trim_start_matches('0').len();
    let significant = digits.trim_matches('0');
    if significant.is_empty() {
        return Some((String::new(), 0));
    }
    let magnitude = int_part.len() as i64 - 1 - leading as i64 + exponent;
    Some((significant.to_string(), magnitude))
}

fn blob_to_json(blob: &Blob) -> Value {
    Value::String(BASE64_STANDARD.encode(blob.as_ref()))
}

pub fn attribute_value_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::M(map) => item_to_json(map),
        AttributeValue::L(list) => Value::Array(list.iter().map(attribute_value_to_json).collect()),
        AttributeValue::Ss(set) => Value::Array(set.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(set) => Value::Array(set.iter().map(|n| number_to_json(n)).collect()),
        AttributeValue::B(blob) => blob_to_json(blob),
        AttributeValue::Bs(set) => Value::Array(set.iter().map(blob_to_json).collect()),
        _ => {
            tracing::warn!("Unsupported attribute value type - mapping to null");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_an_item_to_json() {
        let item = HashMap::from([
            ("id".to_string(), AttributeValue::S("o-1".to_string())),
            ("qty".to_string(), AttributeValue::N("3".to_string())),
            ("price".to_string(), AttributeValue::N("9.5".to_string())),
            ("paid".to_string(), AttributeValue::Bool(true)),
            ("note".to_string(), AttributeValue::Null(true)),
            ("tags".to_string(), AttributeValue::Ss(vec!["a".to_string(), "b".to_string()])),
            ("raw".to_string(), AttributeValue::B(Blob::new(b"hi".to_vec()))),
            (
                "lines".to_string(),
                AttributeValue::L(vec![AttributeValue::M(HashMap::from([(
                    "sku".to_string(),
                    AttributeValue::S("X".to_string()),
                )]))]),
            ),
        ]);

        assert_eq!(
            item_to_json(&item),
            json!({
                "id": "o-1",
                "qty": 3,
                "price": 9.5,
                "paid": true,
                "note": null,
                "tags": ["a", "b"],
                "raw": "aGk=",
                "lines": [{"sku": "X"}]
            })
        );
    }

    #[test]
    fn builds_keys_from_json() {
        let key = json!({"pk": "ORDER#1", "sk": 42});
        let key = json_to_key(key.as_object().unwrap());
        assert_eq!(key.get("pk"), Some(&AttributeValue::S("ORDER#1".to_string())));
        assert_eq!(key.get("sk"), Some(&AttributeValue::N("42".to_string())));
    }

    #[test]
    fn oversized_numbers_keep_their_text() {
        let huge = "1".repeat(400);
        assert_eq!(number_to_json(&huge), Value::String(huge.clone()));
    }

    #[test]
    fn precise_decimals_keep_their_text() {
        assert_eq!(
            number_to_json("0.12345678901234567890"),
            json!("0.12345678901234567890")
        );
        assert_eq!(number_to_json("123456789012345678901234"), json!("123456789012345678901234"));

        assert_eq!(number_to_json("0.1"), json!(0.1));
        assert_eq!(number_to_json("-2.50"), json!(-2.5));
        assert_eq!(number_to_json("1.5E3"), json!(1500.0));
        assert_eq!(number_to_json("0.000"), json!(0.0));
    }
}
