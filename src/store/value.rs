//! Conversion between plain JSON and Firestore's typed value encoding.
//!
//! Firestore REST documents wrap every value in a single-key object naming
//! its type, e.g. `{"stringValue": "a"}` or `{"integerValue": "3"}`
//! (64-bit integers travel as strings).

use serde_json::{json, Map, Number, Value};

use super::Fields;

/// Encode a plain JSON value as a Firestore `Value`.
pub fn encode(value: &Value) -> Value {
  match value {
    Value::Null => json!({ "nullValue": null }),
    Value::Bool(b) => json!({ "booleanValue": b }),
    Value::Number(n) => match n.as_i64() {
      Some(i) => json!({ "integerValue": i.to_string() }),
      None => json!({ "doubleValue": n.as_f64().unwrap_or(0.0) }),
    },
    Value::String(s) => json!({ "stringValue": s }),
    Value::Array(items) => json!({
      "arrayValue": { "values": items.iter().map(encode).collect::<Vec<_>>() }
    }),
    Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
  }
}

/// Encode a field map into Firestore's `fields` object.
pub fn encode_fields(fields: &Fields) -> Value {
  Value::Object(
    fields
      .iter()
      .map(|(k, v)| (k.clone(), encode(v)))
      .collect::<Map<_, _>>(),
  )
}

/// Decode a Firestore `Value` into plain JSON.
///
/// Timestamps and references decode to their string form. Unknown shapes
/// decode to `null`.
pub fn decode(value: &Value) -> Value {
  let Some(obj) = value.as_object() else {
    return Value::Null;
  };
  let Some((kind, inner)) = obj.iter().next() else {
    return Value::Null;
  };

  match kind.as_str() {
    "nullValue" => Value::Null,
    "booleanValue" => Value::Bool(inner.as_bool().unwrap_or(false)),
    "integerValue" => match inner {
      Value::String(s) => s
        .parse::<i64>()
        .map(|i| Value::Number(i.into()))
        .unwrap_or(Value::Null),
      Value::Number(n) => Value::Number(n.clone()),
      _ => Value::Null,
    },
    "doubleValue" => inner
      .as_f64()
      .and_then(Number::from_f64)
      .map(Value::Number)
      .unwrap_or(Value::Null),
    "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
    "geoPointValue" => inner.clone(),
    "arrayValue" => Value::Array(
      inner
        .get("values")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(decode).collect())
        .unwrap_or_default(),
    ),
    "mapValue" => Value::Object(
      inner
        .get("fields")
        .and_then(Value::as_object)
        .map(decode_fields)
        .unwrap_or_default(),
    ),
    _ => Value::Null,
  }
}

/// Decode Firestore's `fields` object into a plain field map.
pub fn decode_fields(fields: &Map<String, Value>) -> Fields {
  fields
    .iter()
    .map(|(k, v)| (k.clone(), decode(v)))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_meeting_document() {
    let fields = json!({
      "roomId": "kamustahan01",
      "isActive": true,
      "participantCount": 3,
      "startedBy": null,
    });

    let encoded = encode_fields(fields.as_object().unwrap());
    assert_eq!(encoded["roomId"], json!({"stringValue": "kamustahan01"}));
    assert_eq!(encoded["isActive"], json!({"booleanValue": true}));
    assert_eq!(encoded["participantCount"], json!({"integerValue": "3"}));
    assert_eq!(encoded["startedBy"], json!({"nullValue": null}));
  }

  #[test]
  fn test_decode_nested_values() {
    let raw = json!({
      "score": {"doubleValue": 1.5},
      "createdAt": {"timestampValue": "2024-05-01T10:00:00Z"},
      "tags": {"arrayValue": {"values": [{"stringValue": "a"}, {"integerValue": "7"}]}},
      "profile": {"mapValue": {"fields": {"status": {"stringValue": "online"}}}},
      "empty": {"arrayValue": {}},
    });

    let decoded = decode_fields(raw.as_object().unwrap());
    assert_eq!(decoded["score"], json!(1.5));
    assert_eq!(decoded["createdAt"], json!("2024-05-01T10:00:00Z"));
    assert_eq!(decoded["tags"], json!(["a", 7]));
    assert_eq!(decoded["profile"], json!({"status": "online"}));
    assert_eq!(decoded["empty"], json!([]));
  }

  #[test]
  fn test_decode_unknown_shape_is_null() {
    assert_eq!(decode(&json!("bare")), Value::Null);
    assert_eq!(decode(&json!({"somethingValue": 1})), Value::Null);
  }
}
