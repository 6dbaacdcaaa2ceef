use crate::ProtocolError;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Resource property map exactly as the orchestrator sent it.
pub type Properties = Map<String, Value>;

/// Parse a property map into a typed per-resource struct.
///
/// The orchestrator injects bookkeeping keys such as `ServiceToken`, so the
/// target types must not deny unknown fields.
pub fn parse_properties<T: DeserializeOwned>(properties: &Properties) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(properties.clone()))
        .map_err(|e| ProtocolError::InvalidProperties(e.to_string()))
}

/// Accept a `u32` given either as a JSON number or as a decimal string.
///
/// The orchestrator stringifies every scalar property value before delivery.
pub fn u32_from_str_or_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an unsigned integer, got '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Sample {
        name: String,
        #[serde(default, deserialize_with = "u32_from_str_or_number")]
        ttl: u32,
    }

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn parses_stringified_numbers() {
        let sample: Sample = parse_properties(&props(json!({
            "ServiceToken": "arn:aws:lambda:us-east-1:1:function:hook",
            "Name": "app",
            "Ttl": "60"
        })))
        .unwrap();
        assert_eq!(sample.name, "app");
        assert_eq!(sample.ttl, 60);
    }

    #[test]
    fn parses_native_numbers() {
        let sample: Sample = parse_properties(&props(json!({"Name": "app", "Ttl": 120}))).unwrap();
        assert_eq!(sample.ttl, 120);
    }

    #[test]
    fn rejects_non_numeric_text() {
        let err = parse_properties::<Sample>(&props(json!({"Name": "app", "Ttl": "soon"})))
            .unwrap_err();
        assert!(err.to_string().contains("expected an unsigned integer"));
    }

    #[test]
    fn missing_required_property_is_reported() {
        let err = parse_properties::<Sample>(&props(json!({"Ttl": 1}))).unwrap_err();
        assert!(err.to_string().contains("Name"), "{err}");
    }
}
