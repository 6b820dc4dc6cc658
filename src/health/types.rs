use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a `GET /health` answer.
///
/// JSON objects are read field by field; any other body is kept verbatim as the status.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: Option<String>,
    /// Remaining backend-specific fields
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl HealthResponse {
    /// Build from a raw response body.
    pub fn from_body(body: &str) -> crate::Result<Self> {
        match serde_json::from_str::<Value>(body) {
            Ok(value @ Value::Object(_)) => crate::serde_helpers::deserialize_with_warnings(value),
            _ => Ok(Self {
                status: Some(body.trim().to_owned()),
                details: Map::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_body_is_split_into_status_and_details() {
        let response =
            HealthResponse::from_body(r#"{"status": "ok", "version": "1.2.0"}"#).unwrap();

        assert_eq!(response.status.as_deref(), Some("ok"));
        assert_eq!(response.details.get("version"), Some(&json!("1.2.0")));
    }

    #[test]
    fn plain_body_becomes_status() {
        let response = HealthResponse::from_body("OK\n").unwrap();

        assert_eq!(response.status.as_deref(), Some("OK"));
        assert!(response.details.is_empty());
    }
}
