//! Parameter validation against a task's JSON schema.
//!
//! Covers the subset the built-in tasks and the original parameter models
//! actually use: an object root, `properties` with scalar/array types, and
//! `required`. Properties not named in the schema are accepted and passed
//! through to the child untouched.

use serde_json::Value;

use taskhub_errors::{TaskHubError, TaskHubResult};

pub fn validate(params: &Value, schema: &Value) -> TaskHubResult<()> {
    let Some(obj) = params.as_object() else {
        return Err(TaskHubError::invalid_params("params must be a JSON object"));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(TaskHubError::invalid_params(format!(
                    "missing required parameter: {key}"
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, prop_schema) in properties {
        let Some(value) = obj.get(key) else {
            continue;
        };
        let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
            continue;
        };
        if !type_matches(value, expected) {
            return Err(TaskHubError::invalid_params(format!(
                "parameter {key} must be of type {expected}"
            )));
        }
    }

    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keyword: accept rather than reject at enqueue time.
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "message": {"type": "string"},
                "verbose": {"type": "boolean"},
                "ratio": {"type": "number"}
            },
            "required": ["message"]
        })
    }

    #[test]
    fn accepts_valid_params() {
        let params = json!({"message": "hi", "count": 3, "verbose": true, "ratio": 0.5});
        assert!(validate(&params, &schema()).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate(&json!({"count": 3}), &schema()).unwrap_err();
        assert!(err.to_string().contains("message"));
    }

    #[test]
    fn rejects_wrong_type() {
        let err = validate(&json!({"message": "hi", "count": "three"}), &schema()).unwrap_err();
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn rejects_non_object_root() {
        assert!(validate(&json!([1, 2]), &schema()).is_err());
    }

    #[test]
    fn integer_accepts_both_sign_ranges() {
        let params = json!({"message": "hi", "count": -1});
        assert!(validate(&params, &schema()).is_ok());
    }

    #[test]
    fn extra_properties_pass_through() {
        let params = json!({"message": "hi", "unlisted": [1, 2, 3]});
        assert!(validate(&params, &schema()).is_ok());
    }
}
