//! Schema validation helpers.
//!
//! [`validate`] checks a `serde_json::Value` against a [`Schema`] (presence
//! and types). The attribute validators below cover value constraints the
//! schema cannot express, such as enumerations and patterns.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_mysql::schema::{Attribute, Schema};
//! use hemmer_provider_mysql::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("endpoint", Attribute::required_string())
//!     .with_attribute("max_open_conns", Attribute::optional_int64());
//!
//! let diagnostics = validate(&schema, &json!({"endpoint": "db:3306"}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"endpoint": "db:3306", "max_open_conns": "ten"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("max_open_conns".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use regex::Regex;
use serde_json::Value;

/// Validate a JSON object against a schema.
///
/// Returns a list of diagnostics; an empty list means the value is valid.
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        Value::Null => {
            for (name, attr) in &schema.block.attributes {
                validate_attribute(attr, None, name, &mut diagnostics);
            }
            return diagnostics;
        },
        other => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(other))),
            );
            return diagnostics;
        },
    };

    // Sorted for stable diagnostic order
    let mut names: Vec<_> = schema.block.attributes.keys().collect();
    names.sort();
    for name in names {
        let attr = &schema.block.attributes[name];
        validate_attribute(attr, obj.get(name), name, &mut diagnostics);
    }

    diagnostics
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
    }
}

/// Check that a string attribute is one of `allowed`.
///
/// Absent or non-string values are left to [`validate`].
pub fn string_in_slice(
    value: Option<&Value>,
    allowed: &[&str],
    ignore_case: bool,
    path: &str,
) -> Option<Diagnostic> {
    let s = value?.as_str()?;
    let matches = allowed.iter().any(|candidate| {
        if ignore_case {
            candidate.eq_ignore_ascii_case(s)
        } else {
            *candidate == s
        }
    });
    if matches {
        return None;
    }
    Some(
        Diagnostic::error(format!("Invalid value for attribute '{}'", path))
            .with_detail(format!("expected {} to be one of {:?}, got {}", path, allowed, s))
            .with_attribute(path),
    )
}

/// Check that a string attribute matches `pattern`, reporting `message` if not.
pub fn string_matches(
    value: Option<&Value>,
    pattern: &Regex,
    message: &str,
    path: &str,
) -> Option<Diagnostic> {
    let s = value?.as_str()?;
    if pattern.is_match(s) {
        return None;
    }
    Some(
        Diagnostic::error(format!("Invalid value for attribute '{}'", path))
            .with_detail(message.to_string())
            .with_attribute(path),
    )
}

/// Check that a string attribute is not empty.
pub fn string_not_empty(value: Option<&Value>, path: &str) -> Option<Diagnostic> {
    let s = value?.as_str()?;
    if !s.trim().is_empty() {
        return None;
    }
    Some(
        Diagnostic::error(format!("Attribute '{}' must not be an empty string", path))
            .with_attribute(path),
    )
}

/// Check that an integer attribute is not negative.
pub fn int_at_least(value: Option<&Value>, min: i64, path: &str) -> Option<Diagnostic> {
    let n = value?.as_i64()?;
    if n >= min {
        return None;
    }
    Some(
        Diagnostic::error(format!("Invalid value for attribute '{}'", path))
            .with_detail(format!("expected {} to be at least {}, got {}", path, min, n))
            .with_attribute(path),
    )
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        ))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "app"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        assert_eq!(validate(&schema, &json!({"name": null})).len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_null_config_reports_required() {
        let schema = Schema::v0()
            .with_attribute("endpoint", Attribute::required_string())
            .with_attribute("proxy", Attribute::optional_string());

        let diagnostics = validate(&schema, &Value::Null);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("endpoint"));
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("id", Attribute::computed_string());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"id": 123})).is_empty());
    }

    #[test]
    fn test_validate_int64() {
        let schema = Schema::v0().with_attribute("max_open_conns", Attribute::optional_int64());

        assert!(validate(&schema, &json!({"max_open_conns": 10})).is_empty());
        assert!(validate(&schema, &json!({"max_open_conns": 10.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"max_open_conns": 1.5})).len(), 1);
        assert_eq!(validate(&schema, &json!({"max_open_conns": "10"})).len(), 1);
        assert_eq!(validate(&schema, &json!({"max_open_conns": true})).len(), 1);
    }

    #[test]
    fn test_validate_string_map() {
        let schema = Schema::v0().with_attribute("conn_params", Attribute::optional_string_map());

        assert!(validate(&schema, &json!({"conn_params": {"sql_mode": "'ANSI'"}})).is_empty());

        let diagnostics = validate(&schema, &json!({"conn_params": {"wait_timeout": 30}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute.as_deref(),
            Some("conn_params.wait_timeout")
        );

        assert_eq!(validate(&schema, &json!({"conn_params": ["a"]})).len(), 1);
    }

    #[test]
    fn test_validate_non_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::optional_string());
        let diagnostics = validate(&schema, &json!("name"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].detail.as_deref(), Some("Got string"));
    }

    #[test]
    fn test_string_in_slice() {
        let allowed = ["true", "false", "skip-verify"];
        assert!(string_in_slice(Some(&json!("skip-verify")), &allowed, false, "tls").is_none());
        assert!(string_in_slice(None, &allowed, false, "tls").is_none());

        let diag = string_in_slice(Some(&json!("TRUE")), &allowed, false, "tls").unwrap();
        assert_eq!(diag.attribute.as_deref(), Some("tls"));
        assert!(diag.detail.unwrap().contains("TRUE"));

        assert!(string_in_slice(Some(&json!("Native")), &["native"], true, "p").is_none());
    }

    #[test]
    fn test_string_matches() {
        let pattern = Regex::new(r"^socks5h?://.*:\d+$").unwrap();
        let message = "The proxy URL is not a valid socks url.";

        assert!(string_matches(Some(&json!("socks5://p:1080")), &pattern, message, "proxy").is_none());

        let diag =
            string_matches(Some(&json!("http://p:8080")), &pattern, message, "proxy").unwrap();
        assert_eq!(diag.detail.as_deref(), Some(message));
    }

    #[test]
    fn test_string_not_empty_and_int_at_least() {
        assert!(string_not_empty(Some(&json!("db:3306")), "endpoint").is_none());
        assert!(string_not_empty(Some(&json!("  ")), "endpoint").is_some());

        assert!(int_at_least(Some(&json!(0)), 0, "max_open_conns").is_none());
        assert!(int_at_least(Some(&json!(-1)), 0, "max_open_conns").is_some());
    }
}
