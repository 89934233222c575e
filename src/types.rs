//! Plain Rust types exchanged between the provider and the protocol layer.
//!
//! The wire carries these as JSON bytes inside protobuf messages; the
//! conversions to and from [`crate::generated`] live here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if deleting).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// A change for a newly set attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// A change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// A change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }

    /// Compare one attribute across two states.
    ///
    /// `null` counts as absent, so `None` and `Some(Value::Null)` are equal.
    pub fn between(path: &str, before: Option<&Value>, after: Option<&Value>) -> Option<Self> {
        let before = before.filter(|v| !v.is_null());
        let after = after.filter(|v| !v.is_null());
        match (before, after) {
            (None, None) => None,
            (None, Some(a)) => Some(Self::added(path, a.clone())),
            (Some(b), None) => Some(Self::removed(path, b.clone())),
            (Some(b), Some(a)) if b == a => None,
            (Some(b), Some(a)) => Some(Self::modified(path, b.clone(), a.clone())),
        }
    }
}

fn decode_json(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(bytes).ok()
    }
}

fn encode_json(value: Option<Value>) -> Vec<u8> {
    value
        .map(|v| serde_json::to_vec(&v).unwrap_or_default())
        .unwrap_or_default()
}

impl From<crate::generated::AttributeChange> for AttributeChange {
    fn from(proto: crate::generated::AttributeChange) -> Self {
        Self {
            path: proto.path,
            before: decode_json(&proto.before),
            after: decode_json(&proto.after),
        }
    }
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: encode_json(change.before),
            after: encode_json(change.after),
        }
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// A plan with no changes.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// A plan with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether applying this plan does anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// A resource brought under management by import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// Server capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Whether the provider supports planning destroy operations.
    pub plan_destroy: bool,
}

/// The protocol version for the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix output by providers.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_change_between() {
        assert_eq!(
            AttributeChange::between("default_charset", None, Some(&json!("utf8mb4"))),
            Some(AttributeChange::added("default_charset", json!("utf8mb4")))
        );
        assert_eq!(
            AttributeChange::between("name", Some(&json!("app")), None),
            Some(AttributeChange::removed("name", json!("app")))
        );
        assert_eq!(
            AttributeChange::between("name", Some(&json!("a")), Some(&json!("b"))),
            Some(AttributeChange::modified("name", json!("a"), json!("b")))
        );
        assert!(AttributeChange::between("name", Some(&json!("a")), Some(&json!("a"))).is_none());
        assert!(AttributeChange::between("name", Some(&Value::Null), None).is_none());
    }

    #[test]
    fn test_attribute_change_conversion() {
        let change = AttributeChange::modified(
            "default_collation",
            json!("utf8_general_ci"),
            json!("utf8mb4_unicode_ci"),
        );

        let proto: crate::generated::AttributeChange = change.clone().into();
        assert_eq!(proto.path, "default_collation");
        assert_eq!(proto.before, br#""utf8_general_ci""#.to_vec());

        let back: AttributeChange = proto.into();
        assert_eq!(back, change);

        let added: crate::generated::AttributeChange =
            AttributeChange::added("id", json!("app")).into();
        assert!(added.before.is_empty());
    }

    #[test]
    fn test_plan_result() {
        let no_change = PlanResult::no_change(json!({"id": "app"}));
        assert!(!no_change.has_changes());
        assert!(!no_change.requires_replace);

        let replace = PlanResult::with_changes(
            json!({"id": "new", "name": "new"}),
            vec![AttributeChange::modified("name", json!("old"), json!("new"))],
            true,
        );
        assert!(replace.has_changes());
        assert!(replace.requires_replace);
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(PROTOCOL_VERSION, 1);
        assert_eq!(HANDSHAKE_PREFIX, "HEMMER_PROVIDER");
    }
}
