//! JSON-patch style operations for sub-resource updates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// A single patch operation against a resource document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl Patch {
    /// Replace (or add) an entire top-level sub-resource.
    pub fn replace_sub_resource(name: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: format!("/{}", name),
            value,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: Value::Null,
        }
    }

    /// Name of the sub-resource this patch targets.
    pub fn sub_resource(&self) -> &str {
        self.path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }
}
