//! Converge patch generation.
//!
//! Two encodings are supported and one is fixed per object kind:
//!
//! - **Structural merge**: a partial document. Present fields carry desired values, absent
//!   fields are left alone and `null` deletes. Lists are replaced wholesale unless the kind
//!   registers a merge key for the list, in which case elements are matched by key.
//! - **Operation list**: an RFC 6902 JSON patch computed by the `json-patch` crate.
//!
//! Both sides are diffed through their `serde_json` serialization, so the generator never
//! looks at kind-specific fields.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::trace;

mod merge;

pub use json_patch::{Patch as OperationList, PatchOperation};

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("apply operations: {0}")]
    Operations(#[from] json_patch::PatchError),
}

/// Merge keys for lists that are merged element-wise instead of replaced.
///
/// A list path is the dotted chain of object keys from the document root; array
/// elements do not add a segment (`spec.template.spec.containers.ports`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeKeys {
    keys: Vec<(String, String)>,
}

impl MergeKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, list_path: impl Into<String>, key_field: impl Into<String>) -> Self {
        self.keys.push((list_path.into(), key_field.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_for(&self, list_path: &str) -> Option<&str> {
        self.keys.iter().find(|(p, _)| p == list_path).map(|(_, k)| k.as_str())
    }
}

/// Patch encoding used for one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchStrategy {
    StructuralMerge(MergeKeys),
    OperationList,
}

impl Default for PatchStrategy {
    fn default() -> Self {
        PatchStrategy::StructuralMerge(MergeKeys::default())
    }
}

impl PatchStrategy {
    pub fn merge_keys(&self) -> Option<&MergeKeys> {
        match self {
            PatchStrategy::StructuralMerge(keys) => Some(keys),
            PatchStrategy::OperationList => None,
        }
    }
}

/// A computed delta between two object states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Patch {
    Merge(Json),
    Operations(OperationList),
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        match self {
            Patch::Merge(doc) => doc.as_object().is_some_and(|m| m.is_empty()),
            Patch::Operations(ops) => ops.0.is_empty(),
        }
    }

    /// Wire body: the merge document or the JSON array of operations.
    pub fn to_json(&self) -> Result<Json, PatchError> {
        match self {
            Patch::Merge(doc) => Ok(doc.clone()),
            Patch::Operations(ops) => Ok(serde_json::to_value(ops)?),
        }
    }

    /// Apply to a serialized document. `strategy` supplies the merge keys for merge patches.
    pub fn apply(&self, doc: &mut Json, strategy: &PatchStrategy) -> Result<(), PatchError> {
        match self {
            Patch::Merge(patch) => {
                let none = MergeKeys::default();
                apply_merge(doc, patch, strategy.merge_keys().unwrap_or(&none));
                Ok(())
            }
            Patch::Operations(ops) => apply_operations(doc, ops),
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Ok(v) => write!(f, "{}", v),
            Err(e) => write!(f, "<unprintable patch: {}>", e),
        }
    }
}

/// Serialize both states and compute the patch that takes `current` to `desired`.
pub fn diff<T: Serialize + ?Sized>(current: &T, desired: &T, strategy: &PatchStrategy) -> Result<Patch, PatchError> {
    let cur = serde_json::to_value(current)?;
    let des = serde_json::to_value(desired)?;
    Ok(diff_values(&cur, &des, strategy))
}

/// Like [`diff`] for already serialized documents.
pub fn diff_values(current: &Json, desired: &Json, strategy: &PatchStrategy) -> Patch {
    let patch = match strategy {
        PatchStrategy::StructuralMerge(keys) => Patch::Merge(merge::diff(current, desired, keys)),
        PatchStrategy::OperationList => Patch::Operations(json_patch::diff(current, desired)),
    };
    trace!(empty = patch.is_empty(), "computed patch");
    patch
}

/// True when both values serialize to the same document.
pub fn same_state<T: Serialize + ?Sized>(a: &T, b: &T) -> Result<bool, PatchError> {
    Ok(serde_json::to_value(a)? == serde_json::to_value(b)?)
}

/// Merge a structural patch into `doc` in place.
pub fn apply_merge(doc: &mut Json, patch: &Json, keys: &MergeKeys) {
    merge::apply(doc, patch, keys, "");
}

/// Apply operations in order. The document is left untouched when any of them does not fit.
pub fn apply_operations(doc: &mut Json, ops: &OperationList) -> Result<(), PatchError> {
    json_patch::patch(doc, ops)?;
    Ok(())
}
