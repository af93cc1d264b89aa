//! Structured before/after patches for document updates.
//!
//! A [`DiffPatch`] is an ordered list of `add`/`replace`/`remove`
//! operations addressed by JSON pointer. Object keys are visited in sorted
//! order, so the same pair of documents always yields a byte-identical
//! patch.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::pattern::Matcher;
use crate::redact::{mask_below, REDACTED};

/// Errors from computing or applying a patch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    /// The two states cannot be compared field by field.
    #[error("cannot diff a {previous} against a {updated}; documents must be objects")]
    Incomparable {
        /// JSON type of the previous state.
        previous: &'static str,
        /// JSON type of the updated state.
        updated: &'static str,
    },

    /// A patch path does not address a location in the document.
    #[error("patch path '{0}' does not resolve")]
    InvalidPath(String),

    /// The patch only records that the document was replaced.
    #[error("coarse patch cannot be applied")]
    Coarse,
}

/// Kind of a patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    /// A field was added.
    Add,
    /// A field changed value.
    Replace,
    /// A field was removed.
    Remove,
}

/// One operation of a patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOp {
    op: PatchOpKind,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

impl PatchOp {
    /// Operation kind.
    pub fn op(&self) -> PatchOpKind {
        self.op
    }

    /// JSON pointer of the changed location, e.g. `/customer/Age`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// New value for `add` and `replace`.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub(crate) fn value_mut(&mut self) -> Option<&mut Value> {
        self.value.as_mut()
    }

    /// Last segment of the path, unescaped.
    pub fn field(&self) -> String {
        self.path
            .rsplit('/')
            .next()
            .map(unescape)
            .unwrap_or_default()
    }
}

/// Ordered patch describing an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffPatch {
    ops: Vec<PatchOp>,
    replaced: bool,
}

impl DiffPatch {
    /// Patch recording only that the whole document was replaced.
    pub fn replaced_document() -> Self {
        Self {
            ops: Vec::new(),
            replaced: true,
        }
    }

    /// Operations in path order.
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    pub(crate) fn ops_mut(&mut self) -> &mut [PatchOp] {
        &mut self.ops
    }

    /// Returns `true` for a coarse "document replaced" patch.
    pub fn is_replaced(&self) -> bool {
        self.replaced
    }

    /// Returns `true` if nothing changed.
    pub fn is_noop(&self) -> bool {
        self.ops.is_empty() && !self.replaced
    }

    /// Applies the patch to `previous`.
    ///
    /// For unmasked paths the result equals the updated document the
    /// patch was computed from.
    ///
    /// # Errors
    ///
    /// [`DiffError::Coarse`] for a replaced-document patch and
    /// [`DiffError::InvalidPath`] if an operation does not fit `previous`.
    pub fn apply(&self, previous: &Value) -> Result<Value, DiffError> {
        if self.replaced {
            return Err(DiffError::Coarse);
        }
        let mut doc = previous.clone();
        for op in &self.ops {
            apply_op(&mut doc, op)?;
        }
        Ok(doc)
    }

    /// JSON rendering: the array of operations.
    pub fn to_value(&self) -> Value {
        if self.replaced {
            return json!([{"op": "replace", "path": ""}]);
        }
        serde_json::to_value(&self.ops).unwrap_or(Value::Array(Vec::new()))
    }
}

/// Computes the patch that turns `previous` into `updated`.
///
/// Values at paths matching `masked` (dotted form, e.g. `customer.ssn`) are
/// replaced with the redaction marker; the operation itself is kept.
///
/// # Errors
///
/// Returns [`DiffError::Incomparable`] unless both documents are objects.
///
/// # Examples
///
/// ```
/// use compliance_audit::diff::{diff, PatchOpKind};
/// use compliance_audit::Matcher;
/// use serde_json::json;
///
/// let patch = diff(&json!({"Age": 123}), &json!({"Age": 555}), &Matcher::default()).unwrap();
/// assert_eq!(patch.ops().len(), 1);
/// assert_eq!(patch.ops()[0].op(), PatchOpKind::Replace);
/// assert_eq!(patch.ops()[0].path(), "/Age");
/// ```
pub fn diff(previous: &Value, updated: &Value, masked: &Matcher) -> Result<DiffPatch, DiffError> {
    let (Value::Object(prev), Value::Object(next)) = (previous, updated) else {
        return Err(DiffError::Incomparable {
            previous: type_name(previous),
            updated: type_name(updated),
        });
    };
    let mut ops = Vec::new();
    diff_objects(prev, next, "", "", masked, &mut ops);
    Ok(DiffPatch {
        ops,
        replaced: false,
    })
}

fn diff_objects(
    prev: &Map<String, Value>,
    next: &Map<String, Value>,
    pointer: &str,
    dotted: &str,
    masked: &Matcher,
    ops: &mut Vec<PatchOp>,
) {
    let keys: BTreeSet<&String> = prev.keys().chain(next.keys()).collect();
    for key in keys {
        let path = format!("{pointer}/{}", escape(key));
        let field = if dotted.is_empty() {
            key.clone()
        } else {
            format!("{dotted}.{key}")
        };
        let is_masked = masked.matches(&field);
        let shown = |v: &Value| {
            if is_masked {
                return Value::String(REDACTED.to_string());
            }
            let mut v = v.clone();
            mask_below(&mut v, &field, masked);
            v
        };

        match (prev.get(key), next.get(key)) {
            (Some(_), None) => ops.push(PatchOp {
                op: PatchOpKind::Remove,
                path,
                value: None,
            }),
            (None, Some(new)) => ops.push(PatchOp {
                op: PatchOpKind::Add,
                path,
                value: Some(shown(new)),
            }),
            (Some(old), Some(new)) if old == new => {}
            (Some(Value::Object(old)), Some(Value::Object(new))) if !is_masked => {
                diff_objects(old, new, &path, &field, masked, ops);
            }
            (Some(_), Some(new)) => ops.push(PatchOp {
                op: PatchOpKind::Replace,
                path,
                value: Some(shown(new)),
            }),
            (None, None) => {}
        }
    }
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), DiffError> {
    let invalid = || DiffError::InvalidPath(op.path.clone());
    let mut segments: Vec<String> = op
        .path
        .strip_prefix('/')
        .ok_or_else(invalid)?
        .split('/')
        .map(unescape)
        .collect();
    let last = segments.pop().ok_or_else(invalid)?;

    let mut target = doc;
    for segment in &segments {
        target = target
            .as_object_mut()
            .and_then(|m| m.get_mut(segment))
            .ok_or_else(invalid)?;
    }
    let parent = target.as_object_mut().ok_or_else(invalid)?;

    match op.op {
        PatchOpKind::Add | PatchOpKind::Replace => {
            let value = op.value.clone().ok_or_else(invalid)?;
            parent.insert(last, value);
        }
        PatchOpKind::Remove => {
            parent.remove(&last).ok_or_else(invalid)?;
        }
    }
    Ok(())
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
