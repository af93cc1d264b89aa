//! Expansion of composite requests into per-item operations.
//!
//! Bulk and multi-search bodies are newline-delimited JSON: an action or
//! header line, followed (except for deletes) by a source or query line.
//! Watch rules and diffs apply to the items, never to the envelope.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::projection::SourceFilter;

/// A bulk body that cannot be expanded.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A line is not valid JSON.
    #[error("line {line}: invalid JSON: {source}")]
    InvalidJson {
        /// One-based line number.
        line: usize,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// An action line names an unsupported action.
    #[error("line {line}: unknown bulk action '{action}'")]
    UnknownAction {
        /// One-based line number.
        line: usize,
        /// The action name found.
        action: String,
    },

    /// No index on the action line and no default index.
    #[error("line {line}: no index given and no default index")]
    MissingIndex {
        /// One-based line number.
        line: usize,
    },

    /// An index, create or update action is not followed by a source line.
    #[error("line {line}: action has no source line")]
    MissingSource {
        /// One-based line number.
        line: usize,
    },

    /// An action line is not an object with exactly one action key.
    #[error("line {line}: malformed action line")]
    MalformedAction {
        /// One-based line number.
        line: usize,
    },
}

/// Bulk sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    /// Create or overwrite a document.
    Index,
    /// Create a document that must not exist.
    Create,
    /// Partially update an existing document.
    Update,
    /// Delete a document.
    Delete,
}

impl BulkAction {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "index" => Some(BulkAction::Index),
            "create" => Some(BulkAction::Create),
            "update" => Some(BulkAction::Update),
            "delete" => Some(BulkAction::Delete),
            _ => None,
        }
    }
}

/// One document operation of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    /// Sub-operation.
    pub action: BulkAction,
    /// Concrete target index.
    pub index: String,
    /// Document id, absent for auto-generated ids.
    pub doc_id: Option<String>,
    /// New source for index/create, the partial `doc` for update, `None`
    /// for delete.
    pub fragment: Option<Value>,
}

impl BulkItem {
    /// The document state after this item, given the state before it.
    ///
    /// Updates merge the fragment into `previous`; deletes yield `None`.
    pub fn updated(&self, previous: Option<&Value>) -> Option<Value> {
        match self.action {
            BulkAction::Delete => None,
            BulkAction::Index | BulkAction::Create => self.fragment.clone(),
            BulkAction::Update => {
                let mut doc = previous.cloned().unwrap_or_else(|| Value::Object(Map::new()));
                if let Some(fragment) = &self.fragment {
                    merge_partial(&mut doc, fragment);
                }
                Some(doc)
            }
        }
    }
}

/// Merges a partial document into `target`, recursing into objects.
pub fn merge_partial(target: &mut Value, partial: &Value) {
    match (target, partial) {
        (Value::Object(target), Value::Object(partial)) => {
            for (key, value) in partial {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                match target.get_mut(key) {
                    Some(existing) if nested => merge_partial(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, partial) => *target = partial.clone(),
    }
}

/// Expands a bulk body into items, in request order.
///
/// # Errors
///
/// Returns [`ResolveError`] for the first malformed line; no partial list
/// is returned.
///
/// # Examples
///
/// ```
/// use compliance_audit::resolve::{expand_bulk, BulkAction};
///
/// let body = "{\"index\":{\"_id\":\"1\"}}\n{\"Age\":1}\n{\"delete\":{\"_index\":\"hr\",\"_id\":\"2\"}}\n";
/// let items = expand_bulk(Some("emp"), body).unwrap();
/// assert_eq!(items.len(), 2);
/// assert_eq!(items[0].index, "emp");
/// assert_eq!(items[1].action, BulkAction::Delete);
/// ```
pub fn expand_bulk(default_index: Option<&str>, body: &str) -> Result<Vec<BulkItem>, ResolveError> {
    let mut lines = body
        .lines()
        .enumerate()
        .map(|(n, l)| (n + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());
    let mut items = Vec::new();

    while let Some((line, text)) = lines.next() {
        let header = parse_line(line, text)?;
        let Some((name, meta)) = single_entry(&header) else {
            return Err(ResolveError::MalformedAction { line });
        };
        let action = BulkAction::parse(name).ok_or_else(|| ResolveError::UnknownAction {
            line,
            action: name.to_string(),
        })?;
        let meta = meta.as_object().ok_or(ResolveError::MalformedAction { line })?;

        let index = meta
            .get("_index")
            .and_then(Value::as_str)
            .or(default_index)
            .ok_or(ResolveError::MissingIndex { line })?
            .to_string();
        let doc_id = meta.get("_id").and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let fragment = if action == BulkAction::Delete {
            None
        } else {
            let (source_line, source_text) =
                lines.next().ok_or(ResolveError::MissingSource { line })?;
            let source = parse_line(source_line, source_text)?;
            if action == BulkAction::Update {
                Some(source.get("doc").cloned().unwrap_or(Value::Object(Map::new())))
            } else {
                Some(source)
            }
        };

        items.push(BulkItem {
            action,
            index,
            doc_id,
            fragment,
        });
    }
    Ok(items)
}

/// One search of a multi-search request.
#[derive(Debug, Clone)]
pub struct SearchItem {
    /// Target indices or patterns.
    pub indices: Vec<String>,
    /// Requested source fields.
    pub filter: SourceFilter,
    /// The query body.
    pub body: Value,
}

/// Expands a multi-search body into one item per header/body pair.
///
/// A missing, empty or malformed header falls back to `default_indices`;
/// a malformed body is treated as empty. A trailing header without a body
/// still yields an item.
pub fn expand_msearch(default_indices: &[&str], body: &str) -> Vec<SearchItem> {
    let mut lines: Vec<&str> = body.lines().map(str::trim).collect();
    // Interior blank lines are empty headers and keep the pairing intact.
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let defaults = || default_indices.iter().map(|s| s.to_string()).collect();

    lines
        .chunks(2)
        .map(|pair| {
            let header: Value = serde_json::from_str(pair[0]).unwrap_or(Value::Null);
            let indices = match header.get("index") {
                Some(Value::String(s)) => s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            let indices = if indices.is_empty() { defaults() } else { indices };

            let body = pair
                .get(1)
                .and_then(|b| serde_json::from_str(b).ok())
                .unwrap_or_else(|| Value::Object(Map::new()));
            SearchItem {
                indices,
                filter: SourceFilter::from_body(&body),
                body,
            }
        })
        .collect()
}

fn parse_line(line: usize, text: &str) -> Result<Value, ResolveError> {
    serde_json::from_str(text).map_err(|source| ResolveError::InvalidJson { line, source })
}

fn single_entry(value: &Value) -> Option<(&str, &Value)> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.iter().next().map(|(k, v)| (k.as_str(), v))
}
