//! Watched-field projection for read events.
//!
//! Categorization happens at index level, payload filtering at field level:
//! a read of a watched index discloses only the leaves of the document that
//! are both watched and requested. Traversal never fails; a requested path
//! that does not resolve simply contributes nothing.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::ReadWatch;
use crate::pattern::Matcher;

/// Field selection requested by a read (`_source` in a search body).
#[derive(Debug, Clone, Default)]
pub enum SourceFilter {
    /// No explicit selection: the whole source is returned.
    #[default]
    All,
    /// `_source: false`: no source is returned.
    Disabled,
    /// Explicit include/exclude patterns.
    Select {
        /// Included field patterns; empty means all.
        includes: Matcher,
        /// Excluded field patterns.
        excludes: Matcher,
    },
}

impl SourceFilter {
    /// Selects only the given field patterns.
    ///
    /// Patterns that fail to compile are dropped; an unusable include list
    /// then selects nothing rather than everything.
    pub fn includes<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields: Vec<String> = fields.into_iter().map(|f| f.as_ref().to_string()).collect();
        Self::select(&fields, &[])
    }

    fn select(includes: &[String], excludes: &[String]) -> Self {
        let compile = |patterns: &[String]| {
            let valid: Vec<&String> = patterns
                .iter()
                .filter(|p| Matcher::compile([p.as_str()]).is_ok())
                .collect();
            (Matcher::compile(valid.iter().map(|p| p.as_str())).unwrap_or_default(), valid.len())
        };

        let (inc, kept) = compile(includes);
        if !includes.is_empty() && kept == 0 {
            return SourceFilter::Disabled;
        }
        let (exc, _) = compile(excludes);
        SourceFilter::Select {
            includes: inc,
            excludes: exc,
        }
    }

    /// Reads the `_source` clause of a search or get body.
    ///
    /// Accepts `true`/`false`, a single pattern, a list of patterns, or an
    /// object with `includes`/`excludes`. Anything else means
    /// [`SourceFilter::All`].
    pub fn from_body(body: &Value) -> Self {
        let Some(source) = body.get("_source") else {
            return SourceFilter::All;
        };
        match source {
            Value::Bool(false) => SourceFilter::Disabled,
            Value::String(field) => Self::select(&[field.clone()], &[]),
            Value::Array(items) => Self::select(&strings(items), &[]),
            Value::Object(obj) => {
                let list = |key: &str| match obj.get(key) {
                    Some(Value::Array(items)) => strings(items),
                    Some(Value::String(s)) => vec![s.clone()],
                    _ => Vec::new(),
                };
                Self::select(&list("includes"), &list("excludes"))
            }
            _ => SourceFilter::All,
        }
    }

    fn allows(&self, path: &str) -> bool {
        match self {
            SourceFilter::All => true,
            SourceFilter::Disabled => false,
            SourceFilter::Select { includes, excludes } => {
                (includes.is_empty() || includes.matches_path(path)) && !excludes.matches_path(path)
            }
        }
    }
}

fn strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Fields disclosed by a read, keyed by dotted path in sorted order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedactedFields {
    fields: BTreeMap<String, Value>,
}

impl RedactedFields {
    /// Number of disclosed fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if nothing was disclosed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of a disclosed field.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.fields.get(path)
    }

    /// Disclosed field paths in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Mutable access to the disclosed values.
    pub fn values_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.fields.iter_mut()
    }

    /// Renders the fields as a flat JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

/// Projects a document onto the watched and requested fields of `index`.
///
/// The result is always a subset of the watched fields, whatever the
/// request asked for. Objects are descended into; arrays and scalars are
/// leaves.
pub fn project(
    document: &Value,
    index: &str,
    requested: &SourceFilter,
    watch: &ReadWatch,
) -> RedactedFields {
    let mut fields = BTreeMap::new();
    if matches!(requested, SourceFilter::Disabled) || !watch.watches_index(index) {
        return RedactedFields { fields };
    }

    let mut leaves = Vec::new();
    collect_leaves(document, String::new(), &mut leaves);

    for (path, value) in leaves {
        if watch.is_field_watched(index, &path) && requested.allows(&path) {
            fields.insert(path, value.clone());
        }
    }
    RedactedFields { fields }
}

fn collect_leaves<'a>(value: &'a Value, prefix: String, out: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect_leaves(child, path, out);
            }
        }
        // A non-object root has no field names to disclose.
        _ if prefix.is_empty() => {}
        _ => out.push((prefix, value)),
    }
}
