//! Path-addressed lookups over a parsed API response.
//!
//! Paths are `/`-separated. A segment is an element name, an `@attribute`
//! (JSON has no distinction, so both address an object field), or `_v`/`*`
//! for "any single child" when the tag is not known. Arrays fan out: a named
//! segment applied to an array is applied to each element in order.
//!
//! Lookups never fail. A missing node yields `""`, an empty `Vec` or `None`.

use std::fmt;

use serde_json::Value;

/// Wildcard segments matching any child.
const WILDCARDS: [&str; 2] = ["_v", "*"];

/// A node in a parsed API response.
#[derive(Clone, PartialEq)]
pub struct ApiResult {
    root: Value,
}

impl fmt::Debug for ApiResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiResult").field(&self.root).finish()
    }
}

impl From<Value> for ApiResult {
    fn from(root: Value) -> Self {
        Self { root }
    }
}

impl ApiResult {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns the parser error if `body` is not JSON.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(body).map(Self::from)
    }

    /// Returns the underlying JSON value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.root
    }

    /// Returns the first scalar at `path` rendered as a string, or `""`.
    ///
    /// Strings are returned as-is; numbers and booleans use their JSON text.
    #[must_use]
    pub fn get_string(&self, path: &str) -> String {
        resolve(&self.root, path)
            .into_iter()
            .find_map(scalar_text)
            .unwrap_or_default()
    }

    /// Returns every node at `path` in document order.
    ///
    /// A terminal array contributes each of its elements.
    #[must_use]
    pub fn get_nodes(&self, path: &str) -> Vec<ApiResult> {
        resolve(&self.root, path)
            .into_iter()
            .flat_map(|node| match node {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .map(|node| ApiResult::from(node.clone()))
            .collect()
    }

    /// Returns the first node at `path`.
    #[must_use]
    pub fn get_node(&self, path: &str) -> Option<ApiResult> {
        resolve(&self.root, path)
            .into_iter()
            .next()
            .map(|node| ApiResult::from(node.clone()))
    }

    /// Returns true when `path` addresses at least one non-null node.
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        !resolve(&self.root, path).is_empty()
    }

    /// Returns the `(code, info)` of a top-level MediaWiki `error` object.
    #[must_use]
    pub fn error(&self) -> Option<(String, String)> {
        let code = self.get_string("/error/@code");
        if code.is_empty() {
            return None;
        }
        Some((code, self.get_string("/error/@info")))
    }

    /// Returns the string fields of the object at `path`.
    ///
    /// Non-string members are rendered like [`get_string`](Self::get_string).
    #[must_use]
    pub fn get_string_map(&self, path: &str) -> Option<Vec<(String, String)>> {
        let node = resolve(&self.root, path).into_iter().next()?;
        let Value::Object(fields) = node else {
            return None;
        };
        Some(
            fields
                .iter()
                .filter_map(|(key, value)| scalar_text(value).map(|text| (key.clone(), text)))
                .collect(),
        )
    }
}

fn resolve<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![root];
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        let mut next = Vec::new();
        for node in current {
            step(node, segment, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current.retain(|node| !node.is_null());
    current
}

fn step<'a>(node: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match node {
        // Elements already are the children of an array
        Value::Array(items) if WILDCARDS.contains(&segment) => out.extend(items),
        Value::Array(items) => {
            for item in items {
                step(item, segment, out);
            }
        }
        Value::Object(fields) => {
            if WILDCARDS.contains(&segment) {
                out.extend(fields.values());
            } else {
                let key = segment.strip_prefix('@').unwrap_or(segment);
                if let Some(child) = fields.get(key) {
                    out.push(child);
                }
            }
        }
        _ => {}
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
