//! Structured cache keys
//!
//! A [`QueryKey`] is a JSON array. Keys are compared element-wise and a key
//! addresses every key it is a prefix of, which is what invalidation,
//! cancellation, and removal rely on.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::PageQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<Value>);

impl QueryKey {
    pub fn new(segments: Vec<Value>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new key with `segment` appended
    pub fn child(&self, segment: impl Into<Value>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }

    /// Stable string form used as the map key inside the cache
    pub fn hash_key(&self) -> String {
        Value::Array(self.0.clone()).to_string()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash_key())
    }
}

/// Key scheme for one resource tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryKeys {
    tag: &'static str,
}

impl QueryKeys {
    pub const fn new(tag: &'static str) -> Self {
        Self { tag }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// `[tag]`
    pub fn all(&self) -> QueryKey {
        QueryKey(vec![json!(self.tag)])
    }

    /// `[tag, "list"]`
    pub fn lists(&self) -> QueryKey {
        self.all().child("list")
    }

    /// `[tag, "list", {query}]`
    pub fn list(&self, query: &PageQuery) -> QueryKey {
        let params = serde_json::to_value(query).unwrap_or(Value::Null);
        self.lists().child(params)
    }

    /// `[tag, "list", "children", parent_id]`
    pub fn children(&self, parent_id: &str) -> QueryKey {
        self.lists().child("children").child(parent_id)
    }

    /// `[tag, id]`
    pub fn detail_root(&self, id: &str) -> QueryKey {
        self.all().child(id)
    }

    /// `[tag, id, "detail"]`
    pub fn detail(&self, id: &str) -> QueryKey {
        self.detail_root(id).child("detail")
    }

    /// `[tag, id, "summary"]`
    pub fn summary(&self, id: &str) -> QueryKey {
        self.detail_root(id).child("summary")
    }
}
