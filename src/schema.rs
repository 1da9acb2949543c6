//! Schema document access
//!
//! Schema documents are immutable `serde_json::Value` trees shared through
//! `Rc`. A [`SchemaRef`] addresses one node inside such a document by its
//! path from the document root, so two walks that land on the same node
//! compare equal. Compilation-unit identity and cycle detection both depend
//! on that: a pointer walk must never produce a "new" schema for a node that
//! is already being compiled.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

static NULL: Value = Value::Null;

/// A reference to one node inside an immutable schema document
#[derive(Clone)]
pub struct SchemaRef {
    doc: Rc<Value>,
    path: Vec<String>,
}

impl SchemaRef {
    /// Reference the root of a document
    pub fn root(doc: Rc<Value>) -> Self {
        Self { doc, path: Vec::new() }
    }

    /// Reference the root of an owned document
    pub fn from_value(doc: Value) -> Self {
        Self::root(Rc::new(doc))
    }

    /// The owning document
    pub fn doc(&self) -> &Rc<Value> {
        &self.doc
    }

    /// Whether this reference addresses the document root
    pub fn is_doc_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The addressed node
    pub fn node(&self) -> &Value {
        let mut node: &Value = &self.doc;
        for seg in &self.path {
            node = match node {
                Value::Object(map) => map.get(seg).unwrap_or(&NULL),
                Value::Array(items) => seg
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i))
                    .unwrap_or(&NULL),
                _ => &NULL,
            };
        }
        node
    }

    /// Step into a member (object key or array index), if it exists
    pub fn child(&self, segment: &str) -> Option<SchemaRef> {
        let exists = match self.node() {
            Value::Object(map) => map.contains_key(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .map(|i| i < items.len())
                .unwrap_or(false),
            _ => false,
        };
        if !exists {
            return None;
        }
        let mut path = self.path.clone();
        path.push(segment.to_string());
        Some(Self { doc: self.doc.clone(), path })
    }

    /// Whether two references address the same node of the same document
    pub fn same_node(&self, other: &SchemaRef) -> bool {
        Rc::ptr_eq(&self.doc, &other.doc) && self.path == other.path
    }

    /// Boolean-literal schema value, if this node is one
    pub fn as_bool(&self) -> Option<bool> {
        self.node().as_bool()
    }

    /// Whether the node is a boolean literal
    pub fn is_boolean(&self) -> bool {
        self.node().is_boolean()
    }

    /// Member lookup on an object node
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.node().as_object().and_then(|map| map.get(key))
    }

    /// The `$id` declared by this node, if any
    pub fn declared_id(&self) -> Option<&str> {
        self.get("$id").and_then(Value::as_str)
    }

    /// The `$ref` value of this node, if any
    pub fn ref_value(&self) -> Option<&str> {
        self.get("$ref").and_then(Value::as_str)
    }

    /// Whether the schema declares `$async: true`
    pub fn is_async(&self) -> bool {
        self.get("$async").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether the node is an object with at least one member
    ///
    /// An empty root is treated as "nothing declared yet" by the
    /// self-reference shortcut in resolution.
    pub fn has_members(&self) -> bool {
        self.node().as_object().map(|m| !m.is_empty()).unwrap_or(false)
    }
}

impl PartialEq for SchemaRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(other)
    }
}

impl fmt::Debug for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaRef(#/{})", self.path.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_walk() {
        let doc = SchemaRef::from_value(json!({
            "definitions": { "node": { "type": "object" } }
        }));
        let node = doc.child("definitions").unwrap().child("node").unwrap();
        assert_eq!(node.get("type").unwrap(), "object");
        assert!(doc.child("missing").is_none());
    }

    #[test]
    fn test_same_node_after_separate_walks() {
        let doc = SchemaRef::from_value(json!({ "a": { "b": 1 } }));
        let first = doc.child("a").unwrap();
        let second = doc.child("a").unwrap();
        assert!(first.same_node(&second));
        assert!(!first.same_node(&doc));
    }

    #[test]
    fn test_identity_distinguishes_documents() {
        let a = SchemaRef::from_value(json!({ "type": "string" }));
        let b = SchemaRef::from_value(json!({ "type": "string" }));
        assert!(!a.same_node(&b));
    }

    #[test]
    fn test_array_children() {
        let doc = SchemaRef::from_value(json!({ "allOf": [{ "type": "string" }] }));
        let first = doc.child("allOf").unwrap().child("0").unwrap();
        assert_eq!(first.get("type").unwrap(), "string");
        assert!(doc.child("allOf").unwrap().child("1").is_none());
    }

    #[test]
    fn test_boolean_schema() {
        let doc = SchemaRef::from_value(json!(true));
        assert_eq!(doc.as_bool(), Some(true));
        assert!(doc.child("anything").is_none());
    }
}
