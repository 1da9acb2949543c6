//! Schema registry
//!
//! Maps normalized ids to compilation units, alias strings or raw documents.
//! Insertion and eviction policy stay with the caller; the compiler only
//! reads. Alias chains are followed until a non-alias entry (with a cycle
//! guard, since aliases are caller-supplied). A raw document is upgraded to
//! a self-rooted unit the first time resolution touches it.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde_json::Value;

use crate::error::{Result, SchemaError};
use crate::resolve::normalize_id;
use crate::schema::SchemaRef;
use crate::unit::{collect_local_refs, LocalRefs, SchemaUnit};

enum RegistryEntry {
    Unit(Rc<SchemaUnit>),
    Alias(String),
    Document {
        doc: Rc<Value>,
        local_refs: Rc<LocalRefs>,
    },
}

/// What a registry lookup produced after alias following
pub(crate) enum RegistryHit {
    Unit(Rc<SchemaUnit>),
    Alias(String),
}

/// In-memory id registry
#[derive(Default)]
pub struct SchemaRegistry {
    entries: RefCell<HashMap<String, RegistryEntry>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compilation unit under a normalized id
    pub fn insert_unit(&self, id: &str, unit: Rc<SchemaUnit>) -> Result<()> {
        self.insert(id, RegistryEntry::Unit(unit))
    }

    /// Register a raw document; it becomes a unit on first resolution
    pub fn insert_document(&self, id: &str, doc: Value) -> Result<()> {
        let id = normalize_id(id);
        let doc = Rc::new(doc);
        let local_refs = Rc::new(collect_local_refs(&SchemaRef::root(doc.clone()), &id)?);
        self.insert(&id, RegistryEntry::Document { doc, local_refs })
    }

    /// Register an alias: a ref string standing for another ref string
    pub fn insert_alias(&self, from: &str, to: &str) -> Result<()> {
        self.insert(from, RegistryEntry::Alias(normalize_id(to)))
    }

    fn insert(&self, id: &str, entry: RegistryEntry) -> Result<()> {
        let id = normalize_id(id);
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&id) {
            return Err(SchemaError::AlreadyRegistered { id });
        }
        entries.insert(id, entry);
        Ok(())
    }

    /// Remove an entry, returning whether it existed
    pub fn remove(&self, id: &str) -> bool {
        self.entries.borrow_mut().remove(&normalize_id(id)).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.borrow().contains_key(&normalize_id(id))
    }

    /// All registered ids
    pub fn ids(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Registered ids with their documents (aliases excluded)
    pub fn documents(&self) -> Vec<(String, Rc<Value>)> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|(id, entry)| match entry {
                RegistryEntry::Unit(unit) => Some((id.clone(), unit.schema().doc().clone())),
                RegistryEntry::Document { doc, .. } => Some((id.clone(), doc.clone())),
                RegistryEntry::Alias(_) => None,
            })
            .collect()
    }

    /// Direct entry lookup, upgrading documents to units
    pub(crate) fn entry(&self, id: &str) -> Option<RegistryHit> {
        let id = normalize_id(id);
        let upgraded = {
            let entries = self.entries.borrow();
            match entries.get(&id)? {
                RegistryEntry::Unit(unit) => return Some(RegistryHit::Unit(unit.clone())),
                RegistryEntry::Alias(target) => return Some(RegistryHit::Alias(target.clone())),
                RegistryEntry::Document { doc, local_refs } => SchemaUnit::build(
                    SchemaRef::root(doc.clone()),
                    None,
                    Some(id.clone()),
                    Some(local_refs.clone()),
                    false,
                    None,
                ),
            }
        };
        self.entries
            .borrow_mut()
            .insert(id, RegistryEntry::Unit(upgraded.clone()));
        Some(RegistryHit::Unit(upgraded))
    }

    /// Follow alias entries to the final ref string
    ///
    /// Returns the original ref when the chain loops; aliases are
    /// caller-supplied, so a cycle is a lookup miss rather than a hang.
    pub(crate) fn dealias(&self, reference: &str) -> String {
        let mut seen = HashSet::new();
        let mut current = normalize_id(reference);
        loop {
            if !seen.insert(current.clone()) {
                return normalize_id(reference);
            }
            let next = match self.entries.borrow().get(&current) {
                Some(RegistryEntry::Alias(target)) => target.clone(),
                _ => return current,
            };
            current = next;
        }
    }

    /// Follow an alias chain to a unit, if the chain ends in one
    pub(crate) fn follow(&self, reference: &str) -> Option<Rc<SchemaUnit>> {
        match self.entry(&self.dealias(reference))? {
            RegistryHit::Unit(unit) => Some(unit),
            RegistryHit::Alias(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = SchemaRegistry::new();
        registry.insert_document("http://x/s", json!({ "type": "object" })).unwrap();
        let err = registry
            .insert_document("http://x/s#", json!({ "type": "array" }))
            .unwrap_err();
        assert!(matches!(err, SchemaError::AlreadyRegistered { id } if id == "http://x/s"));
    }

    #[test]
    fn test_alias_chain() {
        let registry = SchemaRegistry::new();
        registry.insert_document("http://x/real", json!({ "type": "string" })).unwrap();
        registry.insert_alias("http://x/a", "http://x/b").unwrap();
        registry.insert_alias("http://x/b", "http://x/real").unwrap();

        let unit = registry.follow("http://x/a").expect("chain resolves");
        assert_eq!(unit.base_id(), "http://x/real");
    }

    #[test]
    fn test_alias_cycle_is_a_miss() {
        let registry = SchemaRegistry::new();
        registry.insert_alias("http://x/a", "http://x/b").unwrap();
        registry.insert_alias("http://x/b", "http://x/a").unwrap();
        assert!(registry.follow("http://x/a").is_none());
    }

    #[test]
    fn test_document_upgrade_is_stable() {
        let registry = SchemaRegistry::new();
        registry.insert_document("http://x/s", json!({ "type": "object" })).unwrap();
        let first = registry.follow("http://x/s").unwrap();
        let second = registry.follow("http://x/s").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_remove() {
        let registry = SchemaRegistry::new();
        registry.insert_document("http://x/s", json!(true)).unwrap();
        assert!(registry.remove("http://x/s#"));
        assert!(!registry.contains("http://x/s"));
        assert!(!registry.remove("http://x/s"));
    }
}
