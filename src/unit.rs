//! Compilation units
//!
//! A [`SchemaUnit`] is one (schema node, owning root, base URI) identity.
//! The compiler guarantees at most one compiled artifact per identity; two
//! units are the same identity when their schema nodes, roots and base URIs
//! all match. Schema content never changes after construction — only the
//! validator-related fields transition from unset to set, and back to unset
//! on rollback.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::checksum::Checksum;
use crate::error::{Result, SchemaError};
use crate::resolve::resolve_url;
use crate::schema::SchemaRef;
use crate::validator::{Validator, ValidatorHandle, ValidatorRef};

/// Per-call reference overrides: embedded `$id` (or caller-supplied id) to
/// the schema declaring it. Not globally registered.
pub type LocalRefs = HashMap<String, SchemaRef>;

/// A memoized resolution outcome, keyed per root by the absolute reference
#[derive(Debug, Clone)]
pub enum RefTarget {
    /// The referenced schema itself, to be embedded at the call site
    Inline(SchemaRef),
    /// A separately compiled (possibly still compiling) validator
    Validator(ValidatorRef),
}

/// One schema-compile identity
pub struct SchemaUnit {
    schema: SchemaRef,
    /// `None` means this unit is its own root
    root: Option<Rc<SchemaUnit>>,
    base_id: String,
    local_refs: Option<Rc<LocalRefs>>,
    meta: bool,
    cache_key: Option<Checksum>,
    is_async: bool,
    /// Resolution memo; meaningful on root units only
    pub(crate) refs: RefCell<HashMap<String, RefTarget>>,
    pub(crate) validator: RefCell<Option<Validator>>,
    pub(crate) handle: RefCell<Option<ValidatorHandle>>,
}

impl SchemaUnit {
    /// A self-rooted unit; base URI defaults to the schema's declared `$id`
    pub fn new(schema: SchemaRef) -> Rc<Self> {
        Self::build(schema, None, None, None, false, None)
    }

    /// A unit owned by an existing root
    pub(crate) fn with_root(
        schema: SchemaRef,
        root: &Rc<SchemaUnit>,
        base_id: impl Into<String>,
    ) -> Rc<Self> {
        Self::build(schema, Some(root.clone()), Some(base_id.into()), None, false, None)
    }

    pub(crate) fn build(
        schema: SchemaRef,
        root: Option<Rc<SchemaUnit>>,
        base_id: Option<String>,
        local_refs: Option<Rc<LocalRefs>>,
        meta: bool,
        cache_key: Option<Checksum>,
    ) -> Rc<Self> {
        let base_id = base_id.unwrap_or_else(|| {
            schema
                .declared_id()
                .map(|id| resolve_url("", id))
                .unwrap_or_default()
        });
        let is_async = schema.is_async();
        Rc::new(Self {
            schema,
            root,
            base_id,
            local_refs,
            meta,
            cache_key,
            is_async,
            refs: RefCell::new(HashMap::new()),
            validator: RefCell::new(None),
            handle: RefCell::new(None),
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    pub fn meta(&self) -> bool {
        self.meta
    }

    pub fn cache_key(&self) -> Option<&Checksum> {
        self.cache_key.as_ref()
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// The unit owning the overall document (self when self-rooted)
    pub fn root_of(self: &Rc<Self>) -> Rc<SchemaUnit> {
        self.root.clone().unwrap_or_else(|| self.clone())
    }

    /// Per-call override lookup
    pub(crate) fn local_ref(&self, reference: &str) -> Option<SchemaRef> {
        self.local_refs.as_ref().and_then(|m| m.get(reference).cloned())
    }

    pub(crate) fn local_refs(&self) -> Option<Rc<LocalRefs>> {
        self.local_refs.clone()
    }

    /// The compiled validator, once set
    pub fn validator(&self) -> Option<Validator> {
        self.validator.borrow().clone()
    }

    /// The handle fronting this unit while it compiles; created on the
    /// first cycle collision, reused for every later one
    pub(crate) fn handle_for_cycle(&self) -> ValidatorHandle {
        let mut slot = self.handle.borrow_mut();
        match &*slot {
            Some(handle) => handle.clone(),
            None => {
                let handle = ValidatorHandle::unbound();
                *slot = Some(handle.clone());
                handle
            }
        }
    }

    /// Record a successful compile; binds any handle created mid-cycle
    pub(crate) fn finish(&self, validator: Validator) {
        if let Some(handle) = self.handle.borrow().clone() {
            handle.bind(validator.clone());
        }
        *self.validator.borrow_mut() = Some(validator);
    }

    /// Roll back a failed compile; a later retry starts from scratch
    ///
    /// Besides the unit's own compiled state, this purges memoized
    /// resolutions that captured a handle the failed attempt never bound.
    /// Left in place, such an entry would short-circuit the retry's
    /// re-resolution and hand out a handle nothing will ever bind.
    pub(crate) fn rollback(&self) {
        *self.validator.borrow_mut() = None;
        *self.handle.borrow_mut() = None;
        let refs = match &self.root {
            Some(root) => &root.refs,
            None => &self.refs,
        };
        refs.borrow_mut().retain(|_, target| match target {
            RefTarget::Validator(ValidatorRef::Handle(handle)) => handle.is_bound(),
            _ => true,
        });
    }
}

/// Identity equality: same schema node, same root, same base URI
pub(crate) fn same_unit(a: &Rc<SchemaUnit>, b: &Rc<SchemaUnit>) -> bool {
    a.schema.same_node(&b.schema)
        && Rc::ptr_eq(&a.root_of(), &b.root_of())
        && a.base_id == b.base_id
}

/// Collect embedded `$id` declarations into a [`LocalRefs`] table
///
/// Each declared id is resolved against its enclosing base. `enum` and
/// `const` values hold data, not schemas, and are not descended into.
pub fn collect_local_refs(schema: &SchemaRef, base_id: &str) -> Result<LocalRefs> {
    let mut refs = LocalRefs::new();
    walk_ids(schema, base_id, &mut refs)?;
    Ok(refs)
}

fn walk_ids(node: &SchemaRef, base: &str, out: &mut LocalRefs) -> Result<()> {
    match node.node() {
        Value::Object(map) => {
            let mut current = base.to_string();
            if let Some(id) = map.get("$id").and_then(Value::as_str) {
                current = resolve_url(base, id);
                if !current.is_empty() {
                    if let Some(prev) = out.insert(current.clone(), node.clone()) {
                        if !prev.same_node(node) {
                            return Err(SchemaError::DuplicateId(current));
                        }
                    }
                }
            }
            for key in map.keys() {
                if key == "enum" || key == "const" {
                    continue;
                }
                if let Some(child) = node.child(key) {
                    walk_ids(&child, &current, out)?;
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for i in 0..items.len() {
                if let Some(child) = node.child(&i.to_string()) {
                    walk_ids(&child, base, out)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
