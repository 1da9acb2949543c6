//! Compilation orchestrator
//!
//! Drives one schema compile end to end: in-flight cycle detection, emit
//! context construction, backend invocation, materialization, handle
//! binding and rollback. Also owns the reference resolution algorithm the
//! backend calls back into, so keyword code never sees registries, alias
//! chains or pointer walking.
//!
//! Compilation is synchronous and depth-first. The in-flight tracker and
//! the per-root resolution memo are mutated in strict push/pop discipline
//! aligned with the call chain; nothing here is safe to call from multiple
//! threads at once.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, error, trace};

use crate::backend::{BasicBackend, EmitContext, KeywordBackend};
use crate::checksum::Checksum;
use crate::config::CompileConfig;
use crate::error::{Result, SchemaError};
use crate::registry::{RegistryHit, SchemaRegistry};
use crate::resolve::{
    get_full_path, inline_ref, normalize_id, preserves_scope, resolve_url, unescape_fragment,
    ParsedRef,
};
use crate::schema::SchemaRef;
use crate::unit::{collect_local_refs, same_unit, RefTarget, SchemaUnit};
use crate::validator::{Validator, ValidatorRef};

/// The schema compiler
pub struct Compiler {
    registry: SchemaRegistry,
    backend: Box<dyn KeywordBackend>,
    config: CompileConfig,
    /// Units currently mid-compile, in call-chain order
    compilations: RefCell<Vec<Rc<SchemaUnit>>>,
    /// Content-keyed cache for standalone compiles
    cache: RefCell<HashMap<Checksum, Rc<SchemaUnit>>>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileConfig::default())
    }
}

impl Compiler {
    pub fn new(config: CompileConfig) -> Self {
        Self::with_backend(config, Box::new(BasicBackend))
    }

    /// Build a compiler around a custom keyword backend
    pub fn with_backend(config: CompileConfig, backend: Box<dyn KeywordBackend>) -> Self {
        Self {
            registry: SchemaRegistry::new(),
            backend,
            config,
            compilations: RefCell::new(Vec::new()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Register a schema under an explicit id, or its declared `$id`
    ///
    /// Returns the normalized id the schema is now reachable under.
    pub fn add_schema(&self, id: Option<&str>, schema: Value) -> Result<String> {
        let schema = SchemaRef::from_value(schema);
        let id = match (id, schema.declared_id()) {
            (Some(id), _) => normalize_id(id),
            (None, Some(declared)) => resolve_url("", declared),
            (None, None) => {
                return Err(SchemaError::InvalidSchema(
                    "schema has no $id and no id was given".to_string(),
                ))
            }
        };
        let local_refs = collect_local_refs(&schema, &id)?;
        let unit = SchemaUnit::build(
            schema,
            None,
            Some(id.clone()),
            Some(Rc::new(local_refs)),
            false,
            None,
        );
        self.registry.insert_unit(&id, unit)?;
        debug!(id = %id, "schema registered");
        Ok(id)
    }

    /// Register an alias ref string for another ref string
    pub fn add_alias(&self, from: &str, to: &str) -> Result<()> {
        self.registry.insert_alias(from, to)
    }

    /// Remove a registered schema or alias
    pub fn remove_schema(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    /// Compile a standalone document, cached by content checksum
    pub fn compile(&self, schema: Value) -> Result<Validator> {
        self.compile_with(schema, HashMap::new(), false, None)
    }

    /// Compile with per-call reference overrides, a meta flag and an
    /// optional caller-supplied cache key
    pub fn compile_with(
        &self,
        schema: Value,
        local_refs: HashMap<String, Value>,
        meta: bool,
        cache_key: Option<Checksum>,
    ) -> Result<Validator> {
        let key = cache_key.unwrap_or_else(|| Checksum::from_json(&schema));
        let cached = self.cache.borrow().get(&key).cloned();
        let unit = match cached {
            Some(unit) => unit,
            None => {
                let schema = SchemaRef::from_value(schema);
                let mut table = collect_local_refs(&schema, "")?;
                for (id, doc) in local_refs {
                    table.insert(normalize_id(&id), SchemaRef::from_value(doc));
                }
                let unit = SchemaUnit::build(
                    schema,
                    None,
                    None,
                    Some(Rc::new(table)),
                    meta,
                    Some(key.clone()),
                );
                self.cache.borrow_mut().insert(key, unit.clone());
                unit
            }
        };
        if let Some(validator) = unit.validator() {
            return Ok(validator);
        }
        self.compile_schema(&unit)?;
        unit.validator().ok_or_else(|| SchemaError::Compile {
            message: "validator missing after successful compile".to_string(),
            emitted: None,
        })
    }

    /// Compile a registered schema by id
    pub fn compile_id(&self, id: &str) -> Result<Validator> {
        let unit = self
            .registry
            .follow(id)
            .ok_or_else(|| SchemaError::MissingRef {
                reference: normalize_id(id),
            })?;
        if let Some(validator) = unit.validator() {
            return Ok(validator);
        }
        self.compile_schema(&unit)?;
        unit.validator().ok_or_else(|| SchemaError::Compile {
            message: "validator missing after successful compile".to_string(),
            emitted: None,
        })
    }

    /// Top-level drive for one unit: the unit is its own driver
    pub(crate) fn compile_schema(&self, unit: &Rc<SchemaUnit>) -> Result<ValidatorRef> {
        self.local_compile(unit, unit)
    }

    /// Compile one unit within the driving root's reference graph
    ///
    /// Step 1 is the cycle breaker: a reference cycle revisits an in-flight
    /// unit and resolves to a handle instead of recursing.
    fn local_compile(&self, sch: &Rc<SchemaUnit>, driver: &Rc<SchemaUnit>) -> Result<ValidatorRef> {
        if let Some(active) = self.find_compiling(sch) {
            trace!(base_id = %active.base_id(), "reference cycle; handing out handle");
            return Ok(ValidatorRef::Handle(active.handle_for_cycle()));
        }
        if !Rc::ptr_eq(&sch.root_of(), &driver.root_of()) {
            // Disjoint reference graphs never share tracker state.
            return self.compile_schema(sch);
        }
        if let Some(validator) = sch.validator() {
            return Ok(ValidatorRef::Direct(validator));
        }

        let root = driver.root_of();
        let is_root = sch.schema().same_node(root.schema());
        let root_id = get_full_path(root.base_id());
        let base_id = if sch.base_id().is_empty() {
            normalize_id(&root_id)
        } else {
            sch.base_id().to_string()
        };
        debug!(base_id = %base_id, is_root, "compiling schema");

        self.compilations.borrow_mut().push(sch.clone());
        let mut ctx = EmitContext::new(
            self,
            root.clone(),
            sch.schema().clone(),
            base_id,
            is_root,
            sch.is_async(),
            self.config.retain_source,
        );
        let emitted = self.backend.compile(&mut ctx);
        let source = ctx.rendered_source();
        {
            // Release must happen on success and failure alike.
            let mut stack = self.compilations.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|u| same_unit(u, sch)) {
                stack.remove(pos);
            }
        }

        match emitted {
            Ok(program) => {
                let validator = Validator::new(
                    sch.schema().clone(),
                    program,
                    sch.is_async(),
                    self.config.all_errors,
                    source,
                );
                sch.finish(validator.clone());
                Ok(ValidatorRef::Direct(validator))
            }
            Err(e) => {
                sch.rollback();
                match &source {
                    Some(src) => error!(%e, "schema compilation failed; emitted source:\n{}", src),
                    None => error!(%e, "schema compilation failed"),
                }
                Err(match e {
                    SchemaError::MissingRef { .. } => e,
                    other if source.is_some() => SchemaError::Compile {
                        message: other.to_string(),
                        emitted: source,
                    },
                    other => other,
                })
            }
        }
    }

    /// Linear scan of the in-flight stack; depth equals the current
    /// reference-chain depth, not the total schema count
    fn find_compiling(&self, unit: &Rc<SchemaUnit>) -> Option<Rc<SchemaUnit>> {
        self.compilations
            .borrow()
            .iter()
            .find(|u| same_unit(u, unit))
            .cloned()
    }

    /// Resolve a reference keyword's value within `root`'s graph
    ///
    /// `Ok(None)` means not found (including malformed pointers) — a value,
    /// not an error, so callers can fetch and retry. Outcomes are memoized
    /// per root, keyed by the absolute reference.
    pub(crate) fn resolve_ref(
        &self,
        root: &Rc<SchemaUnit>,
        base_id: &str,
        reference: &str,
    ) -> Result<Option<RefTarget>> {
        let reference = resolve_url(base_id, reference);
        if let Some(target) = root.refs.borrow().get(&reference) {
            return Ok(Some(target.clone()));
        }

        let mut unit = self.resolve(root, &reference)?;
        if unit.is_none() {
            if let Some(schema) = root.local_ref(&reference) {
                // Embedded $id or per-call override; the id itself becomes
                // the base URI for references inside it.
                unit = Some(SchemaUnit::build(
                    schema,
                    Some(root.clone()),
                    Some(reference.clone()),
                    root.local_refs(),
                    false,
                    None,
                ));
            }
        }

        match unit {
            None => {
                trace!(reference = %reference, "reference not found");
                Ok(None)
            }
            Some(unit) => {
                let target = self.inline_or_compile(&unit, root)?;
                root.refs.borrow_mut().insert(reference, target.clone());
                Ok(Some(target))
            }
        }
    }

    /// Embed the referenced schema, or compile it for call-by-reference
    fn inline_or_compile(&self, unit: &Rc<SchemaUnit>, driver: &Rc<SchemaUnit>) -> Result<RefTarget> {
        if inline_ref(unit.schema().node(), self.config.inline_refs) {
            return Ok(RefTarget::Inline(unit.schema().clone()));
        }
        if let Some(validator) = unit.validator() {
            return Ok(RefTarget::Validator(ValidatorRef::Direct(validator)));
        }
        Ok(RefTarget::Validator(self.local_compile(unit, driver)?))
    }

    /// Registry lookup (alias chains followed), falling back to structural
    /// resolution
    fn resolve(&self, root: &Rc<SchemaUnit>, reference: &str) -> Result<Option<Rc<SchemaUnit>>> {
        let reference = self.registry.dealias(reference);
        if let Some(RegistryHit::Unit(unit)) = self.registry.entry(&reference) {
            return Ok(Some(unit));
        }
        self.resolve_schema(root, &reference)
    }

    /// Structural resolution: self-reference shortcut, document-level
    /// aliases, pointer-fragment walks
    fn resolve_schema(
        &self,
        root: &Rc<SchemaUnit>,
        reference: &str,
    ) -> Result<Option<Rc<SchemaUnit>>> {
        let parsed = ParsedRef::parse(reference);
        let ref_path = parsed.full_path();
        let base_path = get_full_path(root.base_id());

        // Self-reference shortcut: walk the root's own schema without a
        // registry round-trip. An empty root is "nothing declared yet" and
        // must not shadow registry entries with spurious matches.
        if root.schema().has_members() && ref_path == base_path {
            return self.get_json_pointer(&parsed, root.schema().clone(), root.base_id(), root);
        }

        let id = normalize_id(&ref_path);
        match self.registry.entry(&id) {
            Some(RegistryHit::Alias(target)) => match self.resolve_schema(root, &target)? {
                Some(sch) if sch.schema().node().is_object() => {
                    let base = match sch.schema().declared_id() {
                        Some(declared) => resolve_url(sch.base_id(), declared),
                        None => sch.base_id().to_string(),
                    };
                    self.get_json_pointer(&parsed, sch.schema().clone(), &base, root)
                }
                _ => Ok(None),
            },
            Some(RegistryHit::Unit(unit)) => {
                if !unit.schema().node().is_object() {
                    return Ok(None);
                }
                if unit.validator().is_none() {
                    self.compile_schema(&unit)?;
                }
                if id == normalize_id(reference) {
                    // Whole-document reference, re-rooted under the caller.
                    return Ok(Some(SchemaUnit::with_root(
                        unit.schema().clone(),
                        root,
                        normalize_id(&base_path),
                    )));
                }
                self.get_json_pointer(&parsed, unit.schema().clone(), unit.base_id(), root)
            }
            None => Ok(None),
        }
    }

    /// Walk a pointer fragment, rebasing through declared ids
    fn get_json_pointer(
        &self,
        parsed: &ParsedRef,
        schema: SchemaRef,
        base_id: &str,
        root: &Rc<SchemaUnit>,
    ) -> Result<Option<Rc<SchemaUnit>>> {
        let fragment = match &parsed.fragment {
            Some(fragment) if fragment.starts_with('/') => fragment,
            // No pointer syntax: malformed, treated as not found.
            _ => return Ok(None),
        };

        let mut base_id = base_id.to_string();
        let mut current = schema;
        for part in fragment[1..].split('/') {
            // Booleans admit no children.
            if current.is_boolean() {
                return Ok(None);
            }
            let key = unescape_fragment(part);
            current = match current.child(&key) {
                Some(child) => child,
                None => return Ok(None),
            };
            if !preserves_scope(part) {
                if let Some(id) = current.declared_id() {
                    base_id = resolve_url(&base_id, id);
                }
            }
        }

        // A landed bare reference is chased, not returned.
        let mut env: Option<Rc<SchemaUnit>> = None;
        if !current.is_boolean() {
            if let Some(target) = current.ref_value() {
                if !self.schema_has_rules_but_ref(&current) {
                    let resolved = resolve_url(&base_id, target);
                    env = self.resolve_schema(root, &resolved)?;
                }
            }
        }
        let env = env.unwrap_or_else(|| SchemaUnit::with_root(current, root, base_id));

        // A self-reference that lands back on its own root adds nothing.
        if env.schema().same_node(env.root_of().schema()) {
            return Ok(None);
        }
        Ok(Some(env))
    }

    /// Whether the node validates anything beside its `$ref`
    fn schema_has_rules_but_ref(&self, schema: &SchemaRef) -> bool {
        schema
            .node()
            .as_object()
            .map(|map| {
                map.keys()
                    .any(|key| key != "$ref" && self.backend.is_rule_keyword(key))
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_caches_by_content() {
        let compiler = Compiler::default();
        let first = compiler.compile(json!({ "type": "string" })).unwrap();
        let second = compiler.compile(json!({ "type": "string" })).unwrap();
        // Same compiled artifact, not merely equivalent behavior.
        assert!(first.schema().same_node(second.schema()));
    }

    #[test]
    fn test_compile_id_missing() {
        let compiler = Compiler::default();
        let err = compiler.compile_id("http://x/unknown").unwrap_err();
        assert_eq!(err.missing_ref(), Some("http://x/unknown"));
    }

    #[test]
    fn test_add_schema_requires_an_id() {
        let compiler = Compiler::default();
        assert!(compiler.add_schema(None, json!({ "type": "object" })).is_err());
        let id = compiler
            .add_schema(None, json!({ "$id": "http://x/s#", "type": "object" }))
            .unwrap();
        assert_eq!(id, "http://x/s");
    }

    #[test]
    fn test_tracker_is_empty_after_success_and_failure() {
        let compiler = Compiler::default();
        compiler
            .add_schema(
                Some("http://x/loop"),
                json!({
                    "type": "object",
                    "properties": { "again": { "$ref": "http://x/loop" } }
                }),
            )
            .unwrap();
        compiler.compile_id("http://x/loop").unwrap();
        assert!(compiler.compilations.borrow().is_empty());

        compiler
            .add_schema(Some("http://x/bad"), json!({ "pattern": "(" }))
            .unwrap();
        assert!(compiler.compile_id("http://x/bad").is_err());
        assert!(compiler.compilations.borrow().is_empty());
    }
}
