//! End-to-End Compiler Tests
//!
//! Exercises registration, reference resolution, cycle handling, inlining,
//! and failure rollback through the public API only.

use std::cell::Cell;
use std::rc::Rc;

use schemac::backend::{BasicBackend, CompiledNode, EmitContext, KeywordBackend};
use schemac::{CompileConfig, Compiler, InlineRefs, SchemaError};
use serde_json::{json, Value};

/// Wraps the real backend and counts invocations, so tests can observe how
/// many distinct schema environments a compile actually touched.
struct CountingBackend {
    inner: BasicBackend,
    calls: Rc<Cell<usize>>,
}

impl CountingBackend {
    fn new() -> (Self, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let backend = Self {
            inner: BasicBackend,
            calls: calls.clone(),
        };
        (backend, calls)
    }
}

impl KeywordBackend for CountingBackend {
    fn compile(&self, ctx: &mut EmitContext<'_>) -> schemac::Result<CompiledNode> {
        self.calls.set(self.calls.get() + 1);
        self.inner.compile(ctx)
    }

    fn is_rule_keyword(&self, keyword: &str) -> bool {
        self.inner.is_rule_keyword(keyword)
    }
}

fn counting_compiler(config: CompileConfig) -> (Compiler, Rc<Cell<usize>>) {
    let (backend, calls) = CountingBackend::new();
    (Compiler::with_backend(config, Box::new(backend)), calls)
}

// =============================================================================
// Registration and Caching
// =============================================================================

#[test]
fn test_equal_schemas_compile_once() {
    let (compiler, calls) = counting_compiler(CompileConfig::default());
    let schema = json!({ "type": "object", "required": ["name"] });

    let first = compiler.compile(schema.clone()).unwrap();
    let after_first = calls.get();
    let second = compiler.compile(schema).unwrap();

    assert_eq!(calls.get(), after_first, "second compile must hit the cache");
    assert!(first.validate(&json!({ "name": "x" })));
    assert!(second.validate(&json!({ "name": "x" })));
    assert!(!second.validate(&json!({})));
}

#[test]
fn test_registered_schema_compiles_once() {
    let (compiler, calls) = counting_compiler(CompileConfig::default());
    compiler
        .add_schema(None, json!({ "$id": "http://x/user", "type": "object" }))
        .unwrap();

    compiler.compile_id("http://x/user").unwrap();
    let after_first = calls.get();
    compiler.compile_id("http://x/user").unwrap();

    assert_eq!(calls.get(), after_first);
}

#[test]
fn test_add_schema_rejects_duplicates() {
    let compiler = Compiler::default();
    compiler
        .add_schema(Some("http://x/a"), json!({ "type": "string" }))
        .unwrap();
    let err = compiler
        .add_schema(Some("http://x/a"), json!({ "type": "number" }))
        .unwrap_err();
    assert!(matches!(err, SchemaError::AlreadyRegistered { .. }));
}

#[test]
fn test_remove_then_reregister() {
    let compiler = Compiler::default();
    compiler
        .add_schema(Some("http://x/a"), json!({ "type": "string" }))
        .unwrap();
    assert!(compiler.remove_schema("http://x/a"));
    compiler
        .add_schema(Some("http://x/a"), json!({ "type": "number" }))
        .unwrap();

    let validator = compiler.compile_id("http://x/a").unwrap();
    assert!(validator.validate(&json!(3)));
    assert!(!validator.validate(&json!("s")));
}

// =============================================================================
// Reference Resolution
// =============================================================================

#[test]
fn test_recursive_definition_compiles_and_validates() {
    let compiler = Compiler::default();
    let validator = compiler
        .compile(json!({
            "$id": "http://ex/root",
            "definitions": {
                "node": {
                    "type": "object",
                    "properties": {
                        "next": { "$ref": "#/definitions/node" }
                    }
                }
            },
            "$ref": "#/definitions/node"
        }))
        .unwrap();

    assert!(validator.validate(&json!({ "next": { "next": {} } })));
    assert!(!validator.validate(&json!({ "next": { "next": 5 } })));
    let errors = validator.errors();
    assert!(!errors.is_empty());
    assert_eq!(errors[0].instance_path, "/next/next");
}

#[test]
fn test_pointer_escapes_in_fragments() {
    // The member "a/b~c" is addressed as "#/definitions/a~1b~0c".
    let compiler = Compiler::default();
    let validator = compiler
        .compile(json!({
            "definitions": { "a/b~c": { "type": "integer" } },
            "properties": { "v": { "$ref": "#/definitions/a~1b~0c" } }
        }))
        .unwrap();

    assert!(validator.validate(&json!({ "v": 1 })));
    assert!(!validator.validate(&json!({ "v": "one" })));
}

#[test]
fn test_embedded_id_changes_resolution_scope() {
    // "$ref": "bar" inside http://x/root resolves to http://x/bar, the
    // embedded $id of definitions/foo. The structural pointer path reaches
    // the same node.
    let compiler = Compiler::default();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/root",
                "definitions": {
                    "foo": { "$id": "bar", "type": "string" }
                },
                "properties": {
                    "v": { "$ref": "bar" },
                    "w": { "$ref": "#/definitions/foo" }
                }
            }),
        )
        .unwrap();

    let validator = compiler.compile_id("http://x/root").unwrap();
    assert!(validator.validate(&json!({ "v": "hello", "w": "there" })));
    assert!(!validator.validate(&json!({ "v": 7 })));
    assert!(!validator.validate(&json!({ "w": 7 })));
}

#[test]
fn test_cross_schema_reference() {
    let compiler = Compiler::default();
    compiler
        .add_schema(
            None,
            json!({ "$id": "http://x/address", "type": "object", "required": ["city"] }),
        )
        .unwrap();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/person",
                "type": "object",
                "properties": { "home": { "$ref": "http://x/address" } }
            }),
        )
        .unwrap();

    let validator = compiler.compile_id("http://x/person").unwrap();
    assert!(validator.validate(&json!({ "home": { "city": "Oslo" } })));
    assert!(!validator.validate(&json!({ "home": {} })));
}

#[test]
fn test_fragment_into_other_document() {
    let compiler = Compiler::default();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/defs",
                "definitions": { "port": { "type": "integer", "minimum": 1 } }
            }),
        )
        .unwrap();

    let validator = compiler
        .compile(json!({
            "properties": { "port": { "$ref": "http://x/defs#/definitions/port" } }
        }))
        .unwrap();

    assert!(validator.validate(&json!({ "port": 8080 })));
    assert!(!validator.validate(&json!({ "port": 0 })));
    assert!(!validator.validate(&json!({ "port": "80" })));
}

#[test]
fn test_alias_chain_resolution() {
    let compiler = Compiler::default();
    compiler
        .add_schema(None, json!({ "$id": "http://x/v2", "type": "boolean" }))
        .unwrap();
    compiler.add_alias("http://x/v1", "http://x/v2").unwrap();
    compiler.add_alias("http://x/v0", "http://x/v1").unwrap();

    let validator = compiler.compile_id("http://x/v0").unwrap();
    assert!(validator.validate(&json!(true)));
    assert!(!validator.validate(&json!("true")));
}

#[test]
fn test_missing_reference_fails_compile() {
    let compiler = Compiler::default();
    let err = compiler.compile(json!({ "$ref": "#/missing" })).unwrap_err();
    let reference = err.missing_ref().expect("expected a MissingRef error");
    assert!(reference.ends_with("#/missing"), "got {reference}");
}

// =============================================================================
// Cycles and Handles
// =============================================================================

#[test]
fn test_mutually_recursive_registered_schemas() {
    let compiler = Compiler::default();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/even",
                "type": "object",
                "properties": { "odd": { "$ref": "http://x/odd" } }
            }),
        )
        .unwrap();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/odd",
                "type": "object",
                "required": ["even"],
                "properties": { "even": { "$ref": "http://x/even" } }
            }),
        )
        .unwrap();

    let validator = compiler.compile_id("http://x/even").unwrap();
    assert!(validator.validate(&json!({ "odd": { "even": {} } })));
    assert!(validator.validate(&json!({ "odd": { "even": { "odd": { "even": {} } } } })));
    assert!(!validator.validate(&json!({ "odd": {} })));
    assert!(!validator.validate(&json!({ "odd": { "even": 3 } })));
}

#[test]
fn test_cycle_validators_usable_long_after_compile() {
    let compiler = Compiler::default();
    let validator = compiler
        .compile(json!({
            "$id": "http://ex/tree",
            "definitions": {
                "node": {
                    "type": "object",
                    "required": ["value"],
                    "properties": {
                        "value": { "type": "number" },
                        "children": {
                            "type": "array",
                            "items": { "$ref": "#/definitions/node" }
                        }
                    }
                }
            },
            "$ref": "#/definitions/node"
        }))
        .unwrap();

    let deep = json!({
        "value": 1,
        "children": [
            { "value": 2, "children": [ { "value": 3, "children": [] } ] },
            { "value": 4 }
        ]
    });
    for _ in 0..3 {
        assert!(validator.validate(&deep));
    }
    assert!(!validator.validate(&json!({ "value": 1, "children": [{}] })));
}

// =============================================================================
// Inlining Policy
// =============================================================================

#[test]
fn test_small_references_inline_into_one_program() {
    let config = CompileConfig {
        inline_refs: InlineRefs::Limit(10),
        ..CompileConfig::default()
    };
    let (compiler, calls) = counting_compiler(config);
    compiler
        .add_schema(None, json!({ "$id": "http://x/small", "type": "integer" }))
        .unwrap();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/big",
                "properties": { "v": { "$ref": "http://x/small" } }
            }),
        )
        .unwrap();

    let validator = compiler.compile_id("http://x/big").unwrap();
    assert_eq!(calls.get(), 1, "inlined target must not compile separately");
    assert!(validator.validate(&json!({ "v": 2 })));
    assert!(!validator.validate(&json!({ "v": 2.5 })));
}

#[test]
fn test_inlining_disabled_compiles_target_separately() {
    let config = CompileConfig {
        inline_refs: InlineRefs::Never,
        ..CompileConfig::default()
    };
    let (compiler, calls) = counting_compiler(config);
    compiler
        .add_schema(None, json!({ "$id": "http://x/small", "type": "integer" }))
        .unwrap();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/big",
                "properties": { "v": { "$ref": "http://x/small" } }
            }),
        )
        .unwrap();

    let validator = compiler.compile_id("http://x/big").unwrap();
    assert_eq!(calls.get(), 2);
    assert!(validator.validate(&json!({ "v": 2 })));
    assert!(!validator.validate(&json!({ "v": "2" })));
}

#[test]
fn test_inlining_policy_does_not_change_results() {
    let schema = json!({
        "$id": "http://x/wrapper",
        "properties": { "v": { "$ref": "http://x/leaf" } }
    });
    let leaf = json!({ "$id": "http://x/leaf", "type": "string", "minLength": 2 });
    let samples = [json!({ "v": "ok" }), json!({ "v": "x" }), json!({ "v": 3 })];

    let mut verdicts = Vec::new();
    for policy in [InlineRefs::Always, InlineRefs::Never, InlineRefs::Limit(1)] {
        let config = CompileConfig {
            inline_refs: policy,
            ..CompileConfig::default()
        };
        let compiler = Compiler::new(config);
        compiler.add_schema(None, leaf.clone()).unwrap();
        compiler.add_schema(None, schema.clone()).unwrap();
        let validator = compiler.compile_id("http://x/wrapper").unwrap();
        verdicts.push(samples.iter().map(|s| validator.validate(s)).collect::<Vec<_>>());
    }

    assert_eq!(verdicts[0], vec![true, false, false]);
    assert_eq!(verdicts[0], verdicts[1]);
    assert_eq!(verdicts[1], verdicts[2]);
}

// =============================================================================
// Failure and Rollback
// =============================================================================

#[test]
fn test_failed_compile_does_not_poison_compiler() {
    let compiler = Compiler::default();

    let bad = json!({ "pattern": "(" });
    assert!(compiler.compile(bad.clone()).is_err());

    // Unrelated work proceeds normally after the failure.
    let validator = compiler.compile(json!({ "type": "string" })).unwrap();
    assert!(validator.validate(&json!("ok")));

    // The failing schema is not cached as a phantom success.
    assert!(compiler.compile(bad).is_err());
}

#[test]
fn test_retry_succeeds_after_missing_schema_is_registered() {
    // The recursive reference resolves (and memoizes a cycle handle) before
    // the missing one fails the compile. The retry must re-resolve from
    // scratch and produce a fully usable validator.
    let compiler = Compiler::default();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/tree",
                "type": "object",
                "properties": {
                    "child": { "$ref": "http://x/tree" },
                    "label": { "$ref": "http://x/label" }
                }
            }),
        )
        .unwrap();

    let err = compiler.compile_id("http://x/tree").unwrap_err();
    assert_eq!(err.missing_ref(), Some("http://x/label"));

    compiler
        .add_schema(None, json!({ "$id": "http://x/label", "type": "string" }))
        .unwrap();

    let validator = compiler.compile_id("http://x/tree").unwrap();
    assert!(validator.validate(&json!({ "child": { "label": "leaf" } })));
    assert!(!validator.validate(&json!({ "child": { "label": 5 } })));
}

#[test]
fn test_retry_across_roots_after_missing_schema_is_registered() {
    // The cycle handle created mid-compile belongs to one registered root
    // but is memoized on the other; the failure must not leave it behind.
    let compiler = Compiler::default();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/outer",
                "type": "object",
                "properties": { "inner": { "$ref": "http://x/inner" } }
            }),
        )
        .unwrap();
    compiler
        .add_schema(
            None,
            json!({
                "$id": "http://x/inner",
                "type": "object",
                "properties": {
                    "back": { "$ref": "http://x/outer" },
                    "tag": { "$ref": "http://x/tag" }
                }
            }),
        )
        .unwrap();

    let err = compiler.compile_id("http://x/outer").unwrap_err();
    assert_eq!(err.missing_ref(), Some("http://x/tag"));

    compiler
        .add_schema(None, json!({ "$id": "http://x/tag", "type": "string" }))
        .unwrap();

    let validator = compiler.compile_id("http://x/outer").unwrap();
    assert!(validator.validate(&json!({
        "inner": { "back": { "inner": { "tag": "t" } }, "tag": "t" }
    })));
    assert!(!validator.validate(&json!({ "inner": { "tag": 3 } })));
}

#[test]
fn test_failed_registered_compile_can_be_replaced() {
    let compiler = Compiler::default();
    compiler
        .add_schema(None, json!({ "$id": "http://x/bad", "pattern": "(" }))
        .unwrap();
    assert!(compiler.compile_id("http://x/bad").is_err());

    assert!(compiler.remove_schema("http://x/bad"));
    compiler
        .add_schema(None, json!({ "$id": "http://x/bad", "pattern": "^ok$" }))
        .unwrap();
    let validator = compiler.compile_id("http://x/bad").unwrap();
    assert!(validator.validate(&json!("ok")));
    assert!(!validator.validate(&json!("no")));
}

// =============================================================================
// Error Reporting
// =============================================================================

#[test]
fn test_all_errors_collects_every_failure() {
    let compiler = Compiler::default();
    let validator = compiler
        .compile(json!({
            "type": "object",
            "required": ["a", "b"],
            "properties": { "c": { "type": "string" } }
        }))
        .unwrap();

    assert!(!validator.validate(&json!({ "c": 1 })));
    let errors = validator.errors();
    let keywords: Vec<&str> = errors.iter().map(|e| e.keyword.as_str()).collect();
    assert!(keywords.contains(&"required"));
    assert!(keywords.contains(&"type"));
    assert!(errors.len() >= 3);
}

#[test]
fn test_first_error_mode_stops_early() {
    let config = CompileConfig {
        all_errors: false,
        ..CompileConfig::default()
    };
    let compiler = Compiler::new(config);
    let validator = compiler
        .compile(json!({
            "type": "object",
            "required": ["a", "b"]
        }))
        .unwrap();

    assert!(!validator.validate(&json!({})));
    assert_eq!(validator.errors().len(), 1);
}

#[test]
fn test_retained_source_trace() {
    let config = CompileConfig {
        retain_source: true,
        ..CompileConfig::default()
    };
    let compiler = Compiler::new(config);
    let validator = compiler
        .compile(json!({ "type": "string", "minLength": 1 }))
        .unwrap();

    let source = validator.source().expect("trace should be retained");
    assert!(source.contains("type"));
}

// =============================================================================
// Boolean and Degenerate Schemas
// =============================================================================

#[test]
fn test_boolean_schemas() {
    let compiler = Compiler::default();
    let always = compiler.compile(json!(true)).unwrap();
    let never = compiler.compile(json!(false)).unwrap();
    let data: Value = json!({ "anything": ["goes", 1, null] });

    assert!(always.validate(&data));
    assert!(!never.validate(&data));
    assert!(!never.validate(&json!(null)));
}

#[test]
fn test_empty_schema_accepts_everything() {
    let compiler = Compiler::default();
    let validator = compiler.compile(json!({})).unwrap();
    for instance in [json!(null), json!(0), json!("s"), json!([]), json!({})] {
        assert!(validator.validate(&instance));
    }
}
