//! Keyword-compilation backend seam
//!
//! The compiler core knows nothing about what `type` or `minimum` mean. A
//! [`KeywordBackend`] consumes an [`EmitContext`] — the schema, its base
//! URI, and a bound reference resolver — and produces the executable
//! program. For every reference keyword it meets it calls back through
//! [`EmitContext::resolve_ref`], which may recurse into the orchestrator
//! for non-inlined targets; the backend stays unaware of resolution
//! mechanics.

mod basic;

pub use basic::BasicBackend;

use std::rc::Rc;

use crate::compiler::Compiler;
use crate::error::Result;
use crate::schema::SchemaRef;
use crate::unit::{RefTarget, SchemaUnit};
pub use crate::validator::CompiledNode;

/// Compiles schema keywords into an executable program
pub trait KeywordBackend {
    /// Emit the program for the context's schema
    fn compile(&self, ctx: &mut EmitContext<'_>) -> Result<CompiledNode>;

    /// Whether `keyword` is a validating rule (as opposed to structural
    /// members like `$id` or `definitions`). Resolution uses this to decide
    /// when a node is a bare reference.
    fn is_rule_keyword(&self, keyword: &str) -> bool;
}

/// Everything one backend invocation needs
pub struct EmitContext<'c> {
    compiler: &'c Compiler,
    root: Rc<SchemaUnit>,
    schema: SchemaRef,
    base_id: String,
    is_root: bool,
    is_async: bool,
    trace: SourceTrace,
}

impl<'c> EmitContext<'c> {
    pub(crate) fn new(
        compiler: &'c Compiler,
        root: Rc<SchemaUnit>,
        schema: SchemaRef,
        base_id: String,
        is_root: bool,
        is_async: bool,
        trace_enabled: bool,
    ) -> Self {
        Self {
            compiler,
            root,
            schema,
            base_id,
            is_root,
            is_async,
            trace: SourceTrace::new(trace_enabled),
        }
    }

    /// The schema being compiled
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Absolute base URI for relative references in this schema
    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    /// Whether this schema is the root of its document
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Resolve a reference keyword's value
    ///
    /// `Ok(None)` means the reference is unknown (or its pointer is
    /// malformed); the backend decides how to react. `Err` only for a
    /// failed nested compile.
    pub fn resolve_ref(&mut self, base_id: &str, reference: &str) -> Result<Option<RefTarget>> {
        self.compiler.resolve_ref(&self.root, base_id, reference)
    }

    /// Record one line of emitted pseudo-source
    pub fn emit(&mut self, line: impl Into<String>) {
        self.trace.line(line);
    }

    /// The emitted source so far, when retention is enabled
    pub(crate) fn rendered_source(&self) -> Option<String> {
        self.trace.render()
    }
}

/// Pseudo-source recorder; text is kept only when retention is configured
pub(crate) struct SourceTrace {
    enabled: bool,
    lines: Vec<String>,
}

impl SourceTrace {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lines: Vec::new(),
        }
    }

    fn line(&mut self, line: impl Into<String>) {
        if self.enabled {
            self.lines.push(line.into());
        }
    }

    fn render(&self) -> Option<String> {
        if self.enabled && !self.lines.is_empty() {
            Some(self.lines.join("\n"))
        } else {
            None
        }
    }
}
