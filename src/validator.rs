//! Compiled validators and the cycle-breaking handle
//!
//! A [`Validator`] wraps the closure tree produced by the keyword backend.
//! It is cheap to clone and exposes the most recent run's error list, the
//! originating schema and (when retention is enabled) the emitted trace.
//!
//! A [`ValidatorHandle`] is the stable indirection handed out when a
//! reference cycle revisits a schema that is still mid-compile. It starts
//! unbound and is bound exactly once, when the owning compile finishes;
//! invoking it earlier is a programming error and fails loudly.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use crate::schema::SchemaRef;

/// One validation failure from the most recent run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    /// JSON-Pointer path into the instance
    pub instance_path: String,
    /// Path into the schema that rejected it
    pub schema_path: String,
    /// The rejecting keyword
    pub keyword: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = if self.instance_path.is_empty() {
            "instance"
        } else {
            &self.instance_path
        };
        write!(f, "{}: {} ({})", at, self.message, self.schema_path)
    }
}

/// Mutable state threaded through one validation run
pub struct EvalScope {
    errors: Vec<ValidationError>,
    path: Vec<String>,
    all_errors: bool,
}

impl EvalScope {
    pub fn new(all_errors: bool) -> Self {
        Self {
            errors: Vec::new(),
            path: Vec::new(),
            all_errors,
        }
    }

    /// Whether keywords should keep collecting after the first failure
    pub fn all_errors(&self) -> bool {
        self.all_errors
    }

    pub fn push_segment(&mut self, segment: impl Into<String>) {
        self.path.push(segment.into());
    }

    pub fn pop_segment(&mut self) {
        self.path.pop();
    }

    /// Current instance path as a JSON Pointer (empty at the root)
    pub fn instance_path(&self) -> String {
        if self.path.is_empty() {
            String::new()
        } else {
            format!("/{}", self.path.join("/"))
        }
    }

    pub fn error(&mut self, schema_path: &str, keyword: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            instance_path: self.instance_path(),
            schema_path: schema_path.to_string(),
            keyword: keyword.to_string(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    fn take_errors(&mut self) -> Vec<ValidationError> {
        std::mem::take(&mut self.errors)
    }
}

/// The executable program a compile produces
pub type CompiledNode = Box<dyn Fn(&Value, &mut EvalScope) -> bool>;

struct ValidatorInner {
    schema: SchemaRef,
    program: CompiledNode,
    errors: RefCell<Vec<ValidationError>>,
    is_async: bool,
    all_errors: bool,
    source: Option<String>,
}

/// A compiled, reusable validator
#[derive(Clone)]
pub struct Validator {
    inner: Rc<ValidatorInner>,
}

impl Validator {
    pub(crate) fn new(
        schema: SchemaRef,
        program: CompiledNode,
        is_async: bool,
        all_errors: bool,
        source: Option<String>,
    ) -> Self {
        Self {
            inner: Rc::new(ValidatorInner {
                schema,
                program,
                errors: RefCell::new(Vec::new()),
                is_async,
                all_errors,
                source,
            }),
        }
    }

    /// Validate one instance; replaces the stored error list
    pub fn validate(&self, instance: &Value) -> bool {
        let mut scope = EvalScope::new(self.inner.all_errors);
        let valid = (self.inner.program)(instance, &mut scope);
        *self.inner.errors.borrow_mut() = scope.take_errors();
        valid
    }

    /// Validate as a nested call, accumulating into the caller's scope
    pub fn validate_nested(&self, instance: &Value, scope: &mut EvalScope) -> bool {
        (self.inner.program)(instance, scope)
    }

    /// Errors from the most recent [`validate`](Self::validate) run
    pub fn errors(&self) -> Vec<ValidationError> {
        self.inner.errors.borrow().clone()
    }

    /// The schema this validator was compiled from
    pub fn schema(&self) -> &SchemaRef {
        &self.inner.schema
    }

    pub fn is_async(&self) -> bool {
        self.inner.is_async
    }

    /// Retained emitted trace, when source retention was configured
    pub fn source(&self) -> Option<&str> {
        self.inner.source.as_deref()
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("schema", &self.inner.schema)
            .field("is_async", &self.inner.is_async)
            .finish()
    }
}

/// Stable indirection for validators still being compiled
///
/// All holders observe the real validator's behavior once it is bound;
/// handle identity never changes.
#[derive(Clone)]
pub struct ValidatorHandle {
    slot: Rc<RefCell<Option<Validator>>>,
}

impl ValidatorHandle {
    pub(crate) fn unbound() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Bind the real validator. One-shot; rebinding is an internal bug.
    pub(crate) fn bind(&self, validator: Validator) {
        let mut slot = self.slot.borrow_mut();
        assert!(slot.is_none(), "validator handle bound twice");
        *slot = Some(validator);
    }

    pub fn is_bound(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The bound validator, if the owning compile has finished
    pub fn bound(&self) -> Option<Validator> {
        self.slot.borrow().clone()
    }

    fn expect_bound(&self) -> Validator {
        self.bound()
            .unwrap_or_else(|| panic!("validator handle invoked before its schema finished compiling"))
    }

    pub fn validate(&self, instance: &Value) -> bool {
        self.expect_bound().validate(instance)
    }

    pub fn validate_nested(&self, instance: &Value, scope: &mut EvalScope) -> bool {
        self.expect_bound().validate_nested(instance, scope)
    }

    pub fn errors(&self) -> Vec<ValidationError> {
        self.expect_bound().errors()
    }
}

impl fmt::Debug for ValidatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorHandle({})", if self.is_bound() { "bound" } else { "unbound" })
    }
}

/// Either a finished validator or a handle to one still compiling
#[derive(Debug, Clone)]
pub enum ValidatorRef {
    Direct(Validator),
    Handle(ValidatorHandle),
}

impl ValidatorRef {
    pub fn validate(&self, instance: &Value) -> bool {
        match self {
            ValidatorRef::Direct(v) => v.validate(instance),
            ValidatorRef::Handle(h) => h.validate(instance),
        }
    }

    pub fn validate_nested(&self, instance: &Value, scope: &mut EvalScope) -> bool {
        match self {
            ValidatorRef::Direct(v) => v.validate_nested(instance, scope),
            ValidatorRef::Handle(h) => h.validate_nested(instance, scope),
        }
    }

    pub fn errors(&self) -> Vec<ValidationError> {
        match self {
            ValidatorRef::Direct(v) => v.errors(),
            ValidatorRef::Handle(h) => h.errors(),
        }
    }

    /// The underlying validator, if available without blocking on a compile
    pub fn validator(&self) -> Option<Validator> {
        match self {
            ValidatorRef::Direct(v) => Some(v.clone()),
            ValidatorRef::Handle(h) => h.bound(),
        }
    }
}
