//! Schemac
//!
//! A reference-resolving JSON Schema compiler: schemas are registered under
//! their canonical URIs, `$ref` chains are resolved across documents, and
//! each schema compiles to a reusable validator.
//!
//! ## Features
//!
//! - **Reference Resolution**: JSON Pointer fragments, base-URI rebasing,
//!   embedded `$id`s, and alias chains
//! - **Cycle Support**: mutually recursive schemas compile through deferred
//!   validator handles
//! - **Inlining Policy**: small referenced schemas are compiled in place,
//!   configurable by key count
//! - **Content Caching**: compilation is keyed by SHA256 checksum, so equal
//!   schemas compile once
//! - **Graph Diagnostics**: document-level reference graphs with cycle and
//!   missing-target reports
//!
//! ## Architecture
//!
//! ```text
//! Compiler
//! ├── SchemaRegistry        id -> unit | alias | raw document
//! ├── KeywordBackend        schema node -> CompiledNode closure tree
//! ├── compilations          in-flight units, breaks reference cycles
//! └── cache                 checksum -> compiled unit
//! ```

pub mod backend;
pub mod checksum;
pub mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod registry;
pub mod resolve;
pub mod schema;
pub mod unit;
pub mod validator;

pub use backend::{BasicBackend, CompiledNode, EmitContext, KeywordBackend};
pub use checksum::Checksum;
pub use compiler::Compiler;
pub use config::{CompileConfig, SchemacConfig};
pub use error::{Result, SchemaError};
pub use graph::{GraphReport, ReferenceGraph};
pub use registry::SchemaRegistry;
pub use resolve::InlineRefs;
pub use schema::SchemaRef;
pub use unit::SchemaUnit;
pub use validator::{EvalScope, ValidationError, Validator, ValidatorHandle, ValidatorRef};
