//! Reference-graph diagnostics
//!
//! Builds a document-level graph of `$ref` edges between registered
//! schemas and reports strongly connected components (reference cycles)
//! and references whose target document is not registered. Purely
//! diagnostic: the compiler itself breaks cycles at compile time and does
//! not consult this graph.

use std::collections::{HashMap, HashSet};

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use serde_json::Value;

use crate::registry::SchemaRegistry;
use crate::resolve::{get_full_path, normalize_id, resolve_url};

/// Document-level `$ref` graph over a registry
pub struct ReferenceGraph {
    graph: DiGraph<String, String>,
    indices: HashMap<String, NodeIndex>,
    missing: Vec<MissingTarget>,
}

/// A reference whose target document is not registered
#[derive(Debug, Clone, Serialize)]
pub struct MissingTarget {
    pub from: String,
    pub reference: String,
}

/// Summary produced by [`ReferenceGraph::report`]
#[derive(Debug, Serialize)]
pub struct GraphReport {
    pub schemas: usize,
    pub references: usize,
    /// Groups of schema ids that reference each other cyclically
    pub cycles: Vec<Vec<String>>,
    pub missing: Vec<MissingTarget>,
}

impl ReferenceGraph {
    /// Build the graph from every document in the registry
    pub fn from_registry(registry: &SchemaRegistry) -> Self {
        let documents = registry.documents();
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for (id, _) in &documents {
            let index = graph.add_node(id.clone());
            indices.insert(id.clone(), index);
        }

        let mut missing = Vec::new();
        for (id, doc) in &documents {
            let mut references = Vec::new();
            collect_refs(doc.as_ref(), id, &mut references);
            for reference in references {
                let target = normalize_id(&get_full_path(&reference));
                if target == *id {
                    // Intra-document recursion is ordinary, not a cycle
                    // between schemas.
                    continue;
                }
                match indices.get(&target) {
                    Some(&to) => {
                        graph.add_edge(indices[id], to, reference);
                    }
                    None => missing.push(MissingTarget {
                        from: id.clone(),
                        reference,
                    }),
                }
            }
        }

        Self {
            graph,
            indices,
            missing,
        }
    }

    /// Ids of documents this document references
    pub fn targets_of(&self, id: &str) -> Vec<String> {
        let Some(&index) = self.indices.get(&normalize_id(id)) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.graph
            .neighbors(index)
            .filter_map(|n| {
                let id = self.graph[n].clone();
                seen.insert(id.clone()).then_some(id)
            })
            .collect()
    }

    /// Cycle and missing-target summary
    pub fn report(&self) -> GraphReport {
        let mut cycles: Vec<Vec<String>> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut ids: Vec<String> =
                    component.iter().map(|&n| self.graph[n].clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();

        GraphReport {
            schemas: self.graph.node_count(),
            references: self.graph.edge_count(),
            cycles,
            missing: self.missing.clone(),
        }
    }
}

/// Collect every `$ref` in a document, resolved against the running base
fn collect_refs(value: &Value, base: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            let base_owned;
            let mut base = base;
            if let Some(id) = map.get("$id").and_then(Value::as_str) {
                base_owned = resolve_url(base, id);
                base = &base_owned;
            }
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                out.push(resolve_url(base, reference));
            }
            for (key, child) in map {
                if key == "enum" || key == "const" {
                    continue;
                }
                collect_refs(child, base, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, base, out);
            }
        }
        _ => {}
    }
}
