//! Internal `$ref` resolver.
//!
//! Resolution is copy-on-resolve: [`RefResolver::resolve`] returns a new tree in which every local
//! reference (`#/...`) is replaced by its fully expanded target. The input document is only ever
//! borrowed.
//!
//! Each referenced pointer is expanded once and stored in an arena; later references to the same
//! pointer are served from there. The chain of pointers currently being expanded doubles as the
//! visited set: meeting a pointer that is already on the chain is a cycle, and a chain longer than
//! the depth bound fails instead of recursing further.
//!
//! Every node written to the output counts against a node budget, including copies served from the
//! arena. A document whose components fan out into each other can otherwise grow exponentially
//! while staying within the depth bound.
//!
//! External references (`other.yaml#/...`, `https://...`) are left in place. Fetching documents is
//! the caller's job.

use crate::error::ReferenceError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const DEFAULT_MAX_REF_DEPTH: usize = 20;

pub const DEFAULT_MAX_EXPANDED_NODES: usize = 2_000_000;

/// Marker key placed on a reference left unexpanded by [`CyclePolicy::Break`].
pub const CIRCULAR_REF_MARKER: &str = "x-circular-ref";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePolicy {
    /// A reference cycle is a [`ReferenceError::Cycle`].
    #[default]
    Fail,
    /// Keep the back-edge as `{"$ref": ..., "x-circular-ref": true}` and carry on.
    Break,
}

#[derive(Debug)]
pub struct RefResolver<'a> {
    root: &'a Value,
    max_depth: usize,
    cycles: CyclePolicy,
    max_nodes: usize,
    emitted: usize,
    /// Expanded targets with their node counts.
    arena: Vec<(Value, usize)>,
    ids: HashMap<String, usize>,
    chain: Vec<String>,
}

impl<'a> RefResolver<'a> {
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            max_depth: DEFAULT_MAX_REF_DEPTH,
            cycles: CyclePolicy::default(),
            max_nodes: DEFAULT_MAX_EXPANDED_NODES,
            emitted: 0,
            arena: Vec::new(),
            ids: HashMap::new(),
            chain: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_cycle_policy(mut self, cycles: CyclePolicy) -> Self {
        self.cycles = cycles;
        self
    }

    /// Bound on the total number of nodes `resolve` may produce over this resolver's lifetime.
    #[must_use]
    pub fn with_node_budget(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Number of distinct pointers expanded so far.
    #[must_use]
    pub fn expanded(&self) -> usize {
        self.arena.len()
    }

    /// Return a copy of `value` with every local reference expanded.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError`] on a cycle (under [`CyclePolicy::Fail`]), a chain deeper than the
    /// configured bound, a pointer with no target, or output beyond the node budget.
    pub fn resolve(&mut self, value: &Value) -> Result<Value, ReferenceError> {
        match value {
            Value::Object(map) => match map.get("$ref") {
                Some(Value::String(reference)) => self.resolve_reference(reference, map),
                _ => {
                    self.charge(1)?;
                    let mut out = Map::with_capacity(map.len());
                    for (k, v) in map {
                        out.insert(k.clone(), self.resolve(v)?);
                    }
                    Ok(Value::Object(out))
                }
            },
            Value::Array(items) => {
                self.charge(1)?;
                items
                    .iter()
                    .map(|v| self.resolve(v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            other => {
                self.charge(1)?;
                Ok(other.clone())
            }
        }
    }

    fn charge(&mut self, nodes: usize) -> Result<(), ReferenceError> {
        self.emitted = self.emitted.saturating_add(nodes);
        if self.emitted > self.max_nodes {
            return Err(ReferenceError::TooLarge {
                max_nodes: self.max_nodes,
            });
        }
        Ok(())
    }

    fn resolve_reference(
        &mut self,
        reference: &str,
        node: &Map<String, Value>,
    ) -> Result<Value, ReferenceError> {
        let Some(fragment) = reference.strip_prefix('#') else {
            tracing::warn!(reference = %reference, "Leaving external $ref unresolved");
            self.charge(1)?;
            return Ok(Value::Object(node.clone()));
        };

        let mut target = self.expand(reference, fragment)?;

        // Siblings of `$ref` (e.g. a local `description`) refine the target.
        if node.len() > 1
            && let Value::Object(target_map) = &mut target
        {
            for (k, v) in node {
                if k != "$ref" {
                    target_map.insert(k.clone(), self.resolve(v)?);
                }
            }
        }
        Ok(target)
    }

    fn expand(&mut self, reference: &str, pointer: &str) -> Result<Value, ReferenceError> {
        if let Some(&id) = self.ids.get(reference) {
            self.charge(self.arena[id].1)?;
            return Ok(self.arena[id].0.clone());
        }

        if let Some(pos) = self.chain.iter().position(|r| r == reference) {
            return match self.cycles {
                CyclePolicy::Fail => {
                    let mut chain = self.chain[pos..].to_vec();
                    chain.push(reference.to_string());
                    Err(ReferenceError::Cycle { chain })
                }
                CyclePolicy::Break => {
                    self.charge(1)?;
                    let mut marker = Map::new();
                    marker.insert("$ref".to_string(), Value::String(reference.to_string()));
                    marker.insert(CIRCULAR_REF_MARKER.to_string(), Value::Bool(true));
                    Ok(Value::Object(marker))
                }
            };
        }

        if self.chain.len() >= self.max_depth {
            return Err(ReferenceError::DepthExceeded {
                reference: reference.to_string(),
                max_depth: self.max_depth,
            });
        }

        let root = self.root;
        let target = if pointer.is_empty() {
            Some(root)
        } else {
            root.pointer(pointer)
        };
        let Some(target) = target else {
            return Err(ReferenceError::Dangling {
                reference: reference.to_string(),
            });
        };

        let before = self.emitted;
        self.chain.push(reference.to_string());
        let expanded = self.resolve(target);
        self.chain.pop();
        let expanded = expanded?;

        let id = self.arena.len();
        self.arena.push((expanded.clone(), self.emitted - before));
        self.ids.insert(reference.to_string(), id);
        Ok(expanded)
    }
}

/// True if any `$ref` key remains anywhere in `value`.
#[must_use]
pub fn contains_ref(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key("$ref") || map.values().any(contains_ref),
        Value::Array(items) => items.iter().any(contains_ref),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_chain_to_literal_target() {
        let doc = json!({
            "components": {"schemas": {
                "A": {"type": "object", "properties": {"b": {"$ref": "#/components/schemas/B"}}},
                "B": {"type": "object", "properties": {"c": {"$ref": "#/components/schemas/C"}}},
                "C": {"type": "string", "enum": ["x", "y"]}
            }}
        });
        let input = json!({"schema": {"$ref": "#/components/schemas/A"}});

        let out = RefResolver::new(&doc).resolve(&input).unwrap();
        assert_eq!(
            out["schema"]["properties"]["b"]["properties"]["c"],
            json!({"type": "string", "enum": ["x", "y"]})
        );
        assert!(!contains_ref(&out));
    }

    #[test]
    fn input_is_not_mutated_and_components_expand_once() {
        let doc = json!({"defs": {"P": {"type": "integer"}}});
        let input = json!([{"$ref": "#/defs/P"}, {"$ref": "#/defs/P"}]);
        let before = input.clone();

        let mut r = RefResolver::new(&doc);
        let out = r.resolve(&input).unwrap();
        assert_eq!(out, json!([{"type": "integer"}, {"type": "integer"}]));
        assert_eq!(input, before);
        assert_eq!(r.expanded(), 1);
    }

    #[test]
    fn cycle_fails_by_default() {
        let doc = json!({"components": {"schemas": {
            "Node": {"type": "object", "properties": {"next": {"$ref": "#/components/schemas/Node"}}}
        }}});
        let err = RefResolver::new(&doc)
            .resolve(&json!({"$ref": "#/components/schemas/Node"}))
            .unwrap_err();
        let ReferenceError::Cycle { chain } = err else {
            panic!("expected cycle, got {err:?}");
        };
        assert_eq!(chain.first(), chain.last());
    }

    #[test]
    fn cycle_break_policy_leaves_marker() {
        let doc = json!({"components": {"schemas": {
            "A": {"properties": {"b": {"$ref": "#/components/schemas/B"}}},
            "B": {"properties": {"a": {"$ref": "#/components/schemas/A"}}}
        }}});
        let out = RefResolver::new(&doc)
            .with_cycle_policy(CyclePolicy::Break)
            .resolve(&json!({"$ref": "#/components/schemas/A"}))
            .unwrap();
        assert_eq!(
            out["properties"]["b"]["properties"]["a"],
            json!({"$ref": "#/components/schemas/A", "x-circular-ref": true})
        );
    }

    #[test]
    fn depth_bound_is_enforced() {
        // R0 -> R1 -> ... -> R25, no cycle.
        let mut defs = Map::new();
        for i in 0..25 {
            defs.insert(format!("R{i}"), json!({"$ref": format!("#/defs/R{}", i + 1)}));
        }
        defs.insert("R25".to_string(), json!({"type": "string"}));
        let doc = json!({"defs": defs});

        let err = RefResolver::new(&doc)
            .resolve(&json!({"$ref": "#/defs/R0"}))
            .unwrap_err();
        assert!(matches!(err, ReferenceError::DepthExceeded { max_depth: 20, .. }));

        let out = RefResolver::new(&doc)
            .with_max_depth(30)
            .resolve(&json!({"$ref": "#/defs/R0"}))
            .unwrap();
        assert_eq!(out, json!({"type": "string"}));
    }

    #[test]
    fn node_budget_stops_fan_out_growth() {
        // L0..L11 each reference the next level twice; the output doubles at every level.
        let mut defs = Map::new();
        for i in 0..12 {
            let next = json!({"$ref": format!("#/defs/L{}", i + 1)});
            defs.insert(
                format!("L{i}"),
                json!({"properties": {"a": next.clone(), "b": next}}),
            );
        }
        defs.insert("L12".to_string(), json!({"type": "string"}));
        let doc = json!({"defs": defs});
        let input = json!({"$ref": "#/defs/L0"});

        let mut r = RefResolver::new(&doc);
        let out = r.resolve(&input).unwrap();
        assert_eq!(r.expanded(), 13);
        let deepest = "/properties/b".repeat(12);
        assert_eq!(out.pointer(&deepest), Some(&json!({"type": "string"})));
        assert!(!contains_ref(&out));

        let err = RefResolver::new(&doc)
            .with_node_budget(10_000)
            .resolve(&input)
            .unwrap_err();
        assert_eq!(err, ReferenceError::TooLarge { max_nodes: 10_000 });
    }

    #[test]
    fn dangling_and_external_refs() {
        let doc = json!({});
        let err = RefResolver::new(&doc)
            .resolve(&json!({"$ref": "#/components/schemas/Missing"}))
            .unwrap_err();
        assert_eq!(
            err,
            ReferenceError::Dangling {
                reference: "#/components/schemas/Missing".to_string()
            }
        );

        let external = json!({"$ref": "common.yaml#/components/schemas/Pet"});
        let out = RefResolver::new(&doc).resolve(&external).unwrap();
        assert_eq!(out, external);
    }

    #[test]
    fn sibling_keys_override_target() {
        let doc = json!({"defs": {"Id": {"type": "integer", "description": "generic"}}});
        let out = RefResolver::new(&doc)
            .resolve(&json!({"$ref": "#/defs/Id", "description": "pet id"}))
            .unwrap();
        assert_eq!(out, json!({"type": "integer", "description": "pet id"}));
    }
}
