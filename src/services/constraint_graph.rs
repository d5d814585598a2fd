//! Bipartite graph of business constraints and the entities they govern.
//!
//! Nodes are constraints, entities, transitions, states, and guards; typed
//! edges connect them (`applies_to`, `from`, `to`). Two indices make the
//! blast-radius question ("which other constraints touch this entity?") a pair
//! of hash lookups.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::models::{ApplicationIr, EntityDef};

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A business rule, e.g. `Product.stock.non_negative`.
    Constraint,
    /// A domain entity from the IR.
    Entity,
    /// A named status change.
    Transition,
    /// One value of an entity's status field.
    State,
    /// A precondition attached to a flow.
    Guard,
}

/// Kind of a typed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Constraint to the entity it governs.
    AppliesTo,
    /// Transition to a source state.
    From,
    /// Transition to its target state.
    To,
}

/// A graph node, identified by kind and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// What the node stands for.
    pub kind: NodeKind,
    /// Constraint id, entity name, or state name.
    pub id: String,
}

impl Node {
    fn new(kind: NodeKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

/// A directed, typed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Relation the edge encodes.
    pub kind: EdgeKind,
    /// Constraint or transition end.
    pub source: Node,
    /// Entity or state end.
    pub target: Node,
}

/// Risk of touching a constraint, scaled by co-affected constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// At most one other constraint shares the entity.
    Low,
    /// Two to four co-affected constraints.
    Medium,
    /// Five or more.
    High,
}

impl RiskLevel {
    /// Risk level for `count` co-affected constraints.
    pub fn from_co_affected(count: usize) -> Self {
        match count {
            0..=1 => Self::Low,
            2..=4 => Self::Medium,
            _ => Self::High,
        }
    }

    /// Lowercase name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Other constraints a fix to `constraint_id` may disturb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastRadius {
    /// The constraint being repaired.
    pub constraint_id: String,
    /// Constraints sharing an entity with `constraint_id`.
    pub co_affected: Vec<String>,
    /// Risk scaled by `co_affected.len()`.
    pub risk_level: RiskLevel,
}

/// Constraints, entities, and the indices between them.
#[derive(Debug, Clone, Default)]
pub struct ConstraintGraph {
    nodes: HashSet<Node>,
    edges: Vec<Edge>,
    entity_to_constraints: HashMap<String, BTreeSet<String>>,
    constraint_to_entities: HashMap<String, BTreeSet<String>>,
}

impl ConstraintGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from an application IR.
    ///
    /// Constraints derived per entity:
    /// - `<Entity>.<field>.required` / `.unique` / `.ref` for field rules
    /// - `<Entity>.<transition>` for every state transition, with `from`/`to`
    ///   edges to state nodes
    /// - `flow:<name>:<n>` for every flow precondition, attached to the flow's
    ///   entity and to any entity named in the precondition text
    pub fn from_ir(ir: &ApplicationIr) -> Self {
        let mut graph = Self::new();

        for entity in &ir.entities {
            graph.add_entity_constraints(entity);
        }

        for flow in &ir.flows {
            let flow_entity = flow
                .entity
                .clone()
                .or_else(|| ir.entity_for_path(flow.method, &flow.path).map(|e| e.name.clone()));
            for (n, precondition) in flow.preconditions.iter().enumerate() {
                let constraint = format!("flow:{}:{n}", flow.name);
                graph.add_guard(&constraint, precondition);
                if let Some(entity) = &flow_entity {
                    graph.link(&constraint, entity);
                }
                let lowered = precondition.to_lowercase();
                for entity in &ir.entities {
                    if lowered.contains(&entity.name.to_lowercase()) {
                        graph.link(&constraint, &entity.name);
                    }
                }
            }
        }

        graph
    }

    fn add_entity_constraints(&mut self, entity: &EntityDef) {
        self.add_node(NodeKind::Entity, &entity.name);

        for field in &entity.fields {
            if field.required && !field.nullable {
                self.link(&format!("{}.{}.required", entity.name, field.name), &entity.name);
            }
            if field.unique {
                self.link(&format!("{}.{}.unique", entity.name, field.name), &entity.name);
            }
            if let Some(target) = &field.references {
                let constraint = format!("{}.{}.ref", entity.name, field.name);
                self.link(&constraint, &entity.name);
                self.link(&constraint, target);
            }
        }

        for state in &entity.states {
            self.add_node(NodeKind::State, &format!("{}:{state}", entity.name));
        }

        for transition in &entity.transitions {
            let constraint = format!("{}.{}", entity.name, transition.name);
            let transition_node = Node::new(NodeKind::Transition, constraint.clone());
            self.link(&constraint, &entity.name);
            self.add_node(NodeKind::Transition, &constraint);
            for from in &transition.from {
                let state = Node::new(NodeKind::State, format!("{}:{from}", entity.name));
                self.add_node(NodeKind::State, &state.id);
                self.edges.push(Edge {
                    kind: EdgeKind::From,
                    source: transition_node.clone(),
                    target: state,
                });
            }
            let to = Node::new(NodeKind::State, format!("{}:{}", entity.name, transition.to));
            self.add_node(NodeKind::State, &to.id);
            self.edges.push(Edge {
                kind: EdgeKind::To,
                source: transition_node,
                target: to,
            });
        }
    }

    fn add_node(&mut self, kind: NodeKind, id: &str) {
        self.nodes.insert(Node::new(kind, id));
    }

    fn add_guard(&mut self, constraint: &str, text: &str) {
        self.add_node(NodeKind::Constraint, constraint);
        self.add_node(NodeKind::Guard, text);
        self.edges.push(Edge {
            kind: EdgeKind::AppliesTo,
            source: Node::new(NodeKind::Guard, text),
            target: Node::new(NodeKind::Constraint, constraint),
        });
    }

    /// Add an `applies_to` edge from a constraint to an entity and index it.
    pub fn link(&mut self, constraint: &str, entity: &str) {
        self.add_node(NodeKind::Constraint, constraint);
        self.add_node(NodeKind::Entity, entity);

        let inserted = self
            .constraint_to_entities
            .entry(constraint.to_string())
            .or_default()
            .insert(entity.to_string());
        self.entity_to_constraints
            .entry(entity.to_string())
            .or_default()
            .insert(constraint.to_string());

        if inserted {
            self.edges.push(Edge {
                kind: EdgeKind::AppliesTo,
                source: Node::new(NodeKind::Constraint, constraint),
                target: Node::new(NodeKind::Entity, entity),
            });
        }
    }

    /// Number of distinct nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every edge, in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Constraints governing `entity`, sorted.
    pub fn constraints_for_entity(&self, entity: &str) -> Vec<String> {
        self.entity_to_constraints
            .get(entity)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entities `constraint` applies to, sorted.
    pub fn entities_for_constraint(&self, constraint: &str) -> Vec<String> {
        self.constraint_to_entities
            .get(constraint)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Constraints sharing at least one entity with `constraint`, excluding
    /// itself.
    pub fn co_affected(&self, constraint: &str) -> Vec<String> {
        let mut out = BTreeSet::new();
        if let Some(entities) = self.constraint_to_entities.get(constraint) {
            for entity in entities {
                if let Some(constraints) = self.entity_to_constraints.get(entity) {
                    out.extend(constraints.iter().filter(|c| *c != constraint).cloned());
                }
            }
        }
        out.into_iter().collect()
    }

    /// Co-affected constraints and the resulting risk level.
    pub fn blast_radius(&self, constraint: &str) -> BlastRadius {
        let co_affected = self.co_affected(constraint);
        BlastRadius {
            constraint_id: constraint.to_string(),
            risk_level: RiskLevel::from_co_affected(co_affected.len()),
            co_affected,
        }
    }

    /// Transition constraint of `entity` named `action`, if one exists.
    pub fn transition_constraint(&self, entity: &str, action: &str) -> Option<String> {
        let node = Node::new(NodeKind::Transition, format!("{entity}.{action}"));
        self.nodes.contains(&node).then_some(node.id)
    }
}
