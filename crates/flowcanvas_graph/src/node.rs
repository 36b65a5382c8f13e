// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::error::{InvalidOperation, Result};
use crate::evaluation::{CalculateFn, NodeState};
use crate::port::{PortDirection, PortId, PortSpec};
use crate::value::{TypeRegistry, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node kind category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Input nodes (constants, parameters)
    Input,
    /// Output nodes (result, preview)
    Output,
    /// Math operations
    Math,
    /// Logic/flow control
    Logic,
    /// Utility nodes
    Utility,
    /// Custom/user-defined
    Custom,
}

fn empty_state() -> NodeState {
    NodeState::new()
}

/// Node kind definition
#[derive(Debug, Clone)]
pub struct NodeKind {
    /// Unique kind identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Declared ports, created with every node of this kind
    pub ports: Vec<PortSpec>,
    /// Whether cycles may close through nodes of this kind
    pub allow_recursion: bool,
    /// Whether a successful calculation propagates downstream
    pub continue_calculation: bool,
    /// State of a freshly created node
    pub initial_state: fn() -> NodeState,
    /// Computes outputs and new state from inputs and state
    pub calculate: CalculateFn,
}

impl NodeKind {
    /// Create a kind with no ports, propagating and forbidding recursion
    pub fn new(id: impl Into<String>, name: impl Into<String>, calculate: CalculateFn) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: NodeCategory::Custom,
            description: String::new(),
            ports: Vec::new(),
            allow_recursion: false,
            continue_calculation: true,
            initial_state: empty_state,
            calculate,
        }
    }

    /// Set the category
    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a port
    pub fn with_port(mut self, port: PortSpec) -> Self {
        self.ports.push(port);
        self
    }

    /// Allow cycles through this kind
    pub fn allow_recursion(mut self) -> Self {
        self.allow_recursion = true;
        self
    }

    /// Stop automatic downstream propagation after calculating
    pub fn manual_propagation(mut self) -> Self {
        self.continue_calculation = false;
        self
    }

    /// Set the initial state factory
    pub fn with_initial_state(mut self, initial_state: fn() -> NodeState) -> Self {
        self.initial_state = initial_state;
        self
    }
}

/// A node instance on a canvas
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Node kind ID
    pub kind: String,
    /// Display name (can be customized)
    pub name: String,
    /// Ports declared by the kind, in declaration order
    pub(crate) static_ports: Vec<PortId>,
    /// Ports created at run time, in creation order
    pub(crate) dynamic_ports: Vec<PortId>,
    /// Whether cached outputs are valid
    pub(crate) calculated: bool,
    /// Whether cycles may close through this node
    pub allow_recursion: bool,
    /// Whether a successful calculation propagates downstream
    pub continue_calculation: bool,
    /// Persistent state passed to the calculate function
    pub(crate) state: NodeState,
    /// Cached value per output port
    pub(crate) cached_outputs: IndexMap<PortId, Value>,
}

impl Node {
    /// Create a node of a kind; ports are attached by the canvas
    pub fn new(id: NodeId, kind: &NodeKind) -> Self {
        Self {
            id,
            kind: kind.id.clone(),
            name: kind.name.clone(),
            static_ports: Vec::new(),
            dynamic_ports: Vec::new(),
            calculated: false,
            allow_recursion: kind.allow_recursion,
            continue_calculation: kind.continue_calculation,
            state: (kind.initial_state)(),
            cached_outputs: IndexMap::new(),
        }
    }

    /// Whether cached outputs reflect the latest successful calculation
    pub fn is_calculated(&self) -> bool {
        self.calculated
    }

    /// Get a port ID by index (declared ports first, then dynamic)
    pub fn port_at(&self, index: usize) -> Option<PortId> {
        self.ports().nth(index)
    }

    /// All port IDs, declared first then dynamic
    pub fn ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.static_ports
            .iter()
            .chain(self.dynamic_ports.iter())
            .copied()
    }

    /// Number of ports
    pub fn port_count(&self) -> usize {
        self.static_ports.len() + self.dynamic_ports.len()
    }

    /// Whether a port was declared by the node kind
    pub fn is_static_port(&self, port: PortId) -> bool {
        self.static_ports.contains(&port)
    }

    /// Current state
    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Cached output value of a port
    pub fn cached_output(&self, port: PortId) -> Option<&Value> {
        self.cached_outputs.get(&port)
    }
}

/// Registry of available node kinds and value types
pub struct NodeRegistry {
    types: TypeRegistry,
    kinds: IndexMap<String, NodeKind>,
}

impl NodeRegistry {
    /// Create a registry over the given value types
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            types,
            kinds: IndexMap::new(),
        }
    }

    /// Register a node kind.
    ///
    /// Every declared port type must resolve and port names must be unique
    /// per direction.
    pub fn register(&mut self, kind: NodeKind) -> Result<()> {
        if self.kinds.contains_key(&kind.id) {
            return Err(InvalidOperation::DuplicateNodeKind(kind.id).into());
        }

        let mut seen: Vec<(&str, PortDirection)> = Vec::new();
        for port in &kind.ports {
            self.types.resolve(&port.type_tag)?;
            if seen.contains(&(port.name.as_str(), port.direction)) {
                return Err(InvalidOperation::DuplicatePortName {
                    owner: format!("node kind '{}'", kind.id),
                    name: port.name.clone(),
                }
                .into());
            }
            seen.push((port.name.as_str(), port.direction));
        }

        tracing::debug!("Registered node kind '{}' ({} ports)", kind.id, kind.ports.len());
        self.kinds.insert(kind.id.clone(), kind);
        Ok(())
    }

    /// Get a node kind by ID
    pub fn get(&self, id: &str) -> Option<&NodeKind> {
        self.kinds.get(id)
    }

    /// Get all registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = &NodeKind> {
        self.kinds.values()
    }

    /// Get kinds by category
    pub fn kinds_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeKind> {
        self.kinds.values().filter(move |k| k.category == category)
    }

    /// Value types
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(TypeRegistry::with_builtin_types())
    }
}
