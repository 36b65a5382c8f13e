// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node evaluation contract.
//!
//! A node kind computes its outputs with a plain function of its gathered
//! inputs and its state:
//!
//! ```text
//! (EvaluationContext, NodeState) -> NodeOutput { values, new state }
//! ```
//!
//! The canvas gathers the inputs, calls the function and applies the result.

use crate::node::NodeId;
use crate::value::{PortData, TypeRegistry, Value, ValueType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Calculate function of a node kind
pub type CalculateFn = fn(&EvaluationContext<'_>, &NodeState) -> Result<NodeOutput, EvaluationError>;

/// Named values persisted on a node between calculations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeState(IndexMap<String, Value>);

impl NodeState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a raw value
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a typed value
    pub fn get<T: PortData>(&self, key: &str) -> Option<T> {
        self.0.get(key).and_then(T::from_value)
    }

    /// Set a value, returning the previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the state holds nothing
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Gathered value(s) of one input port
#[derive(Debug, Clone)]
pub struct InputSlot {
    /// Declared type of the port
    pub value_type: ValueType,
    /// Whether any connection is attached
    pub connected: bool,
    /// One entry per connection, in connection order. Sources that are not
    /// calculated contribute their type default.
    pub values: Vec<Value>,
}

/// Read-only view handed to a calculate function
pub struct EvaluationContext<'a> {
    node: NodeId,
    types: &'a TypeRegistry,
    inputs: IndexMap<String, InputSlot>,
    outputs: IndexMap<String, ValueType>,
}

impl<'a> EvaluationContext<'a> {
    /// Create a context from gathered inputs and the node's output layout
    pub fn new(
        node: NodeId,
        types: &'a TypeRegistry,
        inputs: IndexMap<String, InputSlot>,
        outputs: IndexMap<String, ValueType>,
    ) -> Self {
        Self {
            node,
            types,
            inputs,
            outputs,
        }
    }

    /// Node being calculated
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Get the input value for a port, or its type default when disconnected
    pub fn value(&self, port: &str) -> Option<Value> {
        let slot = self.inputs.get(port)?;
        Some(
            slot.values
                .first()
                .cloned()
                .unwrap_or_else(|| self.types.default_value(slot.value_type)),
        )
    }

    /// All values arriving on a multi-connection input
    pub fn values(&self, port: &str) -> Vec<Value> {
        self.inputs
            .get(port)
            .map(|slot| slot.values.clone())
            .unwrap_or_default()
    }

    /// Typed input value, falling back to the default of `T`
    pub fn get<T: PortData>(&self, port: &str) -> T {
        self.value(port)
            .and_then(|v| T::from_value(&v))
            .unwrap_or_else(|| self.types.default_of::<T>())
    }

    /// Typed input value that must be connected
    pub fn require<T: PortData>(&self, port: &str) -> Result<T, EvaluationError> {
        if !self.is_connected(port) {
            return Err(EvaluationError::MissingInput(port.to_string()));
        }
        let value = self
            .value(port)
            .ok_or_else(|| EvaluationError::MissingInput(port.to_string()))?;
        T::from_value(&value).ok_or_else(|| EvaluationError::TypeMismatch {
            port: port.to_string(),
            expected: T::VALUE_TYPE,
            found: value.value_type(),
        })
    }

    /// Whether an input has at least one connection
    pub fn is_connected(&self, port: &str) -> bool {
        self.inputs.get(port).is_some_and(|slot| slot.connected)
    }

    /// Input port names, declared first then dynamic
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    /// Output port names with their types
    pub fn outputs(&self) -> impl Iterator<Item = (&str, ValueType)> {
        self.outputs.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Type registry in use
    pub fn types(&self) -> &TypeRegistry {
        self.types
    }
}

/// Result of calculating a node
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    /// Output values by port name
    pub values: IndexMap<String, Value>,
    /// Replacement state, if the calculation changed it
    pub state: Option<NodeState>,
}

impl NodeOutput {
    /// Create a new empty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an output value
    pub fn set(&mut self, port: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(port.into(), value.into());
    }

    /// Builder-style [`NodeOutput::set`]
    pub fn with(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(port, value);
        self
    }

    /// Replace the node state
    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = Some(state);
        self
    }

    /// Get an output value
    pub fn get(&self, port: &str) -> Option<&Value> {
        self.values.get(port)
    }
}

/// Error during evaluation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Type mismatch
    #[error("Type mismatch on '{port}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Input port name
        port: String,
        /// Expected type
        expected: ValueType,
        /// Type actually received
        found: ValueType,
    },

    /// Custom error
    #[error("{0}")]
    Custom(String),
}
