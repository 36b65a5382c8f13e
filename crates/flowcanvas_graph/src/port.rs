// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.

use crate::connection::ConnectionId;
use crate::node::NodeId;
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(pub Uuid);

impl PortId {
    /// Create a new random port ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// Declared port on a node kind, before its type tag is resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port name, unique per direction on a node
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Value-type tag, resolved through the type registry
    pub type_tag: String,
    /// Whether multiple connections are allowed
    pub multi_connection: bool,
}

impl PortSpec {
    /// Declare an input port
    pub fn input(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
            type_tag: type_tag.into(),
            multi_connection: false,
        }
    }

    /// Declare an output port
    pub fn output(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
            type_tag: type_tag.into(),
            multi_connection: true, // Outputs fan out by default
        }
    }

    /// Allow an input to accept several connections
    pub fn multi(mut self) -> Self {
        self.multi_connection = true;
        self
    }
}

/// A port instance on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Unique port ID
    pub id: PortId,
    /// Owning node
    pub node: NodeId,
    /// Port name
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Data type
    pub value_type: ValueType,
    /// Whether multiple connections are allowed
    pub multi_connection: bool,
    /// Created at run time rather than declared by the node kind
    pub dynamic: bool,
    /// Connections attached to this port, in creation order
    pub(crate) connections: Vec<ConnectionId>,
}

impl Port {
    /// Create a new port
    pub fn new(
        id: PortId,
        node: NodeId,
        name: impl Into<String>,
        direction: PortDirection,
        value_type: ValueType,
        multi_connection: bool,
    ) -> Self {
        // Outputs always fan out
        let multi_connection = multi_connection || direction == PortDirection::Output;
        Self {
            id,
            node,
            name: name.into(),
            direction,
            value_type,
            multi_connection,
            dynamic: false,
            connections: Vec::new(),
        }
    }

    /// Check whether this is an input port
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    /// Check whether this is an output port
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }

    /// Connections attached to this port
    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    /// Whether at least one connection is attached
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Whether another connection may be attached without severing one
    pub fn has_free_slot(&self) -> bool {
        self.multi_connection || self.connections.is_empty()
    }
}
