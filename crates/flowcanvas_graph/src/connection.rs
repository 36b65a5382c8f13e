// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) definitions for the graph.

use crate::node::NodeId;
use crate::port::PortId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection from one output port into one input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Node owning the output port
    pub output_node: NodeId,
    /// Output port
    pub output_port: PortId,
    /// Node owning the input port
    pub input_node: NodeId,
    /// Input port
    pub input_port: PortId,
}

impl Connection {
    /// Create a new connection
    pub fn new(
        output_node: NodeId,
        output_port: PortId,
        input_node: NodeId,
        input_port: PortId,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            output_node,
            output_port,
            input_node,
            input_port,
        }
    }

    /// Port at the other end from `port_id`
    pub fn peer_of(&self, port_id: PortId) -> Option<PortId> {
        if self.output_port == port_id {
            Some(self.input_port)
        } else if self.input_port == port_id {
            Some(self.output_port)
        } else {
            None
        }
    }

    /// Whether this connection links exactly these two ports, in either order
    pub fn links(&self, a: PortId, b: PortId) -> bool {
        (self.output_port == a && self.input_port == b)
            || (self.output_port == b && self.input_port == a)
    }
}
