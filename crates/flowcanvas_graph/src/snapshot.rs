// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural snapshots of a canvas.
//!
//! A snapshot records stable node and port identifiers, connection pairs and
//! node state. Restoring one rebuilds an isomorphic canvas, re-establishing
//! every connection through the same validation used interactively.

use crate::canvas::{Canvas, CanvasKind};
use crate::error::Result;
use crate::evaluation::NodeState;
use crate::node::{NodeId, NodeRegistry};
use crate::port::{PortDirection, PortId};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Serializable structure of a whole canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    /// Format version
    pub version: u32,
    /// Canvas kind
    pub kind: CanvasKind,
    /// Nodes, in creation order
    pub nodes: Vec<NodeSnapshot>,
    /// Connections, in creation order
    pub connections: Vec<ConnectionSnapshot>,
}

/// Serializable node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Node ID
    pub id: NodeId,
    /// Node kind ID
    pub kind: String,
    /// Display name
    pub name: String,
    /// Recursion policy
    pub allow_recursion: bool,
    /// Propagation policy
    pub continue_calculation: bool,
    /// Node state
    #[serde(default)]
    pub state: NodeState,
    /// Ports, declared first then dynamic
    pub ports: Vec<PortSnapshot>,
}

/// Serializable port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    /// Port ID
    pub id: PortId,
    /// Port name
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Value-type tag
    pub type_tag: String,
    /// Whether multiple connections are allowed
    pub multi_connection: bool,
    /// Created at run time
    pub dynamic: bool,
}

/// Serializable connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    /// Output port
    pub output: PortId,
    /// Input port
    pub input: PortId,
}

impl CanvasSnapshot {
    /// Current snapshot format version
    pub const FORMAT_VERSION: u32 = 1;

    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self> {
        Ok(ron::from_str(s)?)
    }
}

impl Canvas {
    /// Capture the structure of this canvas
    pub fn snapshot(&self) -> CanvasSnapshot {
        let nodes = self
            .nodes()
            .map(|node| NodeSnapshot {
                id: node.id,
                kind: node.kind.clone(),
                name: node.name.clone(),
                allow_recursion: node.allow_recursion,
                continue_calculation: node.continue_calculation,
                state: node.state().clone(),
                ports: self
                    .ports_of(node.id)
                    .map(|port| PortSnapshot {
                        id: port.id,
                        name: port.name.clone(),
                        direction: port.direction,
                        type_tag: port.value_type.tag().to_string(),
                        multi_connection: port.multi_connection,
                        dynamic: port.dynamic,
                    })
                    .collect(),
            })
            .collect();

        let connections = self
            .connections()
            .map(|c| ConnectionSnapshot {
                output: c.output_port,
                input: c.input_port,
            })
            .collect();

        CanvasSnapshot {
            version: CanvasSnapshot::FORMAT_VERSION,
            kind: self.kind().clone(),
            nodes,
            connections,
        }
    }

    /// Rebuild a canvas from a snapshot and recompute it.
    ///
    /// Nodes, ports and connections are restored without propagation, then
    /// the canvas is traversed once. Restoring is therefore equivalent to one
    /// [`Canvas::traverse_all`] over the saved graph: a node's calculate
    /// function runs exactly once on top of its saved state.
    ///
    /// Unknown node kinds, unknown types and duplicate identifiers are hard
    /// failures. A connection the validator refuses is skipped and logged.
    pub fn from_snapshot(snapshot: &CanvasSnapshot, registry: Rc<NodeRegistry>) -> Result<Self> {
        if snapshot.version != CanvasSnapshot::FORMAT_VERSION {
            tracing::warn!(
                "Snapshot format version {} differs from {}",
                snapshot.version,
                CanvasSnapshot::FORMAT_VERSION
            );
        }

        let mut canvas = Canvas::new(snapshot.kind.clone(), registry);
        canvas.propagation_deferred = true;

        for node in &snapshot.nodes {
            let static_ids: Vec<PortId> = node
                .ports
                .iter()
                .filter(|p| !p.dynamic)
                .map(|p| p.id)
                .collect();
            canvas.instantiate(&node.kind, node.id, &static_ids)?;

            if let Some(restored) = canvas.nodes.get_mut(&node.id) {
                restored.name = node.name.clone();
                restored.allow_recursion = node.allow_recursion;
                restored.continue_calculation = node.continue_calculation;
                restored.state = node.state.clone();
            }

            for port in node.ports.iter().filter(|p| p.dynamic) {
                canvas.insert_dynamic_port(
                    port.id,
                    node.id,
                    port.name.clone(),
                    port.direction,
                    &port.type_tag,
                    port.multi_connection,
                )?;
            }
        }

        let mut skipped = 0;
        for connection in &snapshot.connections {
            if let Err(err) = canvas.connect(connection.output, connection.input) {
                tracing::warn!(
                    "Skipping connection {} -> {}: {err}",
                    connection.output,
                    connection.input
                );
                skipped += 1;
            }
        }

        canvas.propagation_deferred = false;
        let calculated = canvas.traverse_all();
        tracing::debug!(
            "Restored canvas '{}': {} node(s), {} connection(s), {skipped} skipped, {calculated} calculated",
            canvas.kind().name,
            canvas.node_count(),
            canvas.connection_count()
        );
        Ok(canvas)
    }
}
