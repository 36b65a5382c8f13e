// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed dataflow graph engine for `FlowCanvas`.
//!
//! A canvas holds nodes with typed input and output ports. Connecting two
//! ports is validated (direction, type, cycles) and every structural change
//! incrementally recomputes the affected part of the graph in dependency
//! order.
//!
//! ## Architecture
//!
//! The engine is built on a small generic model:
//! - A [`TypeRegistry`] of value types with aliases and defaults
//! - A [`NodeRegistry`] of node kinds, each with declared ports and a pure
//!   calculation function
//! - A [`Canvas`] owning nodes, ports and connections in stable-ID arenas
//! - Propagation walks guarded by a scoped [`TraversalContext`]
//! - RON snapshots for persistence

pub mod canvas;
pub mod connection;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod guard;
pub mod node;
pub mod port;
pub mod propagation;
pub mod snapshot;
pub mod value;

#[cfg(test)]
mod test_support;

pub use canvas::{Canvas, CanvasKind};
pub use connection::{Connection, ConnectionId};
pub use error::{ConnectionError, GraphError, InvalidOperation, Result};
pub use evaluation::{
    CalculateFn, EvaluationContext, EvaluationError, InputSlot, NodeOutput, NodeState,
};
pub use events::{CanvasEvent, ObserverId, Observers};
pub use guard::TraversalContext;
pub use node::{Node, NodeCategory, NodeId, NodeKind, NodeRegistry};
pub use port::{Port, PortDirection, PortId, PortSpec};
pub use snapshot::{CanvasSnapshot, ConnectionSnapshot, NodeSnapshot, PortSnapshot};
pub use value::{PortData, Rgba, TypeRegistry, Value, ValueType, ValueTypeDescriptor};
