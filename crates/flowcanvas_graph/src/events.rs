// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural change notifications for editors and undo recorders.

use crate::canvas::Canvas;
use crate::connection::ConnectionId;
use crate::node::NodeId;
use crate::port::PortId;
use serde::{Deserialize, Serialize};

/// A structural change on a canvas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanvasEvent {
    /// A node was created
    NodeAdded {
        /// New node
        node: NodeId,
    },
    /// A node and all its ports were removed
    NodeDeleted {
        /// Removed node
        node: NodeId,
    },
    /// A dynamic port was created
    PortAdded {
        /// Owning node
        node: NodeId,
        /// New port
        port: PortId,
    },
    /// A dynamic port was removed
    PortRemoved {
        /// Owning node
        node: NodeId,
        /// Removed port
        port: PortId,
    },
    /// Two ports were linked
    ConnectionAdded {
        /// New connection
        connection: ConnectionId,
        /// Output end
        output: PortId,
        /// Input end
        input: PortId,
    },
    /// Two ports were unlinked
    ConnectionRemoved {
        /// Removed connection
        connection: ConnectionId,
        /// Output end
        output: PortId,
        /// Input end
        input: PortId,
    },
}

/// Handle returned by [`Observers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&Canvas, &CanvasEvent)>;

/// Synchronous observer list
#[derive(Default)]
pub struct Observers {
    next_id: u64,
    observers: Vec<(ObserverId, Observer)>,
}

impl Observers {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub fn subscribe(
        &mut self,
        observer: impl FnMut(&Canvas, &CanvasEvent) + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Deliver an event to every observer, in subscription order
    pub fn emit(&mut self, canvas: &Canvas, event: &CanvasEvent) {
        tracing::trace!("Canvas event: {event:?}");
        for (_, observer) in &mut self.observers {
            observer(canvas, event);
        }
    }

    /// Number of observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether nobody is listening
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.observers.len())
            .finish()
    }
}
