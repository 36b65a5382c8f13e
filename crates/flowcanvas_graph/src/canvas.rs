// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canvas: the container owning nodes, ports and connections.
//!
//! Nodes, ports and connections live in insertion-ordered arenas keyed by
//! stable identifiers. Ports reference their connections by ID and every
//! connection is listed on both of its ports.

use crate::connection::{Connection, ConnectionId};
use crate::error::{ConnectionError, GraphError, InvalidOperation, Result};
use crate::evaluation::{EvaluationContext, InputSlot};
use crate::events::{CanvasEvent, ObserverId, Observers};
use crate::guard::TraversalContext;
use crate::node::{Node, NodeId, NodeRegistry};
use crate::port::{Port, PortDirection, PortId};
use crate::value::{PortData, TypeRegistry, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Configuration of a kind of canvas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasKind {
    /// Kind name
    pub name: String,
    /// Node kinds that may be created; `None` permits every registered kind
    #[serde(default)]
    pub allowed_kinds: Option<Vec<String>>,
}

impl CanvasKind {
    /// Canvas kind accepting every node kind
    pub fn unrestricted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_kinds: None,
        }
    }

    /// Canvas kind accepting only the listed node kinds
    pub fn restricted<I, S>(name: impl Into<String>, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            allowed_kinds: Some(kinds.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether a node kind may be created on this canvas kind
    pub fn permits(&self, node_kind: &str) -> bool {
        self.allowed_kinds
            .as_ref()
            .map_or(true, |kinds| kinds.iter().any(|k| k == node_kind))
    }
}

impl Default for CanvasKind {
    fn default() -> Self {
        Self::unrestricted("default")
    }
}

/// A canvas of nodes
pub struct Canvas {
    kind: CanvasKind,
    registry: Rc<NodeRegistry>,
    pub(crate) nodes: IndexMap<NodeId, Node>,
    pub(crate) ports: IndexMap<PortId, Port>,
    pub(crate) connections: IndexMap<ConnectionId, Connection>,
    observers: Observers,
    /// Set while a snapshot is being rebuilt; structural edits skip propagation
    pub(crate) propagation_deferred: bool,
}

impl Canvas {
    /// Create an empty canvas
    pub fn new(kind: CanvasKind, registry: Rc<NodeRegistry>) -> Self {
        Self {
            kind,
            registry,
            nodes: IndexMap::new(),
            ports: IndexMap::new(),
            connections: IndexMap::new(),
            observers: Observers::new(),
            propagation_deferred: false,
        }
    }

    /// Canvas kind
    pub fn kind(&self) -> &CanvasKind {
        &self.kind
    }

    /// Node registry in use
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Value types in use
    pub fn types(&self) -> &TypeRegistry {
        self.registry.types()
    }

    /// Register a structural change observer. It is called after each change
    /// completes, with a read-only view of the canvas.
    pub fn subscribe(
        &mut self,
        observer: impl FnMut(&Canvas, &CanvasEvent) + 'static,
    ) -> ObserverId {
        self.observers.subscribe(observer)
    }

    /// Remove an observer
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    fn notify(&mut self, event: CanvasEvent) {
        let mut observers = std::mem::take(&mut self.observers);
        observers.emit(self, &event);
        self.observers = observers;
    }

    // ---------------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------------

    /// Create a node of a registered kind
    pub fn create_node(&mut self, kind_id: &str) -> Result<NodeId> {
        self.instantiate(kind_id, NodeId::new(), &[])
    }

    /// Create a node with caller-chosen identifiers. Declared ports take
    /// their IDs from `static_port_ids` by index; missing entries get fresh IDs.
    pub(crate) fn instantiate(
        &mut self,
        kind_id: &str,
        id: NodeId,
        static_port_ids: &[PortId],
    ) -> Result<NodeId> {
        let registry = Rc::clone(&self.registry);
        let kind = registry
            .get(kind_id)
            .ok_or_else(|| InvalidOperation::UnknownNodeKind(kind_id.to_string()))?;

        if !self.kind.permits(kind_id) {
            return Err(InvalidOperation::NodeKindNotPermitted {
                kind: kind_id.to_string(),
                canvas: self.kind.name.clone(),
            }
            .into());
        }
        if self.nodes.contains_key(&id) {
            return Err(InvalidOperation::DuplicateNode(id).into());
        }

        // Resolve everything before touching the arenas
        let mut ports = Vec::with_capacity(kind.ports.len());
        for (index, spec) in kind.ports.iter().enumerate() {
            let value_type = registry.types().resolve(&spec.type_tag)?;
            let port_id = static_port_ids.get(index).copied().unwrap_or_default();
            if self.ports.contains_key(&port_id) || ports.iter().any(|p: &Port| p.id == port_id) {
                return Err(InvalidOperation::DuplicatePort(port_id).into());
            }
            ports.push(Port::new(
                port_id,
                id,
                spec.name.clone(),
                spec.direction,
                value_type,
                spec.multi_connection,
            ));
        }

        let mut node = Node::new(id, kind);
        for port in ports {
            node.static_ports.push(port.id);
            if port.is_output() {
                node.cached_outputs
                    .insert(port.id, registry.types().default_value(port.value_type));
            }
            self.ports.insert(port.id, port);
        }
        self.nodes.insert(id, node);

        tracing::debug!("Created node {id} of kind '{kind_id}'");
        self.notify(CanvasEvent::NodeAdded { node: id });
        self.recalculate_from(id)?;
        Ok(id)
    }

    /// Delete a node, all its ports and their connections
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        let port_ids: Vec<PortId> = self.require_node(id)?.ports().collect();
        for port in &port_ids {
            self.verify_port_links(*port)?;
        }
        let downstream = self.downstream_nodes(id);

        // Invalidate before the topology changes
        self.clear_calculation(id)?;

        for port in &port_ids {
            self.sever_all(*port)?;
        }
        for port in &port_ids {
            self.ports.shift_remove(port);
        }
        self.nodes.shift_remove(&id);

        tracing::debug!("Deleted node {id}");
        self.notify(CanvasEvent::NodeDeleted { node: id });

        for next in downstream {
            if self.nodes.contains_key(&next) {
                self.recalculate_from(next)?;
            }
        }
        Ok(())
    }

    /// Get a node by ID
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get all nodes, in creation order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs, in creation order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether a node's cached outputs are valid
    pub fn is_calculated(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(Node::is_calculated)
    }

    /// Replace one entry of a node's state and recalculate from it
    pub fn set_state_value(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.require_node_mut(id)?.state.set(key, value);
        self.recalculate_from(id)?;
        Ok(())
    }

    /// Change whether successful calculation propagates downstream
    pub fn set_continue_calculation(&mut self, id: NodeId, enabled: bool) -> Result<()> {
        self.require_node_mut(id)?.continue_calculation = enabled;
        Ok(())
    }

    /// Change whether cycles may close through a node
    pub fn set_allow_recursion(&mut self, id: NodeId, allowed: bool) -> Result<()> {
        self.require_node_mut(id)?.allow_recursion = allowed;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Ports
    // ---------------------------------------------------------------------

    /// Create a dynamic port on a node
    pub fn create_port(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        direction: PortDirection,
        type_tag: &str,
        multi_connection: bool,
    ) -> Result<PortId> {
        self.insert_dynamic_port(PortId::new(), node, name.into(), direction, type_tag, multi_connection)
    }

    pub(crate) fn insert_dynamic_port(
        &mut self,
        id: PortId,
        node: NodeId,
        name: String,
        direction: PortDirection,
        type_tag: &str,
        multi_connection: bool,
    ) -> Result<PortId> {
        self.require_node(node)?;
        let value_type = self.registry.types().resolve(type_tag)?;
        if self.ports.contains_key(&id) {
            return Err(InvalidOperation::DuplicatePort(id).into());
        }
        if self.port_named(node, &name, direction).is_some() {
            return Err(InvalidOperation::DuplicatePortName {
                owner: format!("node {node}"),
                name,
            }
            .into());
        }

        let mut port = Port::new(id, node, name, direction, value_type, multi_connection);
        port.dynamic = true;
        let default = self.registry.types().default_value(value_type);

        let owner = self.require_node_mut(node)?;
        owner.dynamic_ports.push(id);
        if direction == PortDirection::Output {
            owner.cached_outputs.insert(id, default);
        }
        self.ports.insert(id, port);

        tracing::debug!("Created dynamic port {id} on node {node}");
        self.notify(CanvasEvent::PortAdded { node, port: id });
        self.recalculate_from(node)?;
        Ok(id)
    }

    /// Create a dynamic port matching `peer` and connect it.
    ///
    /// The new port has the peer's type and the opposite direction. The port
    /// is kept even when the connection is refused.
    pub fn create_connection_port(&mut self, node: NodeId, peer: PortId) -> Result<PortId> {
        let peer_port = self.require_port(peer)?;
        let direction = match peer_port.direction {
            PortDirection::Input => PortDirection::Output,
            PortDirection::Output => PortDirection::Input,
        };
        let type_tag = peer_port.value_type.tag();
        let base = peer_port.name.clone();

        let mut name = base.clone();
        let mut suffix = 1;
        while self.port_named(node, &name, direction).is_some() {
            suffix += 1;
            name = format!("{base} {suffix}");
        }

        let port = self.create_port(node, name, direction, type_tag, false)?;
        self.try_apply_connection(port, peer);
        Ok(port)
    }

    /// Remove a dynamic port, severing its connections first
    pub fn delete_port(&mut self, id: PortId) -> Result<()> {
        let port = self.require_port(id)?;
        let owner = port.node;
        if self.require_node(owner)?.is_static_port(id) {
            return Err(InvalidOperation::StaticPortRemoval(id).into());
        }
        self.verify_port_links(id)?;

        let affected: Vec<NodeId> = match port.direction {
            PortDirection::Input => vec![owner],
            PortDirection::Output => self.peer_nodes(id),
        };
        for node in &affected {
            self.clear_calculation(*node)?;
        }

        self.sever_all(id)?;
        let node = self.require_node_mut(owner)?;
        node.dynamic_ports.retain(|p| *p != id);
        node.cached_outputs.shift_remove(&id);
        self.ports.shift_remove(&id);

        tracing::debug!("Removed dynamic port {id} from node {owner}");
        self.notify(CanvasEvent::PortRemoved { node: owner, port: id });

        for node in affected {
            self.recalculate_from(node)?;
        }
        Ok(())
    }

    /// Get a port by ID
    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    /// Ports of a node, declared first then dynamic
    pub fn ports_of(&self, node: NodeId) -> impl Iterator<Item = &Port> {
        self.nodes
            .get(&node)
            .into_iter()
            .flat_map(Node::ports)
            .filter_map(|id| self.ports.get(&id))
    }

    /// Port of a node by index (declared first then dynamic)
    pub fn port_at(&self, node: NodeId, index: usize) -> Option<PortId> {
        self.nodes.get(&node)?.port_at(index)
    }

    /// Find a port by name and direction
    pub fn port_named(&self, node: NodeId, name: &str, direction: PortDirection) -> Option<PortId> {
        self.ports_of(node)
            .find(|p| p.direction == direction && p.name == name)
            .map(|p| p.id)
    }

    /// Find an input port by name
    pub fn input(&self, node: NodeId, name: &str) -> Option<PortId> {
        self.port_named(node, name, PortDirection::Input)
    }

    /// Find an output port by name
    pub fn output(&self, node: NodeId, name: &str) -> Option<PortId> {
        self.port_named(node, name, PortDirection::Output)
    }

    // ---------------------------------------------------------------------
    // Connections
    // ---------------------------------------------------------------------

    /// Validate a connection from `output` into `input` without applying it.
    ///
    /// A connection closing a loop is refused iff the node it enters is an
    /// ancestor of the output's node and does not allow recursion. Only that
    /// entry node is consulted: other nodes on the loop may forbid recursion
    /// and still end up on it, e.g. the step node of a counter that feeds
    /// back into itself. Propagation terminates regardless, since every walk
    /// visits a node at most once.
    pub fn check_connection(
        &self,
        output: PortId,
        input: PortId,
    ) -> std::result::Result<(), ConnectionError> {
        let out_port = self
            .ports
            .get(&output)
            .ok_or(ConnectionError::PortNotFound(output))?;
        let in_port = self
            .ports
            .get(&input)
            .ok_or(ConnectionError::PortNotFound(input))?;

        if !out_port.is_output() || !in_port.is_input() {
            return Err(ConnectionError::WrongDirection);
        }
        if out_port.node == in_port.node {
            return Err(ConnectionError::SameNode);
        }
        if out_port.value_type != in_port.value_type {
            return Err(ConnectionError::TypeMismatch {
                output: out_port.value_type.tag().to_string(),
                input: in_port.value_type.tag().to_string(),
            });
        }
        if self.are_connected(output, input) {
            return Err(ConnectionError::AlreadyConnected);
        }

        let input_node = self
            .nodes
            .get(&in_port.node)
            .ok_or(ConnectionError::NodeNotFound(in_port.node))?;
        if !self.nodes.contains_key(&out_port.node) {
            return Err(ConnectionError::NodeNotFound(out_port.node));
        }
        if !input_node.allow_recursion && self.is_ancestor(in_port.node, out_port.node) {
            return Err(ConnectionError::WouldCreateCycle(in_port.node));
        }
        Ok(())
    }

    /// Whether `output` may be connected into `input`
    pub fn can_connect(&self, output: PortId, input: PortId) -> bool {
        self.check_connection(output, input).is_ok()
    }

    /// Connect two ports given in either order
    pub fn connect(&mut self, a: PortId, b: PortId) -> std::result::Result<ConnectionId, ConnectionError> {
        let (output, input) = self.orient(a, b)?;
        self.check_connection(output, input)?;

        // Make room on a single-connection input
        let replaced: Vec<ConnectionId> = match self.ports.get(&input) {
            Some(port) if !port.has_free_slot() => port.connections.clone(),
            _ => Vec::new(),
        };
        for connection in replaced {
            if let Err(err) = self.unlink(connection) {
                tracing::warn!("Could not replace connection {connection}: {err}");
                return Err(ConnectionError::AlreadyConnected);
            }
        }

        let output_node = self.ports[&output].node;
        let input_node = self.ports[&input].node;
        let connection = Connection::new(output_node, output, input_node, input);
        let id = connection.id;
        self.connections.insert(id, connection);
        if let Some(port) = self.ports.get_mut(&output) {
            port.connections.push(id);
        }
        if let Some(port) = self.ports.get_mut(&input) {
            port.connections.push(id);
        }

        tracing::debug!("Connected {output} -> {input}");
        self.notify(CanvasEvent::ConnectionAdded {
            connection: id,
            output,
            input,
        });

        if let Err(err) = self.recalculate_from(input_node) {
            tracing::warn!("Recalculation after connecting failed: {err}");
        }
        Ok(id)
    }

    /// Connect two ports given in either order; `false` if refused
    pub fn try_apply_connection(&mut self, a: PortId, b: PortId) -> bool {
        match self.connect(a, b) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("Connection {a} <-> {b} refused: {err}");
                false
            }
        }
    }

    /// Remove the connection between `port` and `peer`.
    ///
    /// Returns `false` if they were not connected.
    pub fn remove_connection(&mut self, port: PortId, peer: PortId) -> Result<bool> {
        let Some(connection) = self
            .require_port(port)?
            .connections
            .iter()
            .copied()
            .find(|c| self.connections.get(c).is_some_and(|c| c.links(port, peer)))
        else {
            return Ok(false);
        };

        let removed = self.unlink(connection)?;
        self.recalculate_from(removed.input_node)?;
        Ok(true)
    }

    /// Remove a connection by ID
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<bool> {
        let Some(connection) = self.connections.get(&id) else {
            return Ok(false);
        };
        let (output, input) = (connection.output_port, connection.input_port);
        self.remove_connection(output, input)
    }

    /// Remove every connection of a port. Returns how many were removed.
    pub fn disconnect_all(&mut self, port: PortId) -> Result<usize> {
        let affected = match self.require_port(port)?.direction {
            PortDirection::Input => vec![self.ports[&port].node],
            PortDirection::Output => self.peer_nodes(port),
        };
        let count = self.sever_all(port)?;
        for node in affected {
            self.recalculate_from(node)?;
        }
        Ok(count)
    }

    /// Get a connection by ID
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Get all connections, in creation order
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Connections attached to a port, in creation order
    pub fn connections_of(&self, port: PortId) -> impl Iterator<Item = &Connection> {
        self.ports
            .get(&port)
            .into_iter()
            .flat_map(|p| p.connections.iter())
            .filter_map(|id| self.connections.get(id))
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether the two ports are linked
    pub fn are_connected(&self, a: PortId, b: PortId) -> bool {
        self.connections_of(a).any(|c| c.links(a, b))
    }

    fn orient(&self, a: PortId, b: PortId) -> std::result::Result<(PortId, PortId), ConnectionError> {
        let pa = self.ports.get(&a).ok_or(ConnectionError::PortNotFound(a))?;
        let pb = self.ports.get(&b).ok_or(ConnectionError::PortNotFound(b))?;
        match (pa.direction, pb.direction) {
            (PortDirection::Output, PortDirection::Input) => Ok((a, b)),
            (PortDirection::Input, PortDirection::Output) => Ok((b, a)),
            _ => Err(ConnectionError::WrongDirection),
        }
    }

    /// Remove a connection from the arena and both port lists.
    ///
    /// Bookkeeping is verified before anything is mutated.
    fn unlink(&mut self, id: ConnectionId) -> Result<Connection> {
        let connection = self.verified(id)?.clone();

        self.connections.shift_remove(&id);
        for port in [connection.output_port, connection.input_port] {
            if let Some(port) = self.ports.get_mut(&port) {
                port.connections.retain(|c| *c != id);
            }
        }

        tracing::debug!(
            "Disconnected {} -> {}",
            connection.output_port,
            connection.input_port
        );
        self.notify(CanvasEvent::ConnectionRemoved {
            connection: id,
            output: connection.output_port,
            input: connection.input_port,
        });
        Ok(connection)
    }

    /// A connection that exists and is listed on both of its ports
    fn verified(&self, id: ConnectionId) -> Result<&Connection> {
        let connection = self
            .connections
            .get(&id)
            .ok_or(InvalidOperation::ConnectionNotFound(id))?;

        let listed = |port: PortId| {
            self.ports
                .get(&port)
                .is_some_and(|p| p.connections.contains(&id))
        };
        if !listed(connection.output_port) || !listed(connection.input_port) {
            return Err(InvalidOperation::AsymmetricConnection(
                connection.output_port,
                connection.input_port,
            )
            .into());
        }
        Ok(connection)
    }

    fn verify_port_links(&self, port: PortId) -> Result<()> {
        for id in self.require_port(port)?.connections() {
            self.verified(*id)?;
        }
        Ok(())
    }

    /// Unlink every connection of a port, verifying all of them first
    fn sever_all(&mut self, port: PortId) -> Result<usize> {
        self.verify_port_links(port)?;
        let ids = self.require_port(port)?.connections.clone();
        for id in &ids {
            self.unlink(*id)?;
        }
        Ok(ids.len())
    }

    /// Nodes on the far side of a port's connections, in connection order
    fn peer_nodes(&self, port: PortId) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        let peers = self
            .connections_of(port)
            .filter_map(|c| c.peer_of(port))
            .filter_map(|p| self.ports.get(&p));
        for peer in peers {
            if !nodes.contains(&peer.node) {
                nodes.push(peer.node);
            }
        }
        nodes
    }

    // ---------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------

    /// Current value seen at a port.
    ///
    /// For an input this is the connected output's cached value when its
    /// node is calculated, else the type default. For an output it is the
    /// cached value. `None` only for an unknown port.
    pub fn value(&self, port: PortId) -> Option<Value> {
        let p = self.ports.get(&port)?;
        let value = match p.direction {
            PortDirection::Output => self.output_value(port),
            PortDirection::Input => self
                .connections_of(port)
                .next()
                .and_then(|c| self.output_value(c.output_port)),
        };
        Some(value.unwrap_or_else(|| self.types().default_value(p.value_type)))
    }

    /// All values arriving on an input, one per connection
    pub fn get_values(&self, port: PortId) -> Vec<Value> {
        let Some(p) = self.ports.get(&port) else {
            return Vec::new();
        };
        self.connections_of(port)
            .map(|c| {
                self.output_value(c.output_port)
                    .unwrap_or_else(|| self.types().default_value(p.value_type))
            })
            .collect()
    }

    /// Typed value at a port. Never fails: disconnected, uncalculated,
    /// unknown or mismatched reads return the default of `T`.
    pub fn get_value<T: PortData>(&self, port: PortId) -> T {
        match self.value(port) {
            Some(value) => T::from_value(&value).unwrap_or_else(|| {
                tracing::warn!(
                    "Port {port} holds {} but {} was requested",
                    value.value_type(),
                    T::VALUE_TYPE
                );
                self.types().default_of::<T>()
            }),
            None => {
                tracing::warn!("Read from unknown port {port}");
                self.types().default_of::<T>()
            }
        }
    }

    /// Write an output port's cached value and recalculate the nodes it feeds.
    ///
    /// A type mismatch is reported and leaves the old value in place. Writes
    /// to an uncalculated node are refused, since they could never be read.
    pub fn set_value<T: PortData>(&mut self, port: PortId, value: T) -> bool {
        let Some(owner) = self.ports.get(&port).map(|p| p.node) else {
            tracing::warn!("Write to unknown port {port}");
            return false;
        };
        if !self.is_calculated(owner) {
            tracing::warn!("Write to port {port} of uncalculated node {owner} ignored");
            return false;
        }
        if !self.store_output(port, value.into_value()) {
            return false;
        }
        for node in self.peer_nodes(port) {
            if let Err(err) = self.recalculate_from(node) {
                tracing::warn!("Recalculation after writing {port} failed: {err}");
            }
        }
        true
    }

    /// Cached value of an output whose node is calculated
    fn output_value(&self, port: PortId) -> Option<Value> {
        let p = self.ports.get(&port)?;
        let node = self.nodes.get(&p.node)?;
        if !node.calculated {
            return None;
        }
        node.cached_output(port).cloned()
    }

    pub(crate) fn store_output(&mut self, port: PortId, value: Value) -> bool {
        let Some(p) = self.ports.get(&port) else {
            tracing::warn!("Write to unknown port {port}");
            return false;
        };
        if !p.is_output() {
            tracing::warn!("Write to input port {port} ignored");
            return false;
        }
        if p.value_type != value.value_type() {
            tracing::warn!(
                "Type mismatch writing {} into {} port '{}'",
                value.value_type(),
                p.value_type,
                p.name
            );
            return false;
        }
        let owner = p.node;
        match self.nodes.get_mut(&owner) {
            Some(node) => {
                node.cached_outputs.insert(port, value);
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // Evaluation plumbing
    // ---------------------------------------------------------------------

    /// Run a node's calculate function and apply its result.
    ///
    /// Returns whether the node ended up calculated.
    pub(crate) fn calculate_node(&mut self, id: NodeId) -> bool {
        let registry = Rc::clone(&self.registry);
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        let Some(kind) = registry.get(&node.kind) else {
            tracing::warn!("Node {id} has unregistered kind '{}'", node.kind);
            return false;
        };

        let mut inputs = IndexMap::new();
        let mut outputs = IndexMap::new();
        for port in node.ports().filter_map(|p| self.ports.get(&p)) {
            match port.direction {
                PortDirection::Input => {
                    inputs.insert(
                        port.name.clone(),
                        InputSlot {
                            value_type: port.value_type,
                            connected: port.is_connected(),
                            values: self.get_values(port.id),
                        },
                    );
                }
                PortDirection::Output => {
                    outputs.insert(port.name.clone(), port.value_type);
                }
            }
        }

        let ctx = EvaluationContext::new(id, registry.types(), inputs, outputs);
        let result = (kind.calculate)(&ctx, &node.state);

        match result {
            Ok(output) => {
                for (name, value) in output.values {
                    match self.output(id, &name) {
                        Some(port) => {
                            self.store_output(port, value);
                        }
                        None => tracing::warn!("Node {id} produced unknown output '{name}'"),
                    }
                }
                if let Some(node) = self.nodes.get_mut(&id) {
                    if let Some(state) = output.state {
                        node.state = state;
                    }
                    node.calculated = true;
                }
                tracing::trace!("Calculated node {id}");
                true
            }
            Err(err) => {
                tracing::warn!("Calculation of node {id} ('{}') failed: {err}", kind.id);
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.calculated = false;
                }
                false
            }
        }
    }

    /// Reset a node to uncalculated with default outputs
    pub(crate) fn reset_outputs(&mut self, id: NodeId) {
        let registry = Rc::clone(&self.registry);
        let ports = &self.ports;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.calculated = false;
            for (port, value) in node.cached_outputs.iter_mut() {
                if let Some(p) = ports.get(port) {
                    *value = registry.types().default_value(p.value_type);
                }
            }
        }
    }

    /// Distinct nodes feeding a node's inputs, in port then connection order
    pub fn upstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.linked_nodes(id, PortDirection::Input)
    }

    /// Distinct nodes fed by a node's outputs, in port then connection order
    pub fn downstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.linked_nodes(id, PortDirection::Output)
    }

    fn linked_nodes(&self, id: NodeId, direction: PortDirection) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        for port in self.ports_of(id).filter(|p| p.direction == direction) {
            for connection in self.connections_of(port.id) {
                let other = match direction {
                    PortDirection::Input => connection.output_node,
                    PortDirection::Output => connection.input_node,
                };
                if !nodes.contains(&other) {
                    nodes.push(other);
                }
            }
        }
        nodes
    }

    /// Nodes with no connected input, in creation order
    pub fn sources(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .copied()
            .filter(|id| {
                !self
                    .ports_of(*id)
                    .any(|p| p.is_input() && p.is_connected())
            })
            .collect()
    }

    /// Walk backward from `of_node` looking for `candidate`
    pub(crate) fn search_upstream(
        &self,
        node: NodeId,
        candidate: NodeId,
        ctx: &mut TraversalContext,
    ) -> bool {
        if !ctx.enter(node) {
            return false;
        }
        for source in self.upstream_nodes(node) {
            if source == candidate {
                ctx.stop();
                return true;
            }
            if self.search_upstream(source, candidate, ctx) {
                return true;
            }
            if ctx.is_stopped() {
                break;
            }
        }
        false
    }

    // ---------------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------------

    pub(crate) fn require_node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| GraphError::from(InvalidOperation::NodeNotFound(id)))
    }

    fn require_node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| GraphError::from(InvalidOperation::NodeNotFound(id)))
    }

    pub(crate) fn require_port(&self, id: PortId) -> Result<&Port> {
        self.ports
            .get(&id)
            .ok_or_else(|| GraphError::from(InvalidOperation::PortNotFound(id)))
    }

}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("kind", &self.kind.name)
            .field("nodes", &self.nodes.len())
            .field("ports", &self.ports.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{calls, canvas, connect, registry};
    use crate::value::ValueType;
    use std::cell::RefCell;

    #[test]
    fn test_connection_is_symmetric() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        let out = canvas.output(a, "Out").unwrap();
        let inp = canvas.input(b, "In").unwrap();

        // Argument order does not matter
        assert!(canvas.try_apply_connection(inp, out));
        let on_out = canvas.port(out).unwrap().connections().to_vec();
        let on_in = canvas.port(inp).unwrap().connections().to_vec();
        assert_eq!(on_out, on_in);
        assert_eq!(on_out.len(), 1);
        assert!(canvas.are_connected(out, inp));
        assert!(canvas.are_connected(inp, out));
    }

    #[test]
    fn test_type_mismatch_refused() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("label").unwrap();
        let out = canvas.output(a, "Out").unwrap();
        let inp = canvas.input(b, "In").unwrap();

        assert!(!canvas.can_connect(out, inp));
        assert!(matches!(
            canvas.check_connection(out, inp),
            Err(ConnectionError::TypeMismatch { .. })
        ));
        assert!(!canvas.try_apply_connection(out, inp));
        assert_eq!(canvas.connection_count(), 0);
    }

    #[test]
    fn test_cycle_refused_without_recursion() {
        let mut canvas = canvas();
        let a = canvas.create_node("passthrough").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        connect(&mut canvas, a, "Out", b, "In");

        let back_out = canvas.output(b, "Out").unwrap();
        let back_in = canvas.input(a, "In").unwrap();
        assert_eq!(
            canvas.check_connection(back_out, back_in),
            Err(ConnectionError::WouldCreateCycle(a))
        );
        assert!(!canvas.try_apply_connection(back_out, back_in));
        assert_eq!(canvas.connection_count(), 1);
    }

    #[test]
    fn test_cycle_allowed_through_recursive_node() {
        let mut canvas = canvas();
        let machine = canvas.create_node("counter").unwrap();
        let step = canvas.create_node("increment").unwrap();
        connect(&mut canvas, machine, "Out", step, "In");

        let out = canvas.output(step, "Out").unwrap();
        let feedback = canvas.input(machine, "Feedback").unwrap();
        assert!(canvas.can_connect(out, feedback));

        // Not when the node entered by the loop forbids recursion
        canvas.set_allow_recursion(machine, false).unwrap();
        assert!(!canvas.can_connect(out, feedback));
    }

    #[test]
    fn test_basic_refusals() {
        let mut canvas = canvas();
        let a = canvas.create_node("passthrough").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        let a_in = canvas.input(a, "In").unwrap();
        let a_out = canvas.output(a, "Out").unwrap();
        let b_in = canvas.input(b, "In").unwrap();

        assert_eq!(canvas.check_connection(a_out, a_in), Err(ConnectionError::SameNode));
        assert_eq!(canvas.check_connection(a_in, b_in), Err(ConnectionError::WrongDirection));
        assert_eq!(
            canvas.connect(a_in, b_in),
            Err(ConnectionError::WrongDirection)
        );
        let ghost = PortId::new();
        assert_eq!(
            canvas.check_connection(a_out, ghost),
            Err(ConnectionError::PortNotFound(ghost))
        );

        assert!(canvas.try_apply_connection(a_out, b_in));
        assert_eq!(
            canvas.check_connection(a_out, b_in),
            Err(ConnectionError::AlreadyConnected)
        );
    }

    #[test]
    fn test_single_input_is_replaced() {
        let mut canvas = canvas();
        let first = canvas.create_node("constant").unwrap();
        let second = canvas.create_node("constant").unwrap();
        let sink = canvas.create_node("passthrough").unwrap();
        canvas.set_state_value(second, "value", 3.0_f32).unwrap();
        connect(&mut canvas, first, "Out", sink, "In");
        connect(&mut canvas, second, "Out", sink, "In");

        let inp = canvas.input(sink, "In").unwrap();
        assert_eq!(canvas.port(inp).unwrap().connections().len(), 1);
        assert!(!canvas.port(canvas.output(first, "Out").unwrap()).unwrap().is_connected());
        assert_eq!(canvas.get_value::<f32>(inp), 3.0);
    }

    #[test]
    fn test_multi_input_accumulates() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("constant").unwrap();
        let sum = canvas.create_node("sum").unwrap();
        canvas.set_state_value(a, "value", 1.5_f32).unwrap();
        canvas.set_state_value(b, "value", 2.0_f32).unwrap();
        connect(&mut canvas, a, "Out", sum, "Values");
        connect(&mut canvas, b, "Out", sum, "Values");

        let values = canvas.input(sum, "Values").unwrap();
        assert_eq!(canvas.get_values(values), vec![Value::Float(1.5), Value::Float(2.0)]);
        let out = canvas.output(sum, "Out").unwrap();
        assert_eq!(canvas.get_value::<f32>(out), 3.5);
    }

    #[test]
    fn test_remove_connection_invalidates_downstream() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        canvas.set_state_value(a, "value", 9.0_f32).unwrap();
        connect(&mut canvas, a, "Out", b, "In");

        let out = canvas.output(a, "Out").unwrap();
        let inp = canvas.input(b, "In").unwrap();
        let b_out = canvas.output(b, "Out").unwrap();
        assert_eq!(canvas.get_value::<f32>(b_out), 9.0);

        assert!(canvas.remove_connection(inp, out).unwrap());
        assert!(!canvas.remove_connection(inp, out).unwrap());
        assert!(canvas.port(out).unwrap().connections().is_empty());
        assert!(canvas.port(inp).unwrap().connections().is_empty());
        assert_eq!(canvas.get_value::<f32>(inp), 0.0);
        assert_eq!(canvas.get_value::<f32>(b_out), 0.0);
    }

    #[test]
    fn test_asymmetric_bookkeeping_is_hard_failure() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        connect(&mut canvas, a, "Out", b, "In");
        let out = canvas.output(a, "Out").unwrap();
        let inp = canvas.input(b, "In").unwrap();

        canvas.ports.get_mut(&out).unwrap().connections.clear();
        let err = canvas.remove_connection(inp, out).unwrap_err();
        assert!(matches!(
            err,
            GraphError::InvalidGraphOperation(InvalidOperation::AsymmetricConnection(..))
        ));
        // Nothing was removed
        assert_eq!(canvas.connection_count(), 1);
    }

    #[test]
    fn test_defaults_are_stable() {
        let mut canvas = canvas();
        let b = canvas.create_node("passthrough").unwrap();
        let inp = canvas.input(b, "In").unwrap();
        let first = canvas.get_value::<f32>(inp);
        for _ in 0..3 {
            assert_eq!(canvas.get_value::<f32>(inp), first);
        }
        assert_eq!(canvas.value(inp), Some(Value::Float(0.0)));
        assert_eq!(canvas.value(PortId::new()), None);
        // Wrong Rust type reads fall back to that type's default
        assert_eq!(canvas.get_value::<String>(inp), String::new());
        canvas.delete_node(b).unwrap();
        assert_eq!(canvas.get_value::<f32>(inp), 0.0);
    }

    #[test]
    fn test_set_value_type_checked() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let out = canvas.output(a, "Out").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        let inp = canvas.port_at(b, 0).unwrap();

        assert!(canvas.set_value(out, 4.0_f32));
        assert_eq!(canvas.get_value::<f32>(out), 4.0);
        assert!(!canvas.set_value(out, "four".to_string()));
        assert_eq!(canvas.get_value::<f32>(out), 4.0);
        assert!(!canvas.set_value(inp, 1.0_f32));
    }

    #[test]
    fn test_dynamic_ports_keep_identity() {
        let mut canvas = canvas();
        let c = canvas.create_node("constant").unwrap();
        let sink = canvas.create_node("sum").unwrap();
        let values = canvas.input(sink, "Values").unwrap();
        assert_eq!(canvas.node(c).unwrap().port_count(), 1);

        let mut created = Vec::new();
        for i in 0..3 {
            let port = canvas
                .create_port(c, format!("Extra {i}"), PortDirection::Output, "float", false)
                .unwrap();
            created.push(port);
        }
        assert_eq!(canvas.node(c).unwrap().port_count(), 4);

        let doomed = canvas.port_at(c, 1).unwrap();
        assert_eq!(doomed, created[0]);
        assert!(canvas.try_apply_connection(doomed, values));
        assert!(canvas.try_apply_connection(created[1], values));

        let before: Vec<PortId> = canvas.node(c).unwrap().ports().collect();
        canvas.delete_port(doomed).unwrap();
        let after: Vec<PortId> = canvas.node(c).unwrap().ports().collect();

        assert_eq!(after.len(), 3);
        assert_eq!(after, vec![before[0], before[2], before[3]]);
        assert!(canvas.port(doomed).is_none());
        assert_eq!(canvas.connection_count(), 1);
        assert!(canvas.are_connected(created[1], values));
    }

    #[test]
    fn test_port_errors() {
        let mut canvas = canvas();
        let c = canvas.create_node("constant").unwrap();
        let declared = canvas.output(c, "Out").unwrap();

        assert!(matches!(
            canvas.delete_port(declared),
            Err(GraphError::InvalidGraphOperation(InvalidOperation::StaticPortRemoval(_)))
        ));
        assert!(matches!(
            canvas.create_port(c, "X", PortDirection::Input, "quaternion", false),
            Err(GraphError::UnknownType(_))
        ));
        assert!(matches!(
            canvas.create_port(c, "Out", PortDirection::Output, "float", false),
            Err(GraphError::InvalidGraphOperation(InvalidOperation::DuplicatePortName { .. }))
        ));
        // Same name in the other direction is fine
        assert!(canvas.create_port(c, "Out", PortDirection::Input, "float", false).is_ok());
    }

    #[test]
    fn test_create_connection_port() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let sum = canvas.create_node("sum").unwrap();
        let out = canvas.output(a, "Out").unwrap();

        let port = canvas.create_connection_port(sum, out).unwrap();
        let created = canvas.port(port).unwrap();
        assert!(created.dynamic);
        assert!(created.is_input());
        assert_eq!(created.value_type, ValueType::Float);
        assert!(canvas.are_connected(out, port));

        let again = canvas.create_connection_port(sum, out).unwrap();
        assert_eq!(canvas.port(again).unwrap().name, "Out 2");
    }

    #[test]
    fn test_delete_node_severs_everything() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        let c = canvas.create_node("passthrough").unwrap();
        canvas.set_state_value(a, "value", 1.0_f32).unwrap();
        connect(&mut canvas, a, "Out", b, "In");
        connect(&mut canvas, b, "Out", c, "In");
        let a_out = canvas.output(a, "Out").unwrap();
        let c_out = canvas.output(c, "Out").unwrap();
        assert_eq!(canvas.get_value::<f32>(c_out), 1.0);

        canvas.delete_node(b).unwrap();
        assert_eq!(canvas.node_count(), 2);
        assert_eq!(canvas.connection_count(), 0);
        assert!(!canvas.port(a_out).unwrap().is_connected());
        assert_eq!(canvas.get_value::<f32>(c_out), 0.0);
        assert!(canvas.is_calculated(c));

        assert!(matches!(
            canvas.delete_node(b),
            Err(GraphError::InvalidGraphOperation(InvalidOperation::NodeNotFound(_)))
        ));
    }

    #[test]
    fn test_node_creation_errors() {
        let mut canvas = Canvas::new(
            CanvasKind::restricted("math", ["constant", "sum"]),
            Rc::new(registry()),
        );
        assert!(canvas.create_node("constant").is_ok());
        assert!(matches!(
            canvas.create_node("label"),
            Err(GraphError::InvalidGraphOperation(InvalidOperation::NodeKindNotPermitted { .. }))
        ));
        assert!(matches!(
            canvas.create_node("teleport"),
            Err(GraphError::InvalidGraphOperation(InvalidOperation::UnknownNodeKind(_)))
        ));
        assert_eq!(canvas.node_count(), 1);
    }

    #[test]
    fn test_events_fire_once_per_change() {
        let mut canvas = canvas();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        canvas.subscribe(move |_, event| sink.borrow_mut().push(event.clone()));

        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("sum").unwrap();
        let extra = canvas
            .create_port(b, "Bias", PortDirection::Input, "float", false)
            .unwrap();
        let out = canvas.output(a, "Out").unwrap();
        assert!(canvas.try_apply_connection(out, extra));
        assert!(!canvas.try_apply_connection(out, extra));
        canvas.delete_port(extra).unwrap();
        canvas.delete_node(a).unwrap();

        let events = log.borrow();
        assert!(matches!(events[0], CanvasEvent::NodeAdded { node } if node == a));
        assert!(matches!(events[1], CanvasEvent::NodeAdded { node } if node == b));
        assert!(matches!(events[2], CanvasEvent::PortAdded { port, .. } if port == extra));
        assert!(matches!(events[3], CanvasEvent::ConnectionAdded { output, input, .. }
            if output == out && input == extra));
        assert!(matches!(events[4], CanvasEvent::ConnectionRemoved { input, .. } if input == extra));
        assert!(matches!(events[5], CanvasEvent::PortRemoved { port, .. } if port == extra));
        assert!(matches!(events[6], CanvasEvent::NodeDeleted { node } if node == a));
        assert_eq!(events.len(), 7);
    }

    #[test]
    fn test_sources_and_neighbours() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        let c = canvas.create_node("passthrough").unwrap();
        connect(&mut canvas, a, "Out", b, "In");
        connect(&mut canvas, a, "Out", c, "In");

        assert_eq!(canvas.sources(), vec![a]);
        assert_eq!(canvas.downstream_nodes(a), vec![b, c]);
        assert_eq!(canvas.upstream_nodes(c), vec![a]);
    }

    #[test]
    fn test_set_value_recalculates_downstream() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        canvas.set_state_value(a, "value", 9.0_f32).unwrap();
        connect(&mut canvas, a, "Out", b, "In");
        let out = canvas.output(a, "Out").unwrap();
        let b_in = canvas.input(b, "In").unwrap();
        let b_out = canvas.output(b, "Out").unwrap();
        let before = calls(&canvas, b);

        assert!(canvas.set_value(out, 4.0_f32));
        assert_eq!(canvas.get_value::<f32>(b_in), 4.0);
        assert_eq!(canvas.get_value::<f32>(b_out), 4.0);
        assert!(canvas.is_calculated(b));
        assert_eq!(calls(&canvas, b), before + 1);
    }

    #[test]
    fn test_set_value_on_uncalculated_node_is_refused() {
        let mut canvas = canvas();
        let strict = canvas.create_node("strict").unwrap();
        let out = canvas.output(strict, "Out").unwrap();
        assert!(!canvas.is_calculated(strict));

        assert!(!canvas.set_value(out, 2.0_f32));
        assert_eq!(
            canvas.node(strict).unwrap().cached_output(out),
            Some(&Value::Float(0.0))
        );
    }

    #[test]
    fn test_downstream_cleared_before_removal() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        let c = canvas.create_node("constant").unwrap();
        let d = canvas.create_node("sum").unwrap();
        connect(&mut canvas, a, "Out", b, "In");
        let extra = canvas
            .create_port(c, "Extra", PortDirection::Output, "float", false)
            .unwrap();
        let values = canvas.input(d, "Values").unwrap();
        assert!(canvas.try_apply_connection(extra, values));
        assert!(canvas.is_calculated(b));
        assert!(canvas.is_calculated(d));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        canvas.subscribe(move |view, event| match event {
            CanvasEvent::NodeDeleted { .. } => {
                sink.borrow_mut().push(("node", view.is_calculated(b)));
            }
            CanvasEvent::PortRemoved { .. } => {
                sink.borrow_mut().push(("port", view.is_calculated(d)));
            }
            _ => {}
        });

        canvas.delete_node(a).unwrap();
        canvas.delete_port(extra).unwrap();
        assert_eq!(seen.borrow().as_slice(), &[("node", false), ("port", false)]);

        // Recomputed once the removal completed
        assert!(canvas.is_calculated(b));
        assert!(canvas.is_calculated(d));
    }

    #[test]
    fn test_delete_node_verifies_every_connection_first() {
        let mut canvas = canvas();
        let a = canvas.create_node("constant").unwrap();
        let b = canvas.create_node("passthrough").unwrap();
        let c = canvas.create_node("passthrough").unwrap();
        let d = canvas.create_node("passthrough").unwrap();
        connect(&mut canvas, a, "Out", b, "In");
        connect(&mut canvas, b, "Out", c, "In");
        connect(&mut canvas, b, "Out", d, "In");

        // Forget the last link on its input side only
        let d_in = canvas.input(d, "In").unwrap();
        canvas.ports.get_mut(&d_in).unwrap().connections.clear();

        let err = canvas.delete_node(b).unwrap_err();
        assert!(matches!(
            err,
            GraphError::InvalidGraphOperation(InvalidOperation::AsymmetricConnection(..))
        ));
        assert!(canvas.node(b).is_some());
        assert_eq!(canvas.connection_count(), 3);
        let a_out = canvas.output(a, "Out").unwrap();
        assert!(canvas.port(a_out).unwrap().is_connected());
        assert!(canvas.is_calculated(c));
    }
}
