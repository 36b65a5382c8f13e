// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for graph operations.
//!
//! Hard failures (programmer or data errors) surface as [`GraphError`].
//! Rejected connections are soft and reported as [`ConnectionError`].

use crate::connection::ConnectionId;
use crate::node::NodeId;
use crate::port::PortId;
use thiserror::Error;

/// Hard failure raised by a graph operation
#[derive(Debug, Error)]
pub enum GraphError {
    /// A value-type tag did not match any registered descriptor
    #[error("Unknown value type: {0}")]
    UnknownType(String),

    /// The requested operation is structurally invalid
    #[error("Invalid graph operation: {0}")]
    InvalidGraphOperation(#[from] InvalidOperation),

    /// Snapshot could not be decoded
    #[error("Snapshot decode error: {0}")]
    Serialization(#[from] ron::error::SpannedError),

    /// Snapshot could not be encoded
    #[error("Snapshot encode error: {0}")]
    Encoding(#[from] ron::Error),
}

/// Reason an operation was refused as invalid
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidOperation {
    /// Node kind was never registered
    #[error("unregistered node kind '{0}'")]
    UnknownNodeKind(String),

    /// Node kind was registered twice
    #[error("node kind '{0}' is already registered")]
    DuplicateNodeKind(String),

    /// Node kind is not allowed on this canvas kind
    #[error("node kind '{kind}' is not permitted on canvas kind '{canvas}'")]
    NodeKindNotPermitted {
        /// Node kind id
        kind: String,
        /// Canvas kind name
        canvas: String,
    },

    /// Node does not exist on this canvas
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Node identifier is already in use
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    /// Port does not exist on this canvas
    #[error("port not found: {0}")]
    PortNotFound(PortId),

    /// Port identifier is already in use
    #[error("duplicate port id: {0}")]
    DuplicatePort(PortId),

    /// Port name already used for that direction on a node or node kind
    #[error("{owner} already has a port named '{name}'")]
    DuplicatePortName {
        /// Owning node or node kind
        owner: String,
        /// Port name
        name: String,
    },

    /// Connection does not exist on this canvas
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// Declared ports live as long as their node
    #[error("port {0} is declared by its node kind and cannot be removed")]
    StaticPortRemoval(PortId),

    /// Connection lists disagree between the two ends
    #[error("asymmetric connection bookkeeping between {0} and {1}")]
    AsymmetricConnection(PortId, PortId),
}

/// Why a connection attempt was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(PortId),

    /// Both ends belong to the same node
    #[error("Cannot connect a node to itself")]
    SameNode,

    /// Need exactly one output and one input
    #[error("A connection needs one output and one input port")]
    WrongDirection,

    /// Value types differ
    #[error("Incompatible port types: {output} -> {input}")]
    TypeMismatch {
        /// Output port type tag
        output: String,
        /// Input port type tag
        input: String,
    },

    /// The two ports are already linked
    #[error("Ports already connected")]
    AlreadyConnected,

    /// The link would close a cycle through a node that forbids recursion
    #[error("Connection would create a cycle through node {0}")]
    WouldCreateCycle(NodeId),
}

/// Result type for hard-failing graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
