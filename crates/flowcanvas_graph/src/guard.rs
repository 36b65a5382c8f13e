// SPDX-License-Identifier: MIT OR Apache-2.0
//! Traversal-scoped recursion guard.
//!
//! Every recursive graph walk (ancestry check, invalidation, propagation)
//! creates one [`TraversalContext`] at its top-level call and threads it by
//! `&mut` through every step. A node is entered at most once per context,
//! which bounds each walk to O(V + E) and makes cycles terminate.

use crate::node::NodeId;
use std::collections::HashSet;

/// Visited-set and origin of one top-level graph walk
#[derive(Debug, Clone)]
pub struct TraversalContext {
    origin: Option<NodeId>,
    visited: HashSet<NodeId>,
    stopped: bool,
}

impl TraversalContext {
    /// Start a walk from `origin`
    pub fn new(origin: NodeId) -> Self {
        Self {
            origin: Some(origin),
            visited: HashSet::new(),
            stopped: false,
        }
    }

    /// Start a walk with no single origin (whole-canvas walks)
    pub fn unrooted() -> Self {
        Self {
            origin: None,
            visited: HashSet::new(),
            stopped: false,
        }
    }

    /// Node the walk started from
    pub fn origin(&self) -> Option<NodeId> {
        self.origin
    }

    /// Mark `node` visited. Returns `false` if it was already visited or
    /// the walk has been stopped.
    pub fn enter(&mut self, node: NodeId) -> bool {
        !self.stopped && self.visited.insert(node)
    }

    /// Whether `node` has been visited
    pub fn has_visited(&self, node: NodeId) -> bool {
        self.visited.contains(&node)
    }

    /// Skip the rest of the walk; the answer is already known
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Whether [`TraversalContext::stop`] was called
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Number of nodes visited so far
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_once() {
        let a = NodeId::new();
        let mut ctx = TraversalContext::new(a);
        assert_eq!(ctx.origin(), Some(a));
        assert!(ctx.enter(a));
        assert!(!ctx.enter(a));
        assert!(ctx.has_visited(a));
        assert_eq!(ctx.visited_count(), 1);
    }

    #[test]
    fn test_stop_blocks_further_visits() {
        let mut ctx = TraversalContext::unrooted();
        ctx.stop();
        assert!(ctx.is_stopped());
        assert!(!ctx.enter(NodeId::new()));
        assert_eq!(ctx.visited_count(), 0);
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = NodeId::new();
        let mut first = TraversalContext::new(a);
        first.enter(a);
        let mut second = TraversalContext::new(a);
        assert!(second.enter(a));
    }
}
