// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental, dependency-ordered recomputation.
//!
//! Each node moves through a small state machine kept in its `calculated`
//! flag and cached outputs:
//!
//! ```text
//! Uncalculated -> Calculating -> Calculated -> (upstream change) -> Uncalculated
//! ```
//!
//! A node only calculates once every node feeding it is calculated. That
//! check, repeated at every step, is what orders a diamond correctly. All
//! walks share a [`TraversalContext`] per top-level call so each node is
//! visited at most once, which also makes recursion-allowed cycles terminate.

use crate::canvas::Canvas;
use crate::error::Result;
use crate::guard::TraversalContext;
use crate::node::NodeId;

impl Canvas {
    /// Whether `candidate` can be reached by walking backward from `of_node`
    /// through input connections.
    pub fn is_ancestor(&self, candidate: NodeId, of_node: NodeId) -> bool {
        let mut ctx = TraversalContext::new(of_node);
        self.search_upstream(of_node, candidate, &mut ctx)
    }

    /// Whether every node feeding `node` is calculated.
    ///
    /// A node with no connected inputs is trivially ready. For a node that
    /// allows recursion, inputs fed from its own downstream (the edges closing
    /// a cycle through it) are not waited on.
    pub fn ancestors_calculated(&self, node: NodeId) -> bool {
        let Some(current) = self.node(node) else {
            return false;
        };
        self.upstream_nodes(node).into_iter().all(|source| {
            self.is_calculated(source)
                || (current.allow_recursion && self.is_ancestor(node, source))
        })
    }

    /// Recalculate `node` and, where permitted, everything downstream of it.
    ///
    /// The node and its downstream subgraph are invalidated first, then
    /// recomputed in dependency order. Returns whether `node` ended up
    /// calculated. While a snapshot is being restored this does nothing.
    pub fn recalculate_from(&mut self, node: NodeId) -> Result<bool> {
        self.require_node(node)?;
        if self.propagation_deferred {
            return Ok(false);
        }
        self.clear_calculation(node)?;

        let mut ctx = TraversalContext::new(node);
        self.propagate(node, &mut ctx);
        tracing::debug!(
            "Recalculated from {node}: {} node(s) calculated",
            ctx.visited_count()
        );
        Ok(self.is_calculated(node))
    }

    /// Mark `node` and everything downstream of it uncalculated, resetting
    /// their outputs to type defaults. Clearing an already clear subgraph is
    /// a no-op walk.
    pub fn clear_calculation(&mut self, node: NodeId) -> Result<()> {
        self.require_node(node)?;
        let mut ctx = TraversalContext::new(node);
        self.clear_downstream(node, &mut ctx);
        Ok(())
    }

    /// Recompute the whole canvas from its sources.
    ///
    /// Every node is invalidated, then propagation starts at each node with no
    /// connected inputs, in creation order. Cycles with no source are entered
    /// through any recursion-allowing node that is ready. Returns the number
    /// of nodes calculated.
    pub fn traverse_all(&mut self) -> usize {
        let all: Vec<NodeId> = self.node_ids().collect();

        let mut clear_ctx = TraversalContext::unrooted();
        for node in &all {
            self.clear_downstream(*node, &mut clear_ctx);
        }

        let mut ctx = TraversalContext::unrooted();
        for source in self.sources() {
            self.propagate(source, &mut ctx);
        }

        // Loops closed entirely through recursion-allowing nodes
        for node in all {
            let entry = self
                .node(node)
                .is_some_and(|n| n.allow_recursion && !n.is_calculated());
            if entry && !ctx.has_visited(node) {
                self.propagate(node, &mut ctx);
            }
        }

        let calculated = self.nodes().filter(|n| n.is_calculated()).count();
        tracing::debug!(
            "Traversed canvas: {calculated}/{} node(s) calculated",
            self.node_count()
        );
        calculated
    }

    fn propagate(&mut self, node: NodeId, ctx: &mut TraversalContext) {
        if ctx.has_visited(node) || ctx.is_stopped() {
            return;
        }
        if !self.ancestors_calculated(node) {
            tracing::trace!("Node {node} waits on uncalculated ancestors");
            return;
        }

        ctx.enter(node);
        if !self.calculate_node(node) {
            return;
        }

        let continues = self.node(node).is_some_and(|n| n.continue_calculation);
        if !continues {
            return;
        }
        for next in self.downstream_nodes(node) {
            self.propagate(next, ctx);
        }
    }

    fn clear_downstream(&mut self, node: NodeId, ctx: &mut TraversalContext) {
        if !ctx.enter(node) {
            return;
        }
        self.reset_outputs(node);
        for next in self.downstream_nodes(node) {
            self.clear_downstream(next, ctx);
        }
    }
}
