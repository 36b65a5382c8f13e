// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node kinds shared by the unit tests.
//!
//! Every kind bumps a `calls` counter in its state so tests can assert how
//! often a node was calculated.

use crate::canvas::{Canvas, CanvasKind};
use crate::evaluation::{EvaluationContext, EvaluationError, NodeOutput, NodeState};
use crate::node::{NodeId, NodeKind, NodeRegistry};
use crate::port::PortSpec;
use crate::value::PortData;
use std::rc::Rc;

fn counted(state: &NodeState) -> NodeState {
    let calls = state.get::<i32>("calls").unwrap_or(0);
    state.clone().with("calls", calls + 1)
}

fn constant(_: &EvaluationContext<'_>, state: &NodeState) -> Result<NodeOutput, EvaluationError> {
    let value = state.get::<f32>("value").unwrap_or(0.0);
    Ok(NodeOutput::new().with("Out", value).with_state(counted(state)))
}

fn passthrough(ctx: &EvaluationContext<'_>, state: &NodeState) -> Result<NodeOutput, EvaluationError> {
    Ok(NodeOutput::new()
        .with("Out", ctx.get::<f32>("In"))
        .with_state(counted(state)))
}

fn strict(ctx: &EvaluationContext<'_>, state: &NodeState) -> Result<NodeOutput, EvaluationError> {
    let value = ctx.require::<f32>("In")?;
    Ok(NodeOutput::new().with("Out", value).with_state(counted(state)))
}

fn sum(ctx: &EvaluationContext<'_>, state: &NodeState) -> Result<NodeOutput, EvaluationError> {
    let values = ctx.values("Values");
    let mut total: f32 = values.iter().filter_map(f32::from_value).sum();
    for name in ctx.input_names().filter(|name| *name != "Values") {
        total += ctx.get::<f32>(name);
    }
    let seen = i32::try_from(values.len()).unwrap_or(i32::MAX);
    Ok(NodeOutput::new()
        .with("Out", total)
        .with_state(counted(state).with("seen", seen)))
}

fn counter(ctx: &EvaluationContext<'_>, state: &NodeState) -> Result<NodeOutput, EvaluationError> {
    let step = state.get::<i32>("step").unwrap_or(0) + 1;
    let feedback = ctx.get::<i32>("Feedback");
    Ok(NodeOutput::new()
        .with("Out", step.max(feedback))
        .with_state(counted(state).with("step", step)))
}

fn increment(ctx: &EvaluationContext<'_>, state: &NodeState) -> Result<NodeOutput, EvaluationError> {
    Ok(NodeOutput::new()
        .with("Out", ctx.get::<i32>("In") + 1)
        .with_state(counted(state)))
}

fn label(ctx: &EvaluationContext<'_>, state: &NodeState) -> Result<NodeOutput, EvaluationError> {
    Ok(NodeOutput::new()
        .with("Out", ctx.get::<String>("In"))
        .with_state(counted(state)))
}

/// Registry with the test kinds
pub(crate) fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::default();
    let kinds = [
        NodeKind::new("constant", "Constant", constant)
            .with_port(PortSpec::output("Out", "float"))
            .with_initial_state(|| NodeState::new().with("value", 0.0_f32)),
        NodeKind::new("passthrough", "Passthrough", passthrough)
            .with_port(PortSpec::input("In", "float"))
            .with_port(PortSpec::output("Out", "float")),
        NodeKind::new("strict", "Strict", strict)
            .with_port(PortSpec::input("In", "float"))
            .with_port(PortSpec::output("Out", "float")),
        NodeKind::new("sum", "Sum", sum)
            .with_port(PortSpec::input("Values", "float").multi())
            .with_port(PortSpec::output("Out", "float")),
        NodeKind::new("counter", "Counter", counter)
            .allow_recursion()
            .with_port(PortSpec::input("Feedback", "int"))
            .with_port(PortSpec::output("Out", "int")),
        NodeKind::new("increment", "Increment", increment)
            .with_port(PortSpec::input("In", "int"))
            .with_port(PortSpec::output("Out", "int")),
        NodeKind::new("label", "Label", label)
            .with_port(PortSpec::input("In", "string"))
            .with_port(PortSpec::output("Out", "string")),
    ];
    for kind in kinds {
        registry.register(kind).unwrap();
    }
    registry
}

/// Empty unrestricted canvas over the test kinds
pub(crate) fn canvas() -> Canvas {
    Canvas::new(CanvasKind::default(), Rc::new(registry()))
}

/// Connect two named ports, asserting success
pub(crate) fn connect(canvas: &mut Canvas, from: NodeId, output: &str, to: NodeId, input: &str) {
    let output = canvas.output(from, output).unwrap();
    let input = canvas.input(to, input).unwrap();
    assert!(canvas.try_apply_connection(output, input));
}

/// How many times a node has been calculated
pub(crate) fn calls(canvas: &Canvas, node: NodeId) -> i32 {
    canvas
        .node(node)
        .and_then(|n| n.state().get::<i32>("calls"))
        .unwrap_or(0)
}
