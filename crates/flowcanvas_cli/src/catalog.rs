// SPDX-License-Identifier: MIT OR Apache-2.0
//! Demonstration node catalog.
//!
//! A handful of math nodes (one accepting any number of dynamic inputs), a
//! recursive counter state machine and a text formatter.

use flowcanvas_graph::{
    Canvas, CanvasKind, EvaluationContext, EvaluationError, NodeCategory, NodeId, NodeKind,
    NodeOutput, NodeRegistry, NodeState, PortData, PortDirection, PortSpec, Result, Rgba,
};
use std::rc::Rc;

/// Canvas kind used by the demo
pub const DEMO_CANVAS: &str = "math";

type Calculated = std::result::Result<NodeOutput, EvaluationError>;

fn float_constant(_: &EvaluationContext<'_>, state: &NodeState) -> Calculated {
    Ok(NodeOutput::new().with("Value", state.get::<f32>("value").unwrap_or(0.0)))
}

fn add(ctx: &EvaluationContext<'_>, _: &NodeState) -> Calculated {
    // "Values" fans in; every other input is a dynamic operand
    let mut sum: f32 = ctx.values("Values").iter().filter_map(f32::from_value).sum();
    for name in ctx.input_names().filter(|name| *name != "Values") {
        sum += ctx.get::<f32>(name);
    }
    Ok(NodeOutput::new().with("Sum", sum))
}

fn multiply(ctx: &EvaluationContext<'_>, _: &NodeState) -> Calculated {
    let operand = |name: &str| {
        if ctx.is_connected(name) {
            ctx.get::<f32>(name)
        } else {
            1.0
        }
    };
    Ok(NodeOutput::new().with("Product", operand("A") * operand("B")))
}

fn tint(ctx: &EvaluationContext<'_>, _: &NodeState) -> Calculated {
    let Rgba([r, g, b, a]) = ctx.get::<Rgba>("Color");
    let factor = ctx.require::<f32>("Factor")?;
    Ok(NodeOutput::new().with("Color", Rgba([r * factor, g * factor, b * factor, a])))
}

fn counter(ctx: &EvaluationContext<'_>, state: &NodeState) -> Calculated {
    let limit = state.get::<i32>("limit").unwrap_or(i32::MAX);
    let step = state.get::<i32>("step").unwrap_or(0);
    let next = ctx.get::<i32>("Feedback").max(step).saturating_add(1).min(limit);
    Ok(NodeOutput::new()
        .with("Count", next)
        .with_state(state.clone().with("step", next)))
}

fn increment(ctx: &EvaluationContext<'_>, _: &NodeState) -> Calculated {
    Ok(NodeOutput::new().with("Out", ctx.get::<i32>("In").saturating_add(1)))
}

fn to_float(ctx: &EvaluationContext<'_>, _: &NodeState) -> Calculated {
    #[allow(clippy::cast_precision_loss)]
    let value = ctx.get::<i32>("In") as f32;
    Ok(NodeOutput::new().with("Out", value))
}

fn describe(ctx: &EvaluationContext<'_>, state: &NodeState) -> Calculated {
    let label = state.get::<String>("label").unwrap_or_default();
    let value = ctx.require::<f32>("Value")?;
    Ok(NodeOutput::new().with("Text", format!("{label}{value}")))
}

/// Create the demo node registry with all available node kinds
pub fn create_demo_registry() -> Result<NodeRegistry> {
    let mut registry = NodeRegistry::default();

    // ========================================================================
    // Inputs
    // ========================================================================

    registry.register(
        NodeKind::new("float_constant", "Float", float_constant)
            .with_category(NodeCategory::Input)
            .with_description("Constant float value")
            .with_port(PortSpec::output("Value", "float"))
            .with_initial_state(|| NodeState::new().with("value", 0.0_f32)),
    )?;

    // ========================================================================
    // Math
    // ========================================================================

    registry.register(
        NodeKind::new("add", "Add", add)
            .with_category(NodeCategory::Math)
            .with_description("Sum of every connected value and dynamic operand")
            .with_port(PortSpec::input("Values", "float").multi())
            .with_port(PortSpec::output("Sum", "float")),
    )?;

    registry.register(
        NodeKind::new("multiply", "Multiply", multiply)
            .with_category(NodeCategory::Math)
            .with_description("Product of A and B; a disconnected operand counts as one")
            .with_port(PortSpec::input("A", "float"))
            .with_port(PortSpec::input("B", "float"))
            .with_port(PortSpec::output("Product", "float")),
    )?;

    registry.register(
        NodeKind::new("tint", "Tint", tint)
            .with_category(NodeCategory::Math)
            .with_description("Scale a color's channels, keeping alpha")
            .with_port(PortSpec::input("Color", "color"))
            .with_port(PortSpec::input("Factor", "float"))
            .with_port(PortSpec::output("Color", "color")),
    )?;

    // ========================================================================
    // Logic
    // ========================================================================

    registry.register(
        NodeKind::new("counter", "Counter", counter)
            .with_category(NodeCategory::Logic)
            .with_description("Advances once per calculation, fed back through its own output")
            .allow_recursion()
            .with_port(PortSpec::input("Feedback", "int"))
            .with_port(PortSpec::output("Count", "int"))
            .with_initial_state(|| NodeState::new().with("step", 0).with("limit", 100)),
    )?;

    registry.register(
        NodeKind::new("increment", "Increment", increment)
            .with_category(NodeCategory::Logic)
            .with_port(PortSpec::input("In", "int"))
            .with_port(PortSpec::output("Out", "int")),
    )?;

    // ========================================================================
    // Utility
    // ========================================================================

    registry.register(
        NodeKind::new("to_float", "To Float", to_float)
            .with_category(NodeCategory::Utility)
            .with_port(PortSpec::input("In", "integer"))
            .with_port(PortSpec::output("Out", "float")),
    )?;

    registry.register(
        NodeKind::new("describe", "Describe", describe)
            .with_category(NodeCategory::Output)
            .with_description("Format a value as text")
            .with_port(PortSpec::input("Value", "float"))
            .with_port(PortSpec::output("Text", "string"))
            .with_initial_state(|| NodeState::new().with("label", "result = ")),
    )?;

    Ok(registry)
}

/// Canvas kind admitting every demo node kind
pub fn demo_canvas_kind(registry: &NodeRegistry) -> CanvasKind {
    CanvasKind::restricted(DEMO_CANVAS, registry.kinds().map(|kind| kind.id.clone()))
}

/// Build the demo canvas:
///
/// ```text
/// 3.0 ──┐
/// 4.0 ──┼─ add ── multiply ── describe
/// 1.5 ──┘(dynamic)   │
///   counter ⇄ increment
///      └── to_float ─┘
/// ```
pub fn demo_canvas(registry: Rc<NodeRegistry>) -> Result<Canvas> {
    let kind = demo_canvas_kind(&registry);
    let mut canvas = Canvas::new(kind, registry);

    let three = constant(&mut canvas, 3.0)?;
    let four = constant(&mut canvas, 4.0)?;
    let offset = constant(&mut canvas, 1.5)?;

    let add = canvas.create_node("add")?;
    link(&mut canvas, three, "Value", add, "Values");
    link(&mut canvas, four, "Value", add, "Values");
    if let Some(value) = canvas.output(offset, "Value") {
        canvas.create_connection_port(add, value)?;
    }

    let counter = canvas.create_node("counter")?;
    let increment = canvas.create_node("increment")?;
    let to_float = canvas.create_node("to_float")?;
    link(&mut canvas, counter, "Count", increment, "In");
    link(&mut canvas, increment, "Out", counter, "Feedback");
    link(&mut canvas, counter, "Count", to_float, "In");

    let multiply = canvas.create_node("multiply")?;
    link(&mut canvas, add, "Sum", multiply, "A");
    link(&mut canvas, to_float, "Out", multiply, "B");

    let describe = canvas.create_node("describe")?;
    link(&mut canvas, multiply, "Product", describe, "Value");

    // Every link into the loop advanced the counter; start it over
    canvas.set_state_value(counter, "step", 0)?;
    Ok(canvas)
}

fn constant(canvas: &mut Canvas, value: f32) -> Result<NodeId> {
    let node = canvas.create_node("float_constant")?;
    canvas.set_state_value(node, "value", value)?;
    Ok(node)
}

fn link(canvas: &mut Canvas, from: NodeId, output: &str, to: NodeId, input: &str) {
    let ports = canvas
        .port_named(from, output, PortDirection::Output)
        .zip(canvas.port_named(to, input, PortDirection::Input));
    match ports {
        Some((output, input)) => {
            canvas.try_apply_connection(output, input);
        }
        None => tracing::warn!("Demo link {output} -> {input} names a missing port"),
    }
}

/// One line per output port: `node.port = value`
pub fn report(canvas: &Canvas) -> Vec<String> {
    let mut lines = Vec::new();
    for node in canvas.nodes() {
        for port in canvas.ports_of(node.id).filter(|p| p.is_output()) {
            if let Some(value) = canvas.value(port.id) {
                lines.push(format!("{}.{} = {value}", node.name, port.name));
            }
        }
    }
    lines
}
