// SPDX-License-Identifier: MIT OR Apache-2.0
//! `FlowCanvas` command-line runner.
//!
//! Loads a canvas snapshot written in RON, recomputes it against the demo
//! node catalog and prints the value of every output port.
//!
//! ```text
//! flowcanvas <snapshot.ron>   evaluate a snapshot
//! flowcanvas --demo           print the demo canvas as a snapshot
//! ```
//!
//! Logging goes to stderr and is filtered through `RUST_LOG`.

mod catalog;

use clap::{ArgGroup, Parser};
use flowcanvas_graph::{Canvas, CanvasSnapshot, GraphError};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Evaluate a `FlowCanvas` snapshot against the demo node catalog
#[derive(Parser, Debug)]
#[command(name = "flowcanvas", version, about, long_about = None)]
#[command(group(ArgGroup::new("input").required(true).args(["snapshot", "demo"])))]
struct Args {
    /// RON snapshot to evaluate
    snapshot: Option<PathBuf>,

    /// Print the demo canvas as a snapshot instead
    #[arg(long)]
    demo: bool,
}

/// Failure of a CLI invocation
#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn evaluate(path: &Path) -> Result<Vec<String>, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot = CanvasSnapshot::from_ron(&text)?;
    let registry = Rc::new(catalog::create_demo_registry()?);
    let canvas = Canvas::from_snapshot(&snapshot, registry)?;
    tracing::info!(
        "Evaluated '{}': {} node(s), {} connection(s)",
        canvas.kind().name,
        canvas.node_count(),
        canvas.connection_count()
    );
    Ok(catalog::report(&canvas))
}

fn run(args: Args) -> Result<(), CliError> {
    if args.demo {
        let registry = Rc::new(catalog::create_demo_registry()?);
        let canvas = catalog::demo_canvas(registry)?;
        println!("{}", canvas.snapshot().to_ron()?);
    } else if let Some(path) = args.snapshot {
        for line in evaluate(&path)? {
            println!("{line}");
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["flowcanvas=info", "flowcanvas_graph=info"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Starting FlowCanvas v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args) {
        tracing::error!("{e}");
        eprintln!("{e}");
        std::process::exit(1);
    }
}
