//! `steward graph` - show the order a catalog would be applied in

use anyhow::{Result, bail};
use colored::Colorize;
use converge::ResourceRef;
use depgraph::{RelationshipGraph, TraversalVisitor};

use crate::Context;
use crate::catalog_file;
use crate::cli::GraphArgs;
use crate::ui;

/// Records the visit order without applying anything
#[derive(Default)]
struct OrderRecorder {
    order: Vec<ResourceRef>,
}

impl TraversalVisitor<ResourceRef> for OrderRecorder {
    fn visit(&mut self, _graph: &mut RelationshipGraph<ResourceRef>, vertex: &ResourceRef) {
        if !vertex.is_whit() {
            self.order.push(vertex.clone());
        }
    }
}

/// Resources of `graph` in the order a transaction would evaluate them
///
/// Resources generated while applying (such as recursive file children) are
/// not part of the static graph and do not show up here.
fn apply_order(graph: &mut RelationshipGraph<ResourceRef>) -> Result<Vec<ResourceRef>> {
    let mut recorder = OrderRecorder::default();
    if let Err(err) = graph.traverse(&mut recorder) {
        bail!("{err}");
    }
    Ok(recorder.order)
}

pub fn run(ctx: &Context, args: GraphArgs) -> Result<()> {
    let mut catalog = catalog_file::load_catalog(&args.catalog)?;
    let mut graph = catalog.relationship_graph()?;

    if args.dot {
        print!("{}", graph.to_dot("relationships"));
        return Ok(());
    }

    let order = apply_order(&mut graph)?;
    if !ctx.quiet {
        ui::header(&format!("Apply order for {}", args.catalog.display()));
    }
    if order.is_empty() {
        ui::dim("(no resources)");
        return Ok(());
    }
    let width = order.len().to_string().len();
    for (index, reference) in order.iter().enumerate() {
        let dependencies: Vec<String> = graph
            .direct_dependencies(reference)
            .iter()
            .filter(|dependency| !dependency.is_whit())
            .map(ToString::to_string)
            .collect();
        if dependencies.is_empty() || ctx.verbose == 0 {
            println!("  {:>width$}. {reference}", index + 1);
        } else {
            println!(
                "  {:>width$}. {reference} {}",
                index + 1,
                format!("(after {})", dependencies.join(", ")).dimmed()
            );
        }
    }
    Ok(())
}
