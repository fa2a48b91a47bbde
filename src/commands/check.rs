//! `steward check` - validate a catalog without applying it

use anyhow::Result;
use colored::Colorize;
use converge::{Catalog, ResourceRef};
use std::process::ExitCode;

use crate::Context;
use crate::catalog_file;
use crate::cli::CheckArgs;
use crate::ui;

/// Problems found in a catalog
#[derive(Debug, Default)]
struct Findings {
    /// Each cycle with the paths found through it
    cycles: Vec<(Vec<ResourceRef>, Vec<Vec<ResourceRef>>)>,
    /// Resources whose pre-run check failed, with the reason
    failed_checks: Vec<(ResourceRef, String)>,
}

impl Findings {
    fn is_clean(&self) -> bool {
        self.cycles.is_empty() && self.failed_checks.is_empty()
    }
}

fn inspect(catalog: &mut Catalog, max_paths: usize) -> Result<Findings> {
    let graph = catalog.relationship_graph()?;
    let mut findings = Findings::default();

    for cycle in graph.find_cycles_in_graph() {
        let paths = graph.paths_in_cycle(&cycle, max_paths)?;
        findings.cycles.push((cycle, paths));
    }

    for resource in catalog.resources() {
        if let Err(err) = resource.pre_run_check() {
            findings
                .failed_checks
                .push((resource.meta().reference.clone(), format!("{err:#}")));
        }
    }
    Ok(findings)
}

/// Cycles of the catalog as a dot graph, and whether there were any
fn cycles_dot(catalog: &mut Catalog) -> Result<(String, bool)> {
    let graph = catalog.relationship_graph()?;
    let cycles = graph.find_cycles_in_graph();
    Ok((graph.cycles_to_dot(&cycles), !cycles.is_empty()))
}

fn format_path(path: &[ResourceRef]) -> String {
    let joined = path
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" => ");
    format!("({joined})")
}

pub fn run(ctx: &Context, args: CheckArgs) -> Result<ExitCode> {
    let mut catalog = catalog_file::load_catalog(&args.catalog)?;
    if args.dot {
        let (dot, has_cycles) = cycles_dot(&mut catalog)?;
        print!("{dot}");
        return Ok(if has_cycles { ExitCode::FAILURE } else { ExitCode::SUCCESS });
    }
    let findings = inspect(&mut catalog, args.max_paths)?;

    if findings.is_clean() {
        if !ctx.quiet {
            ui::success(&format!(
                "{}: {} resources, no problems found",
                args.catalog.display(),
                catalog.resource_refs().len()
            ));
        }
        return Ok(ExitCode::SUCCESS);
    }

    if !findings.cycles.is_empty() {
        ui::section(&format!("{} dependency cycle(s)", findings.cycles.len()));
        for (cycle, paths) in &findings.cycles {
            println!("  {} {} resources", "✗".red(), cycle.len());
            for path in paths {
                println!("    {}", format_path(path));
            }
        }
    }
    if !findings.failed_checks.is_empty() {
        ui::section(&format!("{} failed pre-run check(s)", findings.failed_checks.len()));
        for (reference, reason) in &findings.failed_checks {
            ui::kv(&reference.to_string(), reason);
        }
    }
    Ok(ExitCode::FAILURE)
}
