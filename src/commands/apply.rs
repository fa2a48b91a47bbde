//! `steward apply` - run a transaction over a catalog document

use anyhow::Result;
use colored::Colorize;
use converge::{Report, ReportStatus, Transaction, TransactionOptions, TransactionStore};
use std::process::ExitCode;

use crate::Context;
use crate::catalog_file;
use crate::cli::ApplyArgs;
use crate::paths;
use crate::progress::ApplyProgress;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<ExitCode> {
    execute(ctx, args).map(ExitCode::from)
}

/// Apply and return the process exit code
fn execute(ctx: &Context, args: ApplyArgs) -> Result<u8> {
    let catalog = catalog_file::load_catalog(&args.catalog)?;
    let store_path = match args.state_file.clone() {
        Some(path) => path,
        None => paths::transaction_store()?,
    };
    log::debug!("Using transaction store {}", store_path.display());

    let options = options_from(&args);
    let noop = options.noop;
    let mut transaction = Transaction::new(catalog, options)?
        .with_persistence(Box::new(TransactionStore::load(store_path)))
        .with_observer(Box::new(ApplyProgress::new(ctx.quiet || args.json)));

    if !ctx.quiet && !args.json {
        let mode = if noop { " (noop)" } else { "" };
        ui::info(&format!("Applying {}{mode}", args.catalog.display()));
    }
    let (report, outcome) = evaluate(transaction);
    if let Err(err) = outcome {
        // an aborted run still shows what it got through
        if !report.resource_statuses.is_empty() {
            render(ctx, &args, &report)?;
        }
        return Err(err.into());
    }
    render(ctx, &args, &report)?;

    let code = if args.detailed_exitcodes {
        report.exit_status()
    } else if report.status == ReportStatus::Failed {
        1
    } else {
        0
    };
    Ok(u8::try_from(code).unwrap_or(1))
}

/// Run the transaction, keeping its report even when evaluation aborts
fn evaluate(mut transaction: Transaction) -> (Report, converge::Result<()>) {
    let outcome = transaction.evaluate();
    (transaction.into_report(), outcome)
}

fn render(ctx: &Context, args: &ApplyArgs, report: &Report) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if !ctx.quiet {
        print_report(report);
    }
    Ok(())
}

fn options_from(args: &ApplyArgs) -> TransactionOptions {
    TransactionOptions {
        ignore_schedules: args.ignore_schedules,
        for_network_device: args.device,
        merge_dependency_warnings: args.merge_dependency_warnings,
        ..TransactionOptions::default()
    }
    .noop(args.noop)
    .with_tags(args.tags.clone())
    .with_skip_tags(args.skip_tags.clone())
}

fn print_report(report: &Report) {
    ui::header("Report");
    for line in report.summary().lines() {
        println!("  {line}");
    }

    let total = report
        .metrics
        .time
        .get("total")
        .copied()
        .unwrap_or_default();
    let resources = &report.metrics.resources;
    let outcome = format!(
        "{} resources, {} changed, {} failed, {} skipped in {}",
        resources.total,
        resources.changed,
        resources.failed,
        resources.skipped,
        ui::format_duration(total)
    );
    if report.noop && resources.out_of_sync > 0 {
        ui::warn(&format!(
            "{} resources out of sync, nothing changed (noop)",
            resources.out_of_sync
        ));
    }
    if report.resources_failed_to_generate {
        ui::warn("Some resources could not generate their children");
    }
    println!();
    match report.status {
        ReportStatus::Failed => ui::error(&outcome),
        ReportStatus::Changed => ui::success(&outcome),
        ReportStatus::Unchanged => println!("{} {}", "=".dimmed(), outcome),
    }
}
