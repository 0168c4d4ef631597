use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use csynth_sch::netlist::Circuit;
use csynth_sync::place::GridPlacer;
use csynth_sync::plan::SyncOp;
use csynth_sync::report::SyncReport;

#[derive(Args, Debug)]
#[command(about = "Synchronize a circuit netlist into a schematic project")]
pub struct SyncArgs {
    /// Path to the project directory (or its root sheet file)
    #[arg(value_name = "PROJECT", value_hint = clap::ValueHint::DirPath)]
    pub project: PathBuf,

    /// Circuit netlist JSON produced by the front-end
    /// (default: <PROJECT>/circuit.json)
    #[arg(long = "netlist", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub netlist: Option<PathBuf>,

    /// Plan only: report what would change without touching anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Print the report as JSON instead of a human-readable summary
    #[arg(long = "json")]
    pub json: bool,
}

pub fn execute(args: SyncArgs) -> Result<()> {
    let netlist_path = args.netlist.clone().unwrap_or_else(|| {
        let base = if args.project.is_file() {
            args.project.parent().unwrap_or(&args.project).to_path_buf()
        } else {
            args.project.clone()
        };
        base.join("circuit.json")
    });

    let netlist_json = std::fs::read_to_string(&netlist_path)
        .with_context(|| format!("failed to read netlist: {}", netlist_path.display()))?;
    let circuit = Circuit::from_json(&netlist_json)
        .with_context(|| format!("failed to parse netlist: {}", netlist_path.display()))?;
    log::debug!(
        "loaded circuit {:?} from {}",
        circuit.name,
        netlist_path.display()
    );

    let placer = GridPlacer::default();
    let report = csynth_sync::sync_project_dir(&circuit, &args.project, &placer, args.dry_run)?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &SyncReport) {
    if report.dry_run {
        println!("{}", "Dry run: no files were modified.".yellow());
    }

    if report.ops_applied.is_empty() {
        println!("{}", "Project is up to date.".green());
    } else {
        let verb = if report.dry_run { "Planned" } else { "Applied" };
        println!("{verb} {} operation(s):", report.ops_applied.len());
        for op in &report.ops_applied {
            println!("  {}", describe_op(op));
        }
    }

    if !report.files_written.is_empty() {
        println!("Wrote {} file(s):", report.files_written.len());
        for file in &report.files_written {
            println!("  {file}");
        }
    }

    if report.ambiguous_count > 0 {
        println!(
            "{}",
            format!(
                "{} component(s) had ambiguous matches and were treated as additions.",
                report.ambiguous_count
            )
            .yellow()
        );
    }
    for warning in &report.warnings {
        println!("{} {warning}", "Warning:".yellow());
    }
}

fn describe_op(op: &SyncOp) -> String {
    match op {
        SyncOp::AddSheet { path, file, .. } => format!("add sheet {path} ({file})"),
        SyncOp::RemoveSheet { path, file, .. } => format!("remove sheet {path} ({file})"),
        SyncOp::AddComponent { path, component } => {
            format!("add component {path}/{}", component.reference)
        }
        SyncOp::RemoveComponent {
            path, reference, ..
        } => format!("remove component {path}/{reference}"),
        SyncOp::UpdateComponentField {
            path,
            reference,
            field,
            old,
            new,
            ..
        } => format!(
            "update {path}/{reference} {field:?}: {} -> {}",
            old.as_deref().unwrap_or("<none>"),
            new.as_deref().unwrap_or("<none>")
        ),
        SyncOp::RebindNet {
            path,
            reference,
            pin,
            old_net,
            new_net,
            ..
        } => format!(
            "rebind {path}/{reference} pin {pin}: {} -> {}",
            old_net.as_deref().unwrap_or("<none>"),
            new_net.as_deref().unwrap_or("<none>")
        ),
    }
}
