//! runweave CLI
//!
//! Command-line front end over a project directory: create projects, define
//! and launch runs, inspect the runs graph, and move workflows in and out.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use console::style;
use runweave_core::{Binding, ObjectId, ParamValue, Pointer, Run, RunStatus};
use runweave_plan::RunsGraph;
use runweave_project::{Project, ProjectOptions, ProjectPaths};
use runweave_runtime::{KindRegistry, LocalGateway};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runweave")]
#[command(about = "runweave - run provenance and execution for processing projects", long_about = None)]
struct Cli {
    /// Project directory
    #[arg(short, long, default_value = ".", global = true)]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project, replacing earlier project data in the directory
    Create {
        /// Open the new project read-only
        #[arg(long)]
        read_only: bool,
        /// Lifetime in days
        #[arg(long)]
        life_time: Option<u32>,
        /// Hosts file to copy into the project
        #[arg(long)]
        hosts: Option<PathBuf>,
    },
    /// List runs
    Runs {
        /// Sync active runs with the gateway first
        #[arg(short, long)]
        refresh: bool,
    },
    /// Print the runs graph
    Graph,
    /// List protocol kinds
    Kinds,
    /// Define and save a new run
    New {
        /// Protocol kind
        kind: String,
        /// Run label
        #[arg(short, long)]
        label: Option<String>,
        /// Literal parameter, NAME=VALUE (JSON or plain text)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        literals: Vec<String>,
        /// Pointer input, NAME=RUN or NAME=RUN.OUTPUT
        #[arg(long = "input", value_name = "NAME=RUN[.OUTPUT]")]
        pointers: Vec<String>,
    },
    /// Launch a saved run and wait for it
    Launch {
        /// Run id
        run: ObjectId,
    },
    /// Resume an interactive run
    Continue {
        /// Run id
        run: ObjectId,
    },
    /// Stop a run
    Stop {
        /// Run id
        run: ObjectId,
    },
    /// Delete runs with their outputs
    Delete {
        /// Run ids
        #[arg(required = true)]
        runs: Vec<ObjectId>,
    },
    /// Copy runs as new saved definitions
    Copy {
        /// Run ids
        #[arg(required = true)]
        runs: Vec<ObjectId>,
    },
    /// Export runs as a workflow file
    Export {
        /// Run ids; all top-level runs when omitted
        runs: Vec<ObjectId>,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Import a workflow file
    Import {
        /// Workflow file
        file: PathBuf,
    },
    /// Show or change project settings
    Settings {
        /// Set the read-only flag
        #[arg(long)]
        read_only: Option<bool>,
        /// Set the preferred runs view
        #[arg(long)]
        runs_view: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("runweave=info")))
        .init();

    let paths = ProjectPaths::new(&cli.project);
    let kinds = Arc::new(load_kinds(&paths)?);
    let gateway = Arc::new(LocalGateway::new(Arc::clone(&kinds)));

    if let Commands::Create {
        read_only,
        life_time,
        hosts,
    } = &cli.command
    {
        let mut options = ProjectOptions::default().with_read_only(*read_only);
        if let Some(days) = life_time {
            options = options.with_life_time(*days);
        }
        if let Some(hosts) = hosts {
            options = options.with_hosts_file(hosts);
        }
        let project = Project::create(&cli.project, &options, kinds, gateway)
            .wrap_err_with(|| format!("Cannot create project in {}", cli.project.display()))?;
        info!(root = %project.root().display(), "Project created");
        return Ok(());
    }

    let mut project = Project::load(&cli.project, kinds, gateway)
        .wrap_err_with(|| format!("Cannot load project in {}", cli.project.display()))?;

    match cli.command {
        Commands::Create { .. } => Ok(()),
        Commands::Runs { refresh } => {
            for run in project.runs(refresh).await? {
                println!("{}", run_line(&run));
            }
            Ok(())
        }
        Commands::Graph => {
            print!("{}", render_graph(&project.runs_graph()?));
            Ok(())
        }
        Commands::Kinds => {
            for name in project.kinds().list() {
                let label = project.kinds().get(&name).map(|k| k.label().to_string()).unwrap_or_default();
                println!("{:<20} {}", name, style(label).dim());
            }
            Ok(())
        }
        Commands::New {
            kind,
            label,
            literals,
            pointers,
        } => {
            let mut run = project.new_run(&kind)?;
            if let Some(label) = label {
                run.label = label;
            }
            for arg in &literals {
                let (name, value) = split_assignment(arg)?;
                run.set_input(name, Binding::literal(parse_literal(value)));
            }
            for arg in &pointers {
                let (name, target) = split_assignment(arg)?;
                run.set_pointer(name, parse_pointer(target)?);
            }
            let id = project.save_run(&mut run)?;
            println!("{}", run_line(&run));
            debug!(run = %id, "Run saved from command line");
            Ok(())
        }
        Commands::Launch { run } => {
            let mut run = project.get_run(run)?;
            project.launch(&mut run, true).await?;
            println!("{}", run_line(&run));
            Ok(())
        }
        Commands::Continue { run } => {
            let mut run = project.get_run(run)?;
            project.continue_run(&mut run, true).await?;
            println!("{}", run_line(&run));
            Ok(())
        }
        Commands::Stop { run } => {
            let mut run = project.get_run(run)?;
            let outcome = project.stop(&mut run).await;
            println!("{}", run_line(&run));
            Ok(outcome?)
        }
        Commands::Delete { runs } => {
            let report = project.delete_runs(&runs)?;
            for id in &report.deleted {
                println!("{} {}", style("deleted").red(), id);
            }
            for (id, cause) in &report.failed {
                eprintln!("{} {}: {}", style("kept").yellow(), id, cause);
            }
            if report.is_complete() {
                Ok(())
            } else {
                Err(eyre!("{} run(s) could not be deleted", report.failed.len()))
            }
        }
        Commands::Copy { runs } => {
            for run in project.copy_runs(&runs)? {
                println!("{}", run_line(&run));
            }
            Ok(())
        }
        Commands::Export { runs, output } => {
            let runs = if runs.is_empty() {
                project.runs(false).await?.iter().filter_map(|r| r.id).collect()
            } else {
                runs
            };
            project.export_workflow(&runs, &output)?;
            info!(runs = runs.len(), file = %output.display(), "Workflow exported");
            Ok(())
        }
        Commands::Import { file } => {
            let report = project.import_workflow(&file)?;
            for run in &report.runs {
                println!("{}", run_line(run));
            }
            for kind in &report.skipped {
                eprintln!("{} unknown kind {}", style("skipped").yellow(), kind);
            }
            Ok(())
        }
        Commands::Settings { read_only, runs_view } => {
            if let Some(read_only) = read_only {
                project.set_read_only(read_only)?;
            }
            if let Some(view) = runs_view {
                project.set_runs_view(view)?;
            }
            let settings = project.settings();
            println!("read-only:  {}", settings.read_only);
            println!("runs view:  {}", settings.runs_view);
            println!("age:        {}h", project.elapsed().num_hours());
            match project.time_left() {
                Some(left) => println!("time left:  {}h", left.num_hours()),
                None => println!("time left:  unlimited"),
            }
            println!("hosts:      {}", project.host_names().join(", "));
            Ok(())
        }
    }
}

/// Kinds declared in the project's protocol file, if any
fn load_kinds(paths: &ProjectPaths) -> Result<KindRegistry> {
    let mut registry = KindRegistry::new();
    let file = paths.protocols_file();
    if file.exists() {
        let added = registry.load_definitions(&file)?;
        debug!(kinds = added, file = %file.display(), "Protocol kinds loaded");
    }
    Ok(registry)
}

fn split_assignment(arg: &str) -> Result<(&str, &str)> {
    arg.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| eyre!("Expected NAME=VALUE, got {:?}", arg))
}

fn parse_literal(value: &str) -> ParamValue {
    serde_json::from_str(value).unwrap_or_else(|_| ParamValue::String(value.to_string()))
}

fn parse_pointer(target: &str) -> Result<Pointer> {
    let (run, output) = match target.split_once('.') {
        Some((run, output)) => (run, Some(output)),
        None => (target, None),
    };
    let pointer = Pointer::new(run.parse::<ObjectId>()?);
    Ok(match output {
        Some(output) => pointer.with_extended(output),
        None => pointer,
    })
}

fn styled_status(status: RunStatus) -> String {
    let text = format!("{:<16}", status.to_string());
    match status {
        RunStatus::Finished => style(text).green().to_string(),
        RunStatus::Failed | RunStatus::Aborted => style(text).red().to_string(),
        RunStatus::Launched | RunStatus::Running => style(text).cyan().to_string(),
        RunStatus::Interactive | RunStatus::WaitingApproval => style(text).yellow().to_string(),
        RunStatus::Saved => style(text).dim().to_string(),
    }
}

fn run_line(run: &Run) -> String {
    let id = run.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
    let mut line = format!("{:>6}  {}  {}", id, styled_status(run.status), run.display_name());
    if let Some(error) = &run.error {
        line.push_str(&format!("  {}", style(error).red()));
    }
    line
}

/// Indented tree of the runs graph from the root; shared children repeat
fn render_graph(graph: &RunsGraph) -> String {
    fn walk(graph: &RunsGraph, id: ObjectId, depth: usize, path: &mut Vec<ObjectId>, out: &mut String) {
        let Some(node) = graph.node(id) else {
            return;
        };
        let status = node.status.map(styled_status).unwrap_or_default();
        out.push_str(&format!("{}{} {} {}\n", "  ".repeat(depth), id, node.label, status.trim_end()));
        if path.contains(&id) {
            return;
        }
        path.push(id);
        for child in &node.children {
            walk(graph, *child, depth + 1, path, out);
        }
        path.pop();
    }

    let root = graph.root();
    let mut out = format!("{}\n", root.label);
    let mut path = Vec::new();
    for child in &root.children {
        walk(graph, *child, 1, &mut path, &mut out);
    }
    out
}
