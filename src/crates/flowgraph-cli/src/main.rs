//! # flowgraph-cli
//!
//! Thin command-line front end for the flowgraph engine: validate a
//! workflow file, run it, or render its graph as a diagram.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use flowgraph_core::{graph, Engine, Limits, Payload};

#[derive(Parser)]
#[command(name = "flowgraph")]
#[command(about = "Validate and execute dataflow workflow files", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow file and print every validation issue
    Validate {
        /// Workflow file (.json, .yaml, .yml)
        file: PathBuf,
    },

    /// Execute a workflow file and print the execution report
    Run {
        /// Workflow file (.json, .yaml, .yml)
        file: PathBuf,

        /// Limits profile: development, default, strict
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Render the workflow graph as a diagram
    Graph {
        /// Workflow file (.json, .yaml, .yml)
        file: PathBuf,

        /// Output syntax: mermaid or dot
        #[arg(short, long, default_value = "mermaid")]
        format: String,
    },
}

fn load_payload(path: &Path) -> Result<Payload, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("json")
        .to_ascii_lowercase();
    match by_extension.as_str() {
        "yaml" | "yml" => Payload::from_yaml(&text).map_err(|e| format!("invalid YAML: {}", e)),
        _ => Payload::from_json(&text).map_err(|e| format!("invalid JSON: {}", e)),
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Validate { file } => {
            let payload = load_payload(&file)?;
            let engine = Engine::new(Limits::default()).map_err(|e| e.to_string())?;
            let issues = engine.validate(&payload);
            if issues.is_empty() {
                println!(
                    "ok: {} nodes, {} edges",
                    payload.nodes.len(),
                    payload.edges.len()
                );
                Ok(())
            } else {
                for issue in &issues {
                    eprintln!("error: {}", issue);
                }
                Err(format!("{} validation issue(s)", issues.len()))
            }
        }

        Commands::Run {
            file,
            profile,
            pretty,
        } => {
            let payload = load_payload(&file)?;
            let limits = Limits::profile(&profile)
                .ok_or_else(|| format!("unknown profile '{}'", profile))?;
            let engine = Engine::new(limits).map_err(|e| e.to_string())?;
            let report = engine.execute(&payload).await.map_err(|e| e.to_string())?;

            let rendered = if pretty {
                serde_json::to_string_pretty(&report)
            } else {
                serde_json::to_string(&report)
            }
            .map_err(|e| e.to_string())?;
            println!("{}", rendered);

            if report.status == "ok" {
                Ok(())
            } else {
                Err(format!("run finished with status '{}'", report.status))
            }
        }

        Commands::Graph { file, format } => {
            let mut payload = load_payload(&file)?;
            payload.infer_types();
            match format.as_str() {
                "mermaid" => print!("{}", graph::mermaid(&payload)),
                "dot" => print!("{}", graph::dot(&payload)),
                other => return Err(format!("unknown format '{}'", other)),
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}
