use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use model_resolver::core::events::EVENT_DOWNLOAD_FINISHED;
use model_resolver::downloads::{StaticResolver, TaskStatus};
use model_resolver::{AppState, Resolution, SettingsManager};
use tracing::metadata::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "model-resolver",
    version,
    about = "Find the models a workflow needs and fetch the missing ones"
)]
struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "MODEL_RESOLVER_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report found, partial and missing models for a workflow file or directory
    Analyze {
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write the missing/partial list for a workflow as JSON
    Export {
        workflow: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Summarize the local model library
    Stats {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Drop the cached inventory scan
    ClearCache,
    /// Download missing models using a filename -> sources table
    Download {
        workflow: PathBuf,
        /// JSON object mapping filenames to `[{url, platform, sizeBytes}]`
        #[arg(long)]
        sources: PathBuf,
        /// Also fetch requirements that only have a similar local file
        #[arg(long, default_value_t = false)]
        include_partial: bool,
    },
    /// Print the effective settings
    Settings,
}

fn setup_logging() {
    let filter = std::env::var("MODEL_RESOLVER_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    setup_logging();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => SettingsManager::at(path)?,
        None => SettingsManager::new()?,
    };
    let state = AppState::from_settings(Arc::new(settings))?;

    match args.command {
        Command::Analyze { path, json } => analyze(&state, &path, json),
        Command::Export { workflow, output } => export(&state, &workflow, output.as_deref()),
        Command::Stats { json } => stats(&state, json),
        Command::ClearCache => {
            state.inventory().clear_cache()?;
            println!("Inventory cache cleared");
            Ok(())
        }
        Command::Download {
            workflow,
            sources,
            include_partial,
        } => download(&state, &workflow, &sources, include_partial),
        Command::Settings => {
            let manager = state.settings_manager();
            println!("# {}", manager.path().display());
            println!("{}", serde_json::to_string_pretty(&manager.read())?);
            Ok(())
        }
    }
}

fn resolve(state: &AppState, workflow: &Path) -> Result<Resolution> {
    state
        .pipeline()
        .analyze_file(workflow)
        .with_context(|| format!("analyze {}", workflow.display()))
}

fn analyze(state: &AppState, path: &Path, json: bool) -> Result<()> {
    let pipeline = state.pipeline();
    let resolutions = if path.is_dir() {
        pipeline.analyze_directory(path)
    } else {
        vec![(path.to_path_buf(), pipeline.analyze_file(path))]
    };

    let mut failures = 0;
    for (file, outcome) in resolutions {
        match outcome {
            Ok(resolution) if json => println!("{}", serde_json::to_string_pretty(&resolution)?),
            Ok(resolution) => print!("{}", pipeline.render(&resolution)),
            Err(error) => {
                failures += 1;
                eprintln!("{}: {error}", file.display());
            }
        }
    }
    if failures > 0 {
        bail!("{failures} workflow(s) could not be analyzed");
    }
    Ok(())
}

fn export(state: &AppState, workflow: &Path, output: Option<&Path>) -> Result<()> {
    let resolution = resolve(state, workflow)?;
    let export = state.pipeline().export(&resolution);
    let text = serde_json::to_string_pretty(&export)?;
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
            println!(
                "Exported {} missing and {} partial models to {}",
                export.missing.len(),
                export.partial.len(),
                path.display()
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn stats(state: &AppState, json: bool) -> Result<()> {
    let stats = state.inventory().stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("{} files, {} bytes", stats.total_files, stats.total_bytes);
    for (directory, entry) in &stats.by_directory {
        println!("  {directory:<20} {:>6} files {:>14} bytes", entry.count, entry.size_bytes);
    }
    for (extension, count) in &stats.by_extension {
        println!("  {extension:<20} {count:>6}");
    }
    Ok(())
}

fn download(state: &AppState, workflow: &Path, sources: &Path, include_partial: bool) -> Result<()> {
    let resolver = StaticResolver::from_file(sources)
        .with_context(|| format!("load sources from {}", sources.display()))?;
    let resolution = resolve(state, workflow)?;
    let plans = state.plan_downloads(&resolution, &resolver, include_partial);
    if plans.is_empty() {
        println!("Nothing to download");
        return Ok(());
    }

    let feed = state.events().subscribe();
    let mut pending = BTreeSet::new();
    for (plan, queued) in plans.iter().zip(state.queue_downloads(plans.clone())?) {
        match queued {
            Ok(id) => {
                pending.insert(id);
            }
            Err(error) => eprintln!("{}: {error}", plan.filename),
        }
    }

    let mut failed = 0;
    while !pending.is_empty() {
        let event = feed.recv().context("download event stream closed")?;
        if event.kind != EVENT_DOWNLOAD_FINISHED || !pending.remove(&event.task.id) {
            continue;
        }
        let task = event.task;
        match task.status {
            TaskStatus::Completed => println!("{} -> {}", task.filename, task.target_path.display()),
            status => {
                failed += 1;
                let reason = task.error.unwrap_or_else(|| format!("{status:?}"));
                eprintln!("{}: {reason}", task.filename);
            }
        }
    }
    state.shutdown();

    if failed > 0 {
        bail!("{failed} download(s) did not complete");
    }
    Ok(())
}
