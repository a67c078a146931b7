//! Generate a finite-difference kernel for one of the built-in models.
//!
//! Usage: `fdgen --model <wave1d|wave2d|heat2d|elastic2d> [--config FILE] [--out-dir DIR]
//! [--scheduler CMD] [--report FILE]`

use std::path::PathBuf;
use std::process;

use clap::Parser;
use fdgen::solver::codegen::ProcessScheduler;
use fdgen::solver::compiler::write_kernel_artifacts;
use fdgen::solver::model::{all_models, model_by_id, model_ids};
use fdgen::solver::{Pipeline, PipelineConfig};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fdgen")]
#[command(about = "Generate an OpenMP C kernel and manifest from a finite-difference model")]
struct Args {
    /// Built-in model to generate
    #[arg(long, required_unless_present = "list")]
    model: Option<String>,

    /// JSON pipeline configuration; unset keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory receiving `<kernel>.c` and `<kernel>.manifest.json`
    #[arg(long = "out-dir", default_value = ".")]
    out_dir: PathBuf,

    /// Polyhedral scheduler: `builtin` for the rectangular tiler, otherwise a command line
    /// speaking the JSON schedule protocol on stdin/stdout
    #[arg(long)]
    scheduler: Option<String>,

    /// Write the JSON build report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// List the built-in models and exit
    #[arg(long)]
    list: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.list {
        for model in all_models() {
            println!("{:<10} {}", model.id, model.summary);
        }
        return;
    }

    let Some(id) = args.model.as_deref() else {
        error!("--model is required");
        process::exit(2);
    };
    let Some(definition) = model_by_id(id) else {
        error!("unknown model '{}'; expected one of {}", id, model_ids().join(", "));
        process::exit(2);
    };

    let mut config = match &args.config {
        Some(path) => match PipelineConfig::from_path(path) {
            Ok(config) => config,
            Err(err) => {
                error!("{err}");
                process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };
    if args.scheduler.is_some() {
        config.use_polyhedral_transform = true;
    }

    let mut pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            error!("{err}");
            process::exit(1);
        }
    };
    match args.scheduler.as_deref() {
        Some("builtin") => pipeline = pipeline.with_builtin_tiler(),
        Some(command) => match ProcessScheduler::from_command_line(command) {
            Some(scheduler) => pipeline = pipeline.with_scheduler(Box::new(scheduler)),
            None => {
                error!("--scheduler needs a command");
                process::exit(2);
            }
        },
        None => {}
    }

    let model = match definition.build_with_cache(pipeline.stencil_cache(), pipeline.config()) {
        Ok(model) => model,
        Err(err) => {
            error!("model '{}': {err}", definition.id);
            process::exit(1);
        }
    };

    info!("generating '{}' from model '{}'", pipeline.config().kernel_name, definition.id);
    let mut artifact = match pipeline.run(&model) {
        Ok(artifact) => artifact,
        Err(err) => {
            error!("{} error: {err}", err.kind());
            process::exit(1);
        }
    };
    artifact.report.model = Some(definition.id.to_string());

    if let Err(err) = write_kernel_artifacts(&args.out_dir, &artifact.source, &artifact.manifest) {
        error!("{err}");
        process::exit(1);
    }

    if let Some(path) = &args.report {
        let written = artifact
            .report
            .to_json_pretty()
            .map_err(|err| err.to_string())
            .and_then(|json| std::fs::write(path, json).map_err(|err| err.to_string()));
        if let Err(err) = written {
            error!("failed to write report {}: {err}", path.display());
            process::exit(1);
        }
        info!("wrote build report {}", path.display());
    }
}
