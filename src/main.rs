use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use sfmsync::config::{ModelTagPolicy, Workspace};
use sfmsync::database::ReconstructionStore;
use sfmsync::services::colmap::{PipelineDriver, ProcessRunner, RunPlan, Stage};
use sfmsync::services::history;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "sfmsync",
    version,
    about = "Keep a reconstruction workspace and its COLMAP database in sync"
)]
struct Cli {
    /// Workspace directory holding the database, images and text model
    #[arg(short, long, value_name = "DIR", default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and its schema
    Init,

    /// Camera workflows
    Cameras {
        #[command(subcommand)]
        command: CamerasCmd,
    },

    /// Run a single external stage
    Stage {
        #[arg(value_enum)]
        stage: Stage,
    },

    /// Run the full pipeline
    Run {
        /// Triangulate against the known poses before mapping
        #[arg(long)]
        triangulate: bool,
        /// Store the model named in the camera file instead of SIMPLE_PINHOLE
        #[arg(long)]
        map_models: bool,
    },

    /// Show executed stages
    History,
}

#[derive(Subcommand, Debug)]
enum CamerasCmd {
    /// Import a camera file and verify it against the database
    Import {
        /// Camera file, relative to the workspace (default: text/cameras.txt)
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,
        /// Store the model named in the camera file instead of SIMPLE_PINHOLE
        #[arg(long)]
        map_models: bool,
    },

    /// List stored cameras
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut workspace = Workspace::open(&cli.workspace)
        .with_context(|| format!("Failed to open workspace {:?}", cli.workspace))?;

    match cli.command {
        Commands::Init => {
            let path = workspace.database_path();
            println!("▶ Initialising database: {}", path.display());
            let store = ReconstructionStore::open_or_create(&path)
                .with_context(|| format!("Failed to open database {:?}", path))?;
            store.create_schema()?;
            println!("✅ Tables: {}", store.table_names()?.join(", "));
            store.close()?;
        }

        Commands::Cameras { command } => match command {
            CamerasCmd::Import { file, map_models } => {
                if let Some(file) = file {
                    workspace.config.cameras_file = file;
                }
                let policy = model_policy(&workspace, map_models);
                println!("▶ Importing cameras from: {}", workspace.cameras_file().display());

                let driver = PipelineDriver::new(&workspace, ProcessRunner);
                let report = driver
                    .import_cameras(policy)
                    .context("Camera import failed")?;
                println!(
                    "✅ Wrote and verified {} camera(s): {:?}",
                    report.verified, report.camera_ids
                );
            }

            CamerasCmd::List => {
                let path = workspace.database_path();
                if !path.is_file() {
                    println!("No database at {}; run `sfmsync init` first.", path.display());
                    return Ok(());
                }
                let store = ReconstructionStore::open_existing(&path)
                    .with_context(|| format!("Failed to open database {:?}", path))?;
                store.create_schema()?;
                let cameras = store.list_cameras()?;
                if cameras.is_empty() {
                    println!("No cameras stored.");
                }
                for camera in cameras {
                    let model = camera
                        .model_kind()
                        .map(|m| m.name().to_string())
                        .unwrap_or_else(|| format!("model {}", camera.model));
                    println!(
                        "📷 [{}] {} {}x{} {:?}",
                        camera.camera_id, model, camera.width, camera.height, camera.params
                    );
                }
            }
        },

        Commands::Stage { stage } => {
            let driver = PipelineDriver::new(&workspace, ProcessRunner);
            let spinner = stage_spinner(stage.command_name())?;
            let outcome = driver.run_stage(stage, &mut |line| spinner.println(line))?;
            spinner.finish_and_clear();

            if !outcome.success() {
                anyhow::bail!(
                    "{} exited with {:?}",
                    stage.command_name(),
                    outcome.exit_code
                );
            }
            println!("✅ {} finished", stage.command_name());
        }

        Commands::Run {
            triangulate,
            map_models,
        } => {
            let plan = RunPlan {
                triangulate,
                model_tags: model_policy(&workspace, map_models),
            };
            println!("▶ Running pipeline in: {}", workspace.base_dir().display());

            let driver = PipelineDriver::new(&workspace, ProcessRunner);
            let spinner = stage_spinner("pipeline")?;
            let result = driver.run(&plan, &mut |line| spinner.println(line));
            spinner.finish_and_clear();
            result.context("Pipeline stopped")?;

            println!(
                "✅ Pipeline complete; history in {}",
                driver.history_path().display()
            );
        }

        Commands::History => {
            let path = workspace.base_dir().join(history::HISTORY_FILE_NAME);
            let records = history::read_records(&path)
                .with_context(|| format!("Could not read history file {:?}", path))?;

            println!("🗂️  Stage History:");
            for (i, rec) in records.iter().enumerate() {
                let mark = if rec.succeeded() { "✅" } else { "❌" };
                println!(
                    "[{}] {} {} {}\n     command: {}\n     exit: {:?}\n",
                    i,
                    rec.timestamp,
                    mark,
                    rec.stage,
                    rec.command.join(" "),
                    rec.exit_code
                );
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` takes precedence over the `-v` count.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    let _ = builder.try_init();
}

fn model_policy(workspace: &Workspace, map_models: bool) -> ModelTagPolicy {
    if map_models {
        ModelTagPolicy::Map
    } else {
        workspace.config.model_tags
    }
}

fn stage_spinner(label: &str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("Running {}…", label));
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}
