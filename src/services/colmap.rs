//! Driving the external reconstruction binary.
//!
//! The binary owns every reconstruction algorithm; this module only
//! builds its command lines from the workspace, streams its output and
//! sequences the stages around the camera import.

use crate::config::{ModelTagPolicy, Workspace};
use crate::database::{DatabaseError, ReconstructionStore};
use crate::services::camera_import::{self, ImportError, ImportReport};
use crate::services::history::{self, StageRecord, HISTORY_FILE_NAME};
use clap::ValueEnum;
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed waiting for `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Could not prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Stage {stage} failed with {}", describe_exit(*exit_code))]
    StageFailed {
        stage: &'static str,
        exit_code: Option<i32>,
    },
}

fn describe_exit(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Exit status of an external command. A non-zero code is a normal
/// outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    pub exit_code: Option<i32>,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait CommandRunner {
    /// Run `program` in `cwd`, passing each line of combined stdout and
    /// stderr to `observer` as it arrives.
    fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        observer: &mut dyn FnMut(&str),
    ) -> Result<StageOutcome, RunnerError>;
}

/// Runs commands as child processes.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        observer: &mut dyn FnMut(&str),
    ) -> Result<StageOutcome, RunnerError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx.clone()));
        }
        drop(tx);

        // Ends once both pipes are closed.
        for line in rx {
            observer(&line);
        }
        for reader in readers {
            if reader.join().is_err() {
                log::warn!("Output reader for `{}` panicked", program);
            }
        }

        let status = child.wait().map_err(|source| RunnerError::Io {
            program: program.to_string(),
            source,
        })?;
        Ok(StageOutcome {
            exit_code: status.code(),
        })
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(source: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Stages of the external binary, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    FeatureExtractor,
    ExhaustiveMatcher,
    PointTriangulator,
    Mapper,
    ModelAligner,
}

impl Stage {
    /// Subcommand name understood by the binary.
    pub fn command_name(self) -> &'static str {
        match self {
            Stage::FeatureExtractor => "feature_extractor",
            Stage::ExhaustiveMatcher => "exhaustive_matcher",
            Stage::PointTriangulator => "point_triangulator",
            Stage::Mapper => "mapper",
            Stage::ModelAligner => "model_aligner",
        }
    }

    pub fn args(self, workspace: &Workspace) -> Vec<String> {
        let database = path_arg(&workspace.database_path());
        let images = path_arg(&workspace.image_path());

        let mut args = vec![self.command_name().to_string()];
        match self {
            Stage::FeatureExtractor => {
                push_pairs(&mut args, &[("--database_path", database), ("--image_path", images)]);
            }
            Stage::ExhaustiveMatcher => {
                push_pairs(&mut args, &[("--database_path", database)]);
            }
            Stage::PointTriangulator => push_pairs(
                &mut args,
                &[
                    ("--database_path", database),
                    ("--image_path", images),
                    ("--input_path", path_arg(&workspace.text_path())),
                    ("--output_path", path_arg(&workspace.triangulated_path())),
                    ("--Mapper.fix_existing_images", "1".to_string()),
                    ("--Mapper.ba_refine_focal_length", "0".to_string()),
                ],
            ),
            Stage::Mapper => push_pairs(
                &mut args,
                &[
                    ("--database_path", database),
                    ("--image_path", images),
                    ("--output_path", path_arg(&workspace.sparse_path())),
                    ("--Mapper.fix_existing_images", "1".to_string()),
                ],
            ),
            Stage::ModelAligner => {
                let model = path_arg(&workspace.sparse_model_path());
                push_pairs(
                    &mut args,
                    &[
                        ("--input_path", model.clone()),
                        ("--output_path", model),
                        ("--ref_images_path", path_arg(&workspace.ref_images_file())),
                        ("--ref_is_gps", "0".to_string()),
                        ("--alignment_type", "custom".to_string()),
                        (
                            "--alignment_max_error",
                            workspace.config.alignment_max_error.to_string(),
                        ),
                    ],
                )
            }
        }
        args
    }

    /// Directories the stage writes into and expects to exist.
    pub fn output_dirs(self, workspace: &Workspace) -> Vec<PathBuf> {
        match self {
            Stage::PointTriangulator => vec![workspace.triangulated_path()],
            Stage::Mapper => vec![workspace.sparse_path()],
            _ => Vec::new(),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn push_pairs(args: &mut Vec<String>, pairs: &[(&str, String)]) {
    for (flag, value) in pairs {
        args.push((*flag).to_string());
        args.push(value.clone());
    }
}

/// What a full run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub triangulate: bool,
    pub model_tags: ModelTagPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stage(Stage),
    ImportCameras,
}

impl RunPlan {
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = vec![
            Step::Stage(Stage::FeatureExtractor),
            Step::ImportCameras,
            Step::Stage(Stage::ExhaustiveMatcher),
        ];
        if self.triangulate {
            steps.push(Step::Stage(Stage::PointTriangulator));
        }
        steps.push(Step::Stage(Stage::Mapper));
        steps.push(Step::Stage(Stage::ModelAligner));
        steps
    }
}

pub struct PipelineDriver<'a, R: CommandRunner> {
    workspace: &'a Workspace,
    runner: R,
}

impl<'a, R: CommandRunner> PipelineDriver<'a, R> {
    pub fn new(workspace: &'a Workspace, runner: R) -> Self {
        Self { workspace, runner }
    }

    pub fn history_path(&self) -> PathBuf {
        self.workspace.base_dir().join(HISTORY_FILE_NAME)
    }

    /// Run one stage. A non-zero exit is returned as a failed outcome.
    pub fn run_stage(
        &self,
        stage: Stage,
        observer: &mut dyn FnMut(&str),
    ) -> Result<StageOutcome, PipelineError> {
        for dir in stage.output_dirs(self.workspace) {
            fs::create_dir_all(&dir).map_err(|source| PipelineError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        let program = &self.workspace.config.colmap_binary;
        let args = stage.args(self.workspace);
        log::info!("Running {} {}", program, args.join(" "));

        let outcome = self
            .runner
            .run(program, &args, self.workspace.base_dir(), observer)?;

        let mut command = vec![program.clone()];
        command.extend(args);
        self.record(StageRecord::now(
            stage.command_name(),
            command,
            outcome.exit_code,
        ));

        if !outcome.success() {
            log::error!(
                "{} failed with {}",
                stage.command_name(),
                describe_exit(outcome.exit_code)
            );
        }
        Ok(outcome)
    }

    /// Open the workspace database, import the camera file and close it.
    pub fn import_cameras(&self, policy: ModelTagPolicy) -> Result<ImportReport, PipelineError> {
        let store = ReconstructionStore::open_or_create(self.workspace.database_path())?;
        store.create_schema()?;

        let result = camera_import::import_camera_file(&store, &self.workspace.cameras_file(), policy);
        self.record(StageRecord::now(
            "import_cameras",
            vec![path_arg(&self.workspace.cameras_file())],
            Some(if result.is_ok() { 0 } else { 1 }),
        ));

        let report = result?;
        store.close()?;
        Ok(report)
    }

    /// Execute every step of `plan`, stopping at the first failure.
    pub fn run(&self, plan: &RunPlan, observer: &mut dyn FnMut(&str)) -> Result<(), PipelineError> {
        for step in plan.steps() {
            match step {
                Step::Stage(stage) => {
                    let outcome = self.run_stage(stage, observer)?;
                    if !outcome.success() {
                        return Err(PipelineError::StageFailed {
                            stage: stage.command_name(),
                            exit_code: outcome.exit_code,
                        });
                    }
                }
                Step::ImportCameras => {
                    let report = self.import_cameras(plan.model_tags)?;
                    log::info!(
                        "Imported and verified {} camera(s)",
                        report.verified
                    );
                }
            }
        }
        Ok(())
    }

    fn record(&self, record: StageRecord) {
        let path = self.history_path();
        if let Err(e) = history::append_record(&path, &record) {
            log::warn!("Could not write history to {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use std::cell::RefCell;
    use tempfile::{tempdir, TempDir};

    struct FakeRunner {
        calls: RefCell<Vec<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    impl FakeRunner {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail_on,
            }
        }
    }

    impl CommandRunner for &FakeRunner {
        fn run(
            &self,
            _program: &str,
            args: &[String],
            _cwd: &Path,
            observer: &mut dyn FnMut(&str),
        ) -> Result<StageOutcome, RunnerError> {
            self.calls.borrow_mut().push(args.to_vec());
            observer(&format!("running {}", args[0]));
            let failed = self.fail_on == Some(args[0].as_str());
            Ok(StageOutcome {
                exit_code: Some(if failed { 1 } else { 0 }),
            })
        }
    }

    fn setup_workspace() -> (TempDir, Workspace) {
        let temp_dir = tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("text")).unwrap();
        fs::write(
            temp_dir.path().join("text").join("cameras.txt"),
            "# CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]\n1 SIMPLE_PINHOLE 1920 1080 1000.0 960.0 540.0\n",
        )
        .unwrap();
        let workspace = Workspace::new(temp_dir.path(), PipelineConfig::default());
        (temp_dir, workspace)
    }

    #[test]
    fn test_stage_arguments_are_workspace_relative() {
        let (dir, workspace) = setup_workspace();

        let args = Stage::FeatureExtractor.args(&workspace);
        assert_eq!(
            args,
            vec![
                "feature_extractor".to_string(),
                "--database_path".to_string(),
                path_arg(&dir.path().join("database.db")),
                "--image_path".to_string(),
                path_arg(&dir.path().join("images")),
            ]
        );

        let aligner = Stage::ModelAligner.args(&workspace);
        let model = path_arg(&dir.path().join("sparse").join("0"));
        assert_eq!(aligner[1..5], [
            "--input_path".to_string(),
            model.clone(),
            "--output_path".to_string(),
            model
        ]);
        assert!(aligner.ends_with(&["--alignment_max_error".to_string(), "3".to_string()]));
    }

    #[test]
    fn test_run_executes_steps_in_order() {
        let (dir, workspace) = setup_workspace();
        let runner = FakeRunner::new(None);
        let driver = PipelineDriver::new(&workspace, &runner);
        let mut lines = Vec::new();

        let plan = RunPlan {
            triangulate: false,
            model_tags: ModelTagPolicy::Collapse,
        };
        driver.run(&plan, &mut |line| lines.push(line.to_string())).unwrap();

        let stages: Vec<String> = runner.calls.borrow().iter().map(|c| c[0].clone()).collect();
        assert_eq!(
            stages,
            vec!["feature_extractor", "exhaustive_matcher", "mapper", "model_aligner"]
        );
        assert_eq!(lines.len(), 4);
        assert!(dir.path().join("sparse").is_dir());

        let store = ReconstructionStore::open_or_create(workspace.database_path()).unwrap();
        assert_eq!(store.get_camera(1).unwrap().width, 1920);

        let records = history::read_records(&driver.history_path()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "feature_extractor",
                "import_cameras",
                "exhaustive_matcher",
                "mapper",
                "model_aligner"
            ]
        );
    }

    #[test]
    fn test_run_stops_at_failed_stage() {
        let (_dir, workspace) = setup_workspace();
        let runner = FakeRunner::new(Some("exhaustive_matcher"));
        let driver = PipelineDriver::new(&workspace, &runner);

        let plan = RunPlan {
            triangulate: true,
            model_tags: ModelTagPolicy::Collapse,
        };
        let err = driver.run(&plan, &mut |_| {}).unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StageFailed {
                stage: "exhaustive_matcher",
                exit_code: Some(1)
            }
        ));
        assert_eq!(runner.calls.borrow().len(), 2);
    }

    #[test]
    fn test_failed_stage_is_an_outcome_not_an_error() {
        let (_dir, workspace) = setup_workspace();
        let runner = FakeRunner::new(Some("mapper"));
        let driver = PipelineDriver::new(&workspace, &runner);

        let outcome = driver.run_stage(Stage::Mapper, &mut |_| {}).unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(1));
    }

    #[test]
    fn test_import_failure_stops_run() {
        let (dir, workspace) = setup_workspace();
        fs::write(
            dir.path().join("text").join("cameras.txt"),
            "1 SIMPLE_PINHOLE not-a-width 1080 1.0\n",
        )
        .unwrap();
        let runner = FakeRunner::new(None);
        let driver = PipelineDriver::new(&workspace, &runner);

        let plan = RunPlan {
            triangulate: false,
            model_tags: ModelTagPolicy::Collapse,
        };
        let err = driver.run(&plan, &mut |_| {}).unwrap_err();

        assert!(matches!(err, PipelineError::Import(ImportError::Parse { .. })));
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_streams_both_pipes() {
        let temp_dir = tempdir().unwrap();
        let mut lines = Vec::new();

        let outcome = ProcessRunner
            .run(
                "sh",
                &["-c".to_string(), "echo out; echo err 1>&2; exit 3".to_string()],
                temp_dir.path(),
                &mut |line| lines.push(line.to_string()),
            )
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_uses_working_directory() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("marker.txt"), "here").unwrap();
        let mut lines = Vec::new();

        let outcome = ProcessRunner
            .run(
                "cat",
                &["marker.txt".to_string()],
                temp_dir.path(),
                &mut |line| lines.push(line.to_string()),
            )
            .unwrap();

        assert!(outcome.success());
        assert_eq!(lines, vec!["here".to_string()]);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let temp_dir = tempdir().unwrap();
        let err = ProcessRunner
            .run(
                "sfmsync-definitely-not-installed",
                &[],
                temp_dir.path(),
                &mut |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}
