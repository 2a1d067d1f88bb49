//! Materialize, run and verify generated applications.
//!
//! Each attempt lives in its own project directory under the projects base
//! directory (`generated_projects/` by default). `forge generate` drives the
//! bounded refinement loop; `forge run` re-executes an existing project.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use forge::core::types::{AttemptRecord, ExecutionResult, InstallOutcome, Outcome, RunMode};
use forge::exit_codes;
use forge::io::config::{CONFIG_FILE_NAME, ForgeConfig, load_config};
use forge::io::engine::{EngineSettings, ExecutionEngine};
use forge::io::generator::FileCandidates;
use forge::io::installer::PipInstaller;
use forge::io::project::{ProjectStore, project_info, read_run_command};
use forge::logging;
use forge::refine::{RefineConfig, RefinementOutcome, execute_logged, run_refinement, run_update};

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Materialize, run and verify generated applications"
)]
struct Cli {
    /// Config file (defaults to `forge.toml` in the current directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `projects_dir` from the config.
    #[arg(long, global = true)]
    projects_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one attempt against an existing project directory.
    Run {
        project: PathBuf,
        /// Command to run (defaults to the project's `run_command.txt`).
        #[arg(long)]
        command: Option<String>,
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
        /// OneShot budget (defaults to `execution.timeout_secs`).
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Run the refinement loop over candidates read from a JSON file.
    Generate {
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
        /// Override `max_attempts` from the config.
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Copy a project, overlay the first candidate and execute it once.
    Update {
        project: PathBuf,
        #[arg(long)]
        candidates: PathBuf,
    },
    /// List existing projects, newest first.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Infer the mode from the command text.
    Auto,
    OneShot,
    Service,
}

impl ModeArg {
    fn forced(self) -> Option<RunMode> {
        match self {
            ModeArg::Auto => None,
            ModeArg::OneShot => Some(RunMode::OneShot),
            ModeArg::Service => Some(RunMode::Service),
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let mut cfg = load_config(&config_path)?;
    if let Some(dir) = cli.projects_dir {
        cfg.projects_dir = dir;
    }

    match cli.command {
        Command::Run {
            project,
            command,
            mode,
            timeout_secs,
        } => cmd_run(&cfg, &project, command, mode, timeout_secs),
        Command::Generate {
            candidates,
            mode,
            max_attempts,
        } => cmd_generate(&cfg, &candidates, mode, max_attempts),
        Command::Update {
            project,
            candidates,
        } => cmd_update(&cfg, &project, &candidates),
        Command::List => cmd_list(&cfg),
    }
}

fn cmd_run(
    cfg: &ForgeConfig,
    project: &Path,
    command: Option<String>,
    mode: ModeArg,
    timeout_secs: Option<u64>,
) -> Result<i32> {
    if !project.is_dir() {
        bail!("project {} does not exist", project.display());
    }
    let command = match command {
        Some(command) => command,
        None => read_run_command(project)?.with_context(|| {
            format!(
                "no run command for {} (pass --command or write run_command.txt)",
                project.display()
            )
        })?,
    };
    let mut refine = refine_config(cfg, mode);
    if let Some(secs) = timeout_secs {
        if secs == 0 {
            bail!("--timeout-secs must be > 0");
        }
        refine.timeout = Duration::from_secs(secs);
    }

    let spec = refine.spec_for(&command, project);
    println!("Running `{}` ({})", spec.command, spec.mode.as_str());
    let result = execute_logged(&build_engine(cfg), 1, &spec)?;
    print_result(&result);
    Ok(exit_code(&result))
}

fn cmd_generate(
    cfg: &ForgeConfig,
    candidates: &Path,
    mode: ModeArg,
    max_attempts: Option<u32>,
) -> Result<i32> {
    let mut generator = FileCandidates::load(candidates)?;
    let mut refine = refine_config(cfg, mode);
    if let Some(max) = max_attempts {
        if max == 0 {
            bail!("--max-attempts must be > 0");
        }
        refine.max_attempts = max;
    }

    let outcome = run_refinement(
        &build_store(cfg),
        &mut generator,
        &build_engine(cfg),
        &refine,
        print_attempt,
    )?;
    match outcome {
        RefinementOutcome::Accepted {
            project_dir,
            attempt,
            result,
            ..
        } => {
            println!(
                "Attempt {attempt} accepted. Project available at {}",
                project_dir.display()
            );
            print_result(&result);
            Ok(exit_codes::OK)
        }
        RefinementOutcome::Exhausted {
            last_project_dir,
            history,
        } => {
            println!(
                "Failed to produce a working application after {} attempt(s).",
                history.len()
            );
            if let Some(dir) = last_project_dir {
                println!("Last attempt kept at {}", dir.display());
            }
            if let Some(record) = history.last() {
                print_result(&record.result);
            }
            Ok(exit_codes::FAILED)
        }
    }
}

fn cmd_update(cfg: &ForgeConfig, project: &Path, candidates: &Path) -> Result<i32> {
    let mut generator = FileCandidates::load(candidates)?;
    let updated = run_update(
        &build_store(cfg),
        project,
        &mut generator,
        &build_engine(cfg),
        &refine_config(cfg, ModeArg::Auto),
    )?;
    println!(
        "Updated project created at {}",
        updated.project_dir.display()
    );
    print_result(&updated.result);
    Ok(exit_code(&updated.result))
}

fn cmd_list(cfg: &ForgeConfig) -> Result<i32> {
    let projects = build_store(cfg).find_existing_projects()?;
    if projects.is_empty() {
        println!("No projects in {}", cfg.projects_dir.display());
        return Ok(exit_codes::OK);
    }
    for (index, dir) in projects.iter().enumerate() {
        let info = project_info(dir)?;
        println!("{}. {} [{}]", index + 1, info.name, info.kind.label());
        println!("   created: {}", info.created);
        if let Some(command) = &info.run_command {
            println!("   run: {command}");
        }
        if !info.main_files.is_empty() {
            println!("   files: {}", info.main_files.join(", "));
        }
    }
    Ok(exit_codes::OK)
}

fn refine_config(cfg: &ForgeConfig, mode: ModeArg) -> RefineConfig {
    RefineConfig {
        mode: mode.forced(),
        ..RefineConfig::from_config(cfg)
    }
}

fn build_store(cfg: &ForgeConfig) -> ProjectStore {
    ProjectStore::new(&cfg.projects_dir, &cfg.installer.manifest)
}

fn build_engine(cfg: &ForgeConfig) -> ExecutionEngine<PipInstaller> {
    ExecutionEngine::new(
        PipInstaller::new(
            &cfg.installer,
            cfg.output_limit_bytes,
            cfg.execution.kill_grace(),
        ),
        EngineSettings::from_config(cfg),
    )
}

fn exit_code(result: &ExecutionResult) -> i32 {
    if result.outcome.is_accepted() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}

fn print_attempt(dir: &Path, record: &AttemptRecord) {
    let status = match &record.result.outcome {
        Outcome::Succeeded => "succeeded",
        Outcome::PresumedRunning { .. } => "presumed running",
        Outcome::Failed { .. } => "failed",
    };
    println!(
        "Attempt {}: `{}` {} ({})",
        record.attempt,
        record.spec.command,
        status,
        dir.display()
    );
}

fn print_result(result: &ExecutionResult) {
    if let Some(message) = install_failure(result) {
        println!("Dependency installation failed: {message}");
    }
    match &result.outcome {
        Outcome::Succeeded => println!("Application ran successfully."),
        Outcome::PresumedRunning { service_url } => {
            println!("Application started successfully. It should be accessible at {service_url}");
        }
        Outcome::Failed { message } => println!("Application failed: {}", message.trim_end()),
    }
    if !result.captured_output.is_empty() {
        println!("--- output ---");
        println!("{}", result.captured_output.trim_end());
    }
}

fn install_failure(result: &ExecutionResult) -> Option<&str> {
    match &result.install {
        InstallOutcome::Failed { message } => Some(message),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["forge", "run", "generated_projects/project_x"]);
        match cli.command {
            Command::Run {
                project,
                command,
                mode,
                timeout_secs,
            } => {
                assert_eq!(project, PathBuf::from("generated_projects/project_x"));
                assert_eq!(command, None);
                assert_eq!(mode, ModeArg::Auto);
                assert_eq!(timeout_secs, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_run_with_forced_mode() {
        let cli = Cli::parse_from([
            "forge",
            "run",
            "p",
            "--command",
            "uvicorn main:app",
            "--mode",
            "one-shot",
            "--timeout-secs",
            "3",
        ]);
        match cli.command {
            Command::Run {
                command,
                mode,
                timeout_secs,
                ..
            } => {
                assert_eq!(command.as_deref(), Some("uvicorn main:app"));
                assert_eq!(mode.forced(), Some(RunMode::OneShot));
                assert_eq!(timeout_secs, Some(3));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::parse_from(["forge", "list", "--projects-dir", "/tmp/p", "--config", "x.toml"]);
        assert!(matches!(cli.command, Command::List));
        assert_eq!(cli.projects_dir, Some(PathBuf::from("/tmp/p")));
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn parse_generate_requires_candidates() {
        assert!(Cli::try_parse_from(["forge", "generate"]).is_err());
        let cli = Cli::parse_from(["forge", "generate", "--candidates", "c.json"]);
        assert!(matches!(cli.command, Command::Generate { .. }));
    }
}
