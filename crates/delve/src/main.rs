//! `delve` command-line front-end
//!
//! Events and records go to stdout as JSON; logs go to stderr.

mod demo;

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use delve_controller::Controller;
use delve_core::{DelveConfig, JobKind, JobSpec, JobStatus, MemoryStore};
use delve_pipeline::Pipeline;
use delve_sandbox::{CodeRunner, SandboxRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("delve")
        .version(delve_core::VERSION)
        .about("Delve research-job orchestrator")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .subcommand(
            Command::new("run")
                .about("Run one job end-to-end and stream its events")
                .arg(
                    Arg::new("title")
                        .long("title")
                        .default_value("Demo job")
                        .help("Job title"),
                )
                .arg(
                    Arg::new("description")
                        .long("description")
                        .default_value("Sum the integers from 1 to 10")
                        .help("Job description"),
                )
                .arg(Arg::new("problem").long("problem").help("Problem statement"))
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .default_value("math_modeling")
                        .value_parser(JobKind::ALL.map(JobKind::as_str))
                        .help("Job kind"),
                )
                .arg(
                    Arg::new("program")
                        .long("program")
                        .value_parser(value_parser!(PathBuf))
                        .help("Program file the generate stage hands to the sandbox"),
                )
                .arg(
                    Arg::new("quiet")
                        .long("quiet")
                        .short('q')
                        .action(ArgAction::SetTrue)
                        .help("Only print the final job record"),
                ),
        )
        .subcommand(
            Command::new("sandbox")
                .about("Run a program file in the sandbox")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Program to run"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(f64))
                        .help("Time limit in seconds (defaults to the configured limit)"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let matches = cli().get_matches();
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => DelveConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DelveConfig::default(),
    };
    config.validate().context("invalid configuration")?;

    match matches.subcommand() {
        Some(("run", args)) => run_job(config, args).await,
        Some(("sandbox", args)) => run_sandbox(config, args).await,
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        _ => bail!("unknown command; see --help"),
    }
}

async fn run_job(config: DelveConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let program = match args.get_one::<PathBuf>("program") {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading program {}", path.display()))?,
        None => demo::DEFAULT_PROGRAM.to_string(),
    };

    let title = args.get_one::<String>("title").cloned().unwrap_or_default();
    let description = args
        .get_one::<String>("description")
        .cloned()
        .unwrap_or_default();
    let mut spec = JobSpec::new(title, description);
    if let Some(kind) = args.get_one::<String>("kind") {
        spec = spec.with_kind(kind.parse()?);
    }
    if let Some(problem) = args.get_one::<String>("problem") {
        spec = spec.with_problem(problem.clone());
    }

    let runner = Arc::new(SandboxRunner::new(config.sandbox.clone()));
    let pipeline = Pipeline::standard(
        demo::analyze(),
        demo::generate(program),
        demo::compose(),
        runner,
        &config,
    )?;
    let controller = Controller::new(&config, pipeline, Arc::new(MemoryStore::new()))?;

    let job = controller.create(spec).await?;
    let mut events = controller.subscribe(job.id).await?;
    controller.start(job.id).await?;
    info!(job_id = %job.id, "job submitted");

    let quiet = args.get_flag("quiet");
    while let Some(event) = events.recv().await {
        if !quiet {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    let job = controller.wait(job.id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    if job.status != JobStatus::Completed {
        bail!(
            "job {} {}: {}",
            job.id,
            job.status,
            job.error_message.as_deref().unwrap_or("no detail")
        );
    }
    Ok(())
}

async fn run_sandbox(config: DelveConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let Some(path) = args.get_one::<PathBuf>("file") else {
        bail!("missing program file");
    };
    let program = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading program {}", path.display()))?;
    let timeout = args
        .get_one::<f64>("timeout")
        .copied()
        .unwrap_or(config.sandbox.timeout_secs);
    debug!(path = %path.display(), timeout, "running program");

    let runner = SandboxRunner::new(config.sandbox);
    let outcome = runner.run(&program, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.success {
        bail!(
            "program did not succeed: {}",
            outcome.error.as_deref().unwrap_or("non-zero exit")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn global_config_flag_parses_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["delve", "sandbox", "main.py", "--config", "delve.toml"])
            .unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("delve.toml"))
        );
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "sandbox");
        assert_eq!(args.get_one::<PathBuf>("file"), Some(&PathBuf::from("main.py")));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result = cli().try_get_matches_from(["delve", "run", "--kind", "poetry"]);
        assert!(result.is_err());
    }
}
