mod cli;

use stagerun::recipes::{self, PortraitArgs, SubtitleArgs};
use stagerun::{setup, RunRequest};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use sr_core::config::{BackendKind, Config, Credentials};
use sr_core::JobDescription;
use std::path::Path;

fn main() {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "stagerun=trace,sr_pipeline=trace,sr_assets=debug,sr_store=debug,sr_remote=debug,sr_core=debug".to_string()
        } else {
            "stagerun=info,sr_pipeline=info,sr_assets=info,sr_store=info,sr_remote=info,sr_core=info".to_string()
        }
    });

    // stdout is reserved for command output (the worker prints its result there)
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let outcome = tokio::runtime::Runtime::new()
        .context("failed to start async runtime")
        .and_then(|rt| rt.block_on(run(cli)));

    if let Err(e) = outcome {
        tracing::error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Exit status of the first [`sr_core::Error`] in the chain, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<sr_core::Error>())
        .map_or(1, sr_core::Error::exit_code)
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Portrait {
            src_img,
            drv_aud,
            drv_pose,
            bg_img,
            out_name,
            gpu,
        } => {
            let config = load_config(config_path)?;
            let args = PortraitArgs {
                src_img,
                drv_aud,
                drv_pose,
                bg_img,
                out_name,
                gpu,
            };
            let request = recipes::portrait(&config, &args)?;
            run_request(&config, request).await
        }
        Commands::Subtitle {
            input_video,
            output_video,
            gpu,
            model,
        } => {
            let config = load_config(config_path)?;
            let args = SubtitleArgs {
                input_video,
                output_video,
                gpu,
                model,
            };
            let request = recipes::subtitle(&config, &args)?;
            run_request(&config, request).await
        }
        Commands::Worker {
            job,
            workdir,
            result,
        } => run_worker(config_path, &job, &workdir, result.as_deref()).await,
        Commands::Provision { assets } => provision(config_path, &assets).await,
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate => validate_config(config_path),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::load_or_default(path)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}

async fn run_request(config: &Config, request: RunRequest) -> Result<()> {
    let credentials = Credentials::from_env(config)?;
    let driver = setup::driver(config, &credentials)?;

    let outcome = driver.run(request).await?;
    println!(
        "Saved output to {} ({} bytes)",
        outcome.output.display(),
        outcome.size
    );
    Ok(())
}

async fn run_worker(
    config_path: Option<&Path>,
    job_path: &Path,
    workdir: &Path,
    result_path: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    // The worker executes jobs itself and never talks to a compute backend.
    config.remote.backend = BackendKind::Local;
    let credentials = Credentials::from_env(&config)?;

    let json = tokio::fs::read_to_string(job_path)
        .await
        .with_context(|| format!("failed to read job description {}", job_path.display()))?;
    let job = JobDescription::from_json(&json)?;

    tokio::fs::create_dir_all(workdir)
        .await
        .with_context(|| format!("failed to create workdir {}", workdir.display()))?;

    let env = setup::job_environment(&config, &credentials)?;
    let result = sr_remote::execute_job(&job, workdir, &env).await;

    let encoded = serde_json::to_string_pretty(&result)?;
    match result_path {
        Some(path) => tokio::fs::write(path, &encoded)
            .await
            .with_context(|| format!("failed to write result {}", path.display()))?,
        None => println!("{encoded}"),
    }

    result.into_artifact(job.id)?;
    Ok(())
}

async fn provision(config_path: Option<&Path>, names: &[String]) -> Result<()> {
    let config = load_config(config_path)?;
    let credentials = Credentials::from_env(&config)?;

    let mut specs = config.assets.model_specs();
    if !names.is_empty() {
        if let Some(unknown) = names.iter().find(|n| !specs.iter().any(|s| &s.name == *n)) {
            return Err(sr_core::Error::Validation(format!(
                "no asset named '{unknown}' in assets.models"
            ))
            .into());
        }
        specs.retain(|s| names.contains(&s.name));
    }

    let provisioner = setup::provisioner(&config, &credentials)?;
    let paths = provisioner.provision_all(&specs).await?;
    for (spec, path) in specs.iter().zip(&paths) {
        println!("✓ {} - {}", spec.name, path.display());
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path)?;
    let tools = [
        config.tools.git.as_str(),
        config.tools.python.as_str(),
        config.tools.pip.as_str(),
        "ffmpeg",
    ];
    let mut all_ok = true;

    for tool in tools {
        match which::which(tool) {
            Ok(path) => println!("✓ {} - {}", tool, path.display()),
            Err(_) => {
                all_ok = false;
                println!("✗ {}", tool);
            }
        }
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => println!("Validating config: {}", p.display()),
        None => println!("No config file specified, searching default locations"),
    }
    let config = Config::load_or_default(path)?;
    println!("✓ Configuration is valid");
    println!("  Backend: {:?}", config.remote.backend);
    if let Some(ref endpoint) = config.remote.endpoint {
        println!("  Endpoint: {}", endpoint);
    }
    println!("  Store: {:?}", config.store.kind);
    println!("  Job timeout: {}s", config.remote.timeout_secs);
    println!(
        "  Asset retries: {} (delay {}s, {:?})",
        config.assets.max_retries, config.assets.retry_delay_secs, config.assets.backoff
    );
    println!("  Models: {}", config.assets.models.len());

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  ⚠ {}", warning);
        }
    }

    Ok(())
}
