mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use chunkworker_config::{BackendKind, ChunkWorkerConfig, ConfigLoader, LogLevel};
use chunkworker_execution::{Backend, Controller, ControllerConfig, ExecutionError, WorkerHandle};
use chunkworker_ipc::StdioTransport;
use chunkworker_logging::{init_logging_from_config, init_simple_tracing, init_worker_tracing};
use chunkworker_runtime::{worker_main, ModuleLoader, ModuleRegistry, ModuleSource};

use cli::{Cli, Commands, ConfigCommands};

/// Load configuration from a file if given, otherwise from the environment
fn load_config(config_path: Option<&PathBuf>) -> Result<ChunkWorkerConfig> {
    ConfigLoader::new()
        .load(config_path)
        .context("Failed to load configuration")
}

/// Run as a background worker: the channel is stdin/stdout, logs go to stderr
async fn run_worker_process(
    worker_id: String,
    module_code: String,
    module_binary: Option<String>,
) -> Result<()> {
    let registry = Arc::new(ModuleRegistry::with_builtin_modules());
    let loader = Arc::new(ModuleLoader::new(registry));
    let source = ModuleSource::from_locators(module_code, module_binary);

    worker_main(worker_id.clone(), StdioTransport::stdio(), loader, source)
        .await
        .with_context(|| format!("Worker {} failed", worker_id))
}

fn parse_json(label: &str, text: &str) -> Result<JsonValue> {
    serde_json::from_str(text).with_context(|| format!("Invalid JSON in {}: {}", label, text))
}

async fn handle_run(
    mut config: ChunkWorkerConfig,
    payload: &str,
    jobs: &[String],
    sequential: bool,
) -> Result<()> {
    let payload = parse_json("--payload", payload)?;
    let jobs = jobs
        .iter()
        .map(|job| parse_json("--job", job))
        .collect::<Result<Vec<_>>>()?;

    config
        .validate_all()
        .context("Invalid configuration after command line overrides")?;

    let registry = Arc::new(ModuleRegistry::with_builtin_modules());
    let backend = Backend::from_config(&config, registry)?;
    let controller = Controller::new(ControllerConfig::from_config(&config), backend);

    let handle = controller.spawn().await.context("Failed to spawn worker")?;
    let outcome = run_jobs(&handle, payload, jobs, sequential).await;
    handle.dispose().await;
    outcome
}

async fn run_jobs(
    handle: &WorkerHandle,
    payload: JsonValue,
    jobs: Vec<JsonValue>,
    sequential: bool,
) -> Result<()> {
    handle
        .configure(payload)
        .await
        .context("Failed to configure worker")?;

    let total = jobs.len();
    let results: Vec<Result<JsonValue, ExecutionError>> = if sequential {
        let mut results = Vec::with_capacity(total);
        for job in jobs {
            results.push(handle.submit(job).await);
        }
        results
    } else {
        futures::future::join_all(jobs.into_iter().map(|job| handle.submit(job))).await
    };

    let mut failed = 0;
    for (index, result) in results.into_iter().enumerate() {
        let line = match result {
            Ok(output) => serde_json::json!({ "job": index, "success": true, "output": output }),
            Err(e) => {
                failed += 1;
                error!("Job {} failed: {}", index, e);
                let details = match e {
                    ExecutionError::JobFailed { ref details, .. } => details.clone(),
                    _ => None,
                };
                serde_json::json!({
                    "job": index,
                    "success": false,
                    "error": e.to_string(),
                    "details": details,
                })
            }
        };
        println!("{}", line);
    }

    if failed > 0 {
        return Err(anyhow::anyhow!("{} of {} jobs failed", failed, total));
    }

    info!("All {} jobs completed", total);
    Ok(())
}

/// Handle configuration validation
fn handle_config_validate(config_file: &Path) -> Result<()> {
    info!("Validating configuration file: {}", config_file.display());

    match ConfigLoader::new().from_file(config_file) {
        Ok(_config) => {
            println!("Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            Err(anyhow::anyhow!("Configuration validation failed: {}", e))
        }
    }
}

/// Handle configuration generation
fn handle_config_generate(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = ChunkWorkerConfig::generate_sample();

    let Some(output) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {}. Use --force to overwrite.",
            output.display()
        ));
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }
    }

    fs::write(output, sample).context("Failed to write configuration file")?;
    println!("Configuration generated at: {}", output.display());
    println!(
        "Validate with: chunkworker config validate --config-file {}",
        output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Worker mode first: stdout belongs to the channel
    if let Some(Commands::Worker {
        worker_id,
        module_code,
        module_binary,
    }) = cli.command
    {
        init_worker_tracing(cli.log_level.as_deref())?;
        let worker_id =
            worker_id.unwrap_or_else(|| format!("worker-{}", Uuid::new_v4().simple()));
        return run_worker_process(worker_id, module_code, module_binary).await;
    }

    match cli.command {
        Some(Commands::Run {
            payload,
            jobs,
            sequential,
            backend,
            module_code,
            module_binary,
        }) => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(level) = cli.log_level.as_deref() {
                config.logging.level = LogLevel::from_str(level).map_err(anyhow::Error::msg)?;
            }
            init_logging_from_config(&config.logging)?;

            if let Some(backend) = backend {
                config.worker.backend =
                    BackendKind::from_str(&backend).map_err(anyhow::Error::msg)?;
            }
            if let Some(code) = module_code {
                config.module.code = code;
            }
            if module_binary.is_some() {
                config.module.binary = module_binary;
            }

            handle_run(config, &payload, &jobs, sequential).await
        }
        Some(Commands::Config { config_cmd }) => {
            init_simple_tracing(cli.log_level.as_deref().unwrap_or("warn"))?;
            match config_cmd {
                ConfigCommands::Validate { config_file } => {
                    let path = config_file.or(cli.config).ok_or_else(|| {
                        anyhow::anyhow!("No configuration file given; use --config-file")
                    })?;
                    handle_config_validate(&path)
                }
                ConfigCommands::Generate { output, force } => {
                    handle_config_generate(output.as_ref(), force)
                }
            }
        }
        Some(Commands::Worker { .. }) => unreachable!("worker mode is handled above"),
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
