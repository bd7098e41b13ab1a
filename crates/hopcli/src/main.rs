use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hopcore::{CheckpointPolicy, EntryEvent, EntrySpec, Hop, JobDefinition, JobEvent};
use hopruntime::{EntryRegistry, HopRuntime, RunOptions, RunStatus, RuntimeConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hop")]
#[command(about = "Hop job engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a job file
    Run {
        /// Path to job JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Run variable as KEY=VALUE, may be repeated
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Start at the start entry even if a checkpoint exists
        #[arg(long)]
        ignore_checkpoints: bool,

        /// Directory holding checkpoint files
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// History records kept for the run (0 keeps everything)
        #[arg(long)]
        max_history: Option<usize>,

        /// Abort the run after this many steps
        #[arg(long)]
        max_steps: Option<u64>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a job file
    Validate {
        /// Path to job JSON file
        file: PathBuf,
    },

    /// List available entry types
    Entries,

    /// Create a new example job
    Init {
        /// Output file path
        #[arg(short, long, default_value = "job.json")]
        output: PathBuf,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn registry() -> EntryRegistry {
    let mut registry = EntryRegistry::new();
    hopnodes::register_all(&mut registry);
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            params,
            ignore_checkpoints,
            checkpoint_dir,
            max_history,
            max_steps,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            let mut options = RunOptions::new();
            options.ignore_checkpoints = ignore_checkpoints;
            options.max_history = max_history;
            options.max_steps = max_steps;
            for (name, value) in params {
                options.variables.set(name, value);
            }

            let config = RuntimeConfig {
                checkpoint_dir,
                ..RuntimeConfig::default()
            };
            let success = run_job(file, config, options).await?;
            if !success {
                std::process::exit(1);
            }
        }

        Commands::Validate { file } => {
            validate_job(file).await?;
        }

        Commands::Entries => {
            list_entries();
        }

        Commands::Init { output } => {
            create_example_job(output)?;
        }
    }

    Ok(())
}

async fn run_job(file: PathBuf, config: RuntimeConfig, options: RunOptions) -> Result<bool> {
    println!("🚀 Loading job from: {}", file.display());

    let definition = hopruntime::load_definition(&file)
        .await
        .with_context(|| format!("unable to load {}", file.display()))?;

    println!("📋 Job: {}", definition.name);
    println!("   Entries: {}", definition.entries.len());
    println!("   Hops: {}", definition.hops.len());
    println!();

    let runtime = HopRuntime::with_registry(registry(), config);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                JobEvent::JobStarted { job_name, .. } => {
                    println!("▶️  Job '{}' started", job_name);
                }
                JobEvent::EntryStarted { entry, entry_type, reason, .. } => {
                    println!("  ⚡ Starting entry: {} ({}) - {}", entry, entry_type, reason);
                }
                JobEvent::EntryFinished { entry, success, nr_errors, duration_ms, .. } => {
                    if success {
                        println!("  ✅ Entry {} finished in {}ms", entry, duration_ms);
                    } else {
                        println!("  ❌ Entry {} failed with {} error(s)", entry, nr_errors);
                    }
                }
                JobEvent::CheckpointRestored { entry, attempt, .. } => {
                    println!("  🔁 Restarting at checkpoint {} (attempt {})", entry, attempt);
                }
                JobEvent::EntryEvent { entry, event, .. } => match event {
                    EntryEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", entry, message);
                    }
                    EntryEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", entry, message);
                    }
                    EntryEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     📊 [{}] {}% - {}", entry, percent, msg),
                        None => println!("     📊 [{}] {}%", entry, percent),
                    },
                },
                JobEvent::JobFinished { job_name, success, duration_ms, .. } => {
                    if success {
                        println!("✨ Job '{}' completed successfully in {}ms", job_name, duration_ms);
                    } else {
                        println!("💥 Job '{}' failed after {}ms", job_name, duration_ms);
                    }
                }
                JobEvent::History(_) => {}
            }
        }
    });

    let handle = runtime.start(&definition, options)?;
    let state = std::sync::Arc::clone(handle.state());
    let stopper = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(execution_id = %state.execution_id(), "stop requested, waiting for running entries");
            state.stop();
        }
    });

    let state = std::sync::Arc::clone(handle.state());
    let outcome = handle.wait().await;
    stopper.abort();

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let result = outcome?;
    let status = state.status();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", state.execution_id());
    println!("   Status: {}", status);
    println!("   Errors: {}", result.nr_errors);
    println!("   Rows: {}", result.rows.len());
    println!("   Files: {}", result.files.len());
    if state.run_attempt() > 1 {
        println!("   Attempt: {}", state.run_attempt());
    }

    Ok(result.success && status == RunStatus::Finished)
}

async fn validate_job(file: PathBuf) -> Result<()> {
    println!("🔍 Validating job: {}", file.display());

    let definition = hopruntime::load_definition(&file).await?;
    let graph = registry().build_graph(&definition)?;

    println!("✅ Job is valid:");
    println!("   Name: {}", graph.name());
    println!("   Entries: {}", graph.len());
    println!("   Hops: {}", graph.hop_count());
    if graph.has_cycles() {
        println!("   ⚠️  Job contains loops; make sure they end");
    }

    Ok(())
}

fn list_entries() {
    println!("📦 Available Entry Types:");
    println!();

    let registry = registry();
    for entry_type in registry.list_entry_types() {
        if let Some(metadata) = registry.get_metadata(&entry_type) {
            println!("  • {} ({})", entry_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", entry_type);
        }
    }
}

fn create_example_job(output: PathBuf) -> Result<()> {
    let mut job = JobDefinition::new("Example Job");
    job.description = Some("Logs a greeting, then waits in two parallel branches".to_string());
    job.settings.checkpoints = Some(CheckpointPolicy::default());

    let start = job.add_entry(EntrySpec::new("START", "special.start").as_start());
    let greet = job.add_entry(
        EntrySpec::new("Greet", "debug.log")
            .with_config("message", "Hello ${USER}")
            .with_config("requires", serde_json::json!(["USER"]))
            .as_checkpoint()
            .in_parallel(),
    );
    let short = job.add_entry(EntrySpec::new("Short wait", "time.delay").with_config("delay_ms", 200));
    let long = job.add_entry(EntrySpec::new("Long wait", "time.delay").with_config("delay_ms", 500));

    job.connect(&start, &greet, Hop::unconditional());
    job.connect(&greet, &short, Hop::on_success());
    job.connect(&greet, &long, Hop::on_success());

    let json = serde_json::to_string_pretty(&job)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example job: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  hop run --file {} --param USER=world", output.display());

    Ok(())
}
