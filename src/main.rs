use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;

use shotter::capability::{McpClient, McpConfig};
use shotter::model::{AnthropicClient, AnthropicConfig, ModelError};
use shotter::simulator::{DeviceControl, Simctl, find_device};
use shotter::{
    DeviceSession, ShotterServer, WorkflowCoordinator, WorkflowResult, WorkflowSpec, load_workflow,
    logging,
};

/// Shotter - model-driven iOS simulator navigation
#[derive(Parser, Debug)]
#[command(
    name = "shotter",
    about = "Drive iOS simulators toward navigation goals and capture proof screenshots",
    after_help = "ENVIRONMENT VARIABLES:\n\
        ANTHROPIC_API_KEY          API key for the model endpoint\n\
        SHOTTER_MODEL_ENDPOINT     Messages API URL\n\
        SHOTTER_MODEL              Model name\n\
        SHOTTER_MCP_COMMAND        Automation backend command\n\
        SHOTTER_MCP_ARGS           Automation backend arguments\n\
        SHOTTER_READY_TIMEOUT      Pre-run readiness ceiling (seconds)\n\
        RUST_LOG                   Log filter (default: shotter=info)"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workflow on every declared device
    Run {
        /// Path to the workflow YAML file
        workflow: PathBuf,

        /// Print the result as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Model name (overrides SHOTTER_MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Messages API URL (overrides SHOTTER_MODEL_ENDPOINT)
        #[arg(long)]
        endpoint: Option<String>,

        /// Screenshot root (overrides the workflow's outputDir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Per-step iteration budget (overrides the workflow's maxIterations)
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Load and validate a workflow without running it
    Validate {
        /// Path to the workflow YAML file
        workflow: PathBuf,
    },

    /// Serve device selection and the UI tools as an MCP server on stdio
    Serve {
        /// Screenshot root for the selected device
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// List available simulators
    Devices {
        /// Show which simulator a device name would resolve to
        #[arg(short, long)]
        filter: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init();

    match args.command {
        Commands::Run {
            workflow,
            json,
            model,
            endpoint,
            output_dir,
            max_iterations,
        } => {
            let mut spec = match load_workflow(&workflow) {
                Ok(spec) => spec,
                Err(e) => {
                    eprintln!("Failed to load workflow: {}", e);
                    std::process::exit(1);
                }
            };
            if let Some(dir) = output_dir {
                spec.output_dir = dir;
            }
            if let Some(max) = max_iterations {
                spec.max_iterations = max.max(1);
            }

            let mut model_config = AnthropicConfig::default();
            if let Some(endpoint) = endpoint {
                model_config.endpoint = endpoint;
            }
            if let Some(model) = model {
                model_config.model = model;
            }
            if model_config.api_key.is_none() {
                return Err(ModelError::MissingApiKey.into());
            }

            let mut coordinator = WorkflowCoordinator::new(
                Simctl::new(),
                McpClient::new(McpConfig::default()),
                AnthropicClient::new(model_config),
            );
            let result = coordinator.run(&spec);

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_summary(&spec, &result);
            }

            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Validate { workflow } => match load_workflow(&workflow) {
            Ok(spec) => print_workflow(&spec),
            Err(e) => {
                eprintln!("Invalid workflow: {}", e);
                std::process::exit(1);
            }
        },

        Commands::Serve { output_dir } => {
            let mut server = ShotterServer::new(Simctl::new(), McpClient::new(McpConfig::default()));
            if let Some(dir) = output_dir {
                server = server.output_root(dir);
            }
            let stdin = std::io::stdin();
            server.serve(stdin.lock(), std::io::stdout().lock())?;
        }

        Commands::Devices { filter } => {
            let devices = Simctl::new().list()?;
            for device in &devices {
                let marker = if device.is_booted() { "*" } else { " " };
                println!("{} {:<36} {:<12} {}", marker, device.name, device.runtime, device.udid);
            }

            if let Some(pattern) = filter {
                match find_device(&devices, &pattern) {
                    Some(device) => println!("\n'{}' resolves to {} ({})", pattern, device.name, device.udid),
                    None => {
                        println!("\n'{}' does not match any simulator", pattern);
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_workflow(spec: &WorkflowSpec) {
    println!("Workflow: {}", spec.name);
    if let Some(description) = &spec.description {
        println!("  {}", description);
    }
    println!("  App: {}", spec.bundle_id);
    println!("  Devices: {}", spec.devices.join(", "));
    if let Some(command) = &spec.run_before {
        println!("  Pre-run: {}", command);
    }
    println!("  Max iterations per step: {}", spec.max_iterations);
    println!("  Step timeout: {}ms", spec.step_timeout.as_millis());
    println!("  Output: {}", spec.output_dir.display());
    println!("  Steps:");
    for (i, step) in spec.steps.iter().enumerate() {
        match &step.screenshot {
            Some(file) => println!("    {}. {} -> {}", i + 1, step.goal, file),
            None => println!("    {}. {}", i + 1, step.goal),
        }
    }
}

fn print_summary(spec: &WorkflowSpec, result: &WorkflowResult) {
    println!();
    println!("Workflow: {} ({:.1}s)", result.workflow, result.total_duration_ms as f64 / 1000.0);

    for device in &result.devices {
        let status = if device.success { "✓" } else { "✗" };
        println!(
            "  {} {}: {}/{} steps ({:.1}s)",
            status,
            device.device,
            device.successful_steps(),
            spec.steps.len(),
            device.duration_ms as f64 / 1000.0
        );

        for step in &device.steps {
            let mark = if step.success { "✓" } else { "✗" };
            let resumed = if step.iterations == 0 && step.success { " (resumed)" } else { "" };
            println!("      {} {}{}", mark, step.step.goal, resumed);
        }

        let session = DeviceSession::new(&spec.output_dir, &device.device, None);
        if let Ok(captures) = session.list_captures() {
            println!("      Screenshots in {}: {}", session.dir.display(), captures.len());
        }
    }

    if let Some(failure) = result.first_failure() {
        println!();
        match failure.goal {
            Some(goal) => println!("First failure on {}: \"{}\": {}", failure.device, goal, failure.error),
            None => println!("First failure on {}: {}", failure.device, failure.error),
        }
    } else if let Some(error) = &result.error {
        println!();
        println!("Run failed: {}", error);
    }

    println!();
    println!("Result: {}", if result.success { "SUCCESS" } else { "FAILED" });
}
