use anyhow::{Context, Result};
use clap::Parser;
use jsbridge::{DynamicObject, EngineConfig, NativeFunctionArgs, ScriptEngine, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod json;

#[derive(Parser)]
#[command(name = "jsrun")]
#[command(about = "Run a JavaScript file and print the result as JSON", long_about = None)]
struct Cli {
    /// Script file to evaluate
    file: PathBuf,

    /// Execution time budget in milliseconds (overrides the config file)
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// KDL engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Global function to call after the file has been evaluated
    #[arg(long)]
    call: Option<String>,

    /// JSON argument passed to --call (repeatable)
    #[arg(long = "arg", requires = "call")]
    args: Vec<String>,

    /// Print compact JSON
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(ms) = cli.timeout_ms {
        config.max_execution_time = Duration::from_millis(ms);
    }

    let engine = ScriptEngine::with_config(config)?;
    engine.register_native_object("console", console())?;

    let source = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;
    let mut result = engine.evaluate(&source)?;

    if let Some(name) = &cli.call {
        let args = cli
            .args
            .iter()
            .map(|arg| {
                serde_json::from_str::<serde_json::Value>(arg)
                    .map(|parsed| json::to_value(&parsed))
                    .with_context(|| format!("Invalid JSON argument: {}", arg))
            })
            .collect::<Result<Vec<_>>>()?;
        result = engine.call_function(name, &args)?;
    }

    let output = json::from_value(&result);
    if cli.compact {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}

/// Script-side `console`; output goes to stderr so stdout stays JSON
fn console() -> DynamicObject {
    DynamicObject::new()
        .with_method("log", |args| {
            eprintln!("{}", join(args));
            Value::Undefined
        })
        .with_method("warn", |args| {
            tracing::warn!("{}", join(args));
            Value::Undefined
        })
        .with_method("error", |args| {
            tracing::error!("{}", join(args));
            Value::Undefined
        })
}

fn join(args: &NativeFunctionArgs<'_>) -> String {
    args.arguments
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
