use std::path::PathBuf;
use std::process::ExitCode;

use binding_sandbox::{DataTree, EvalConfig, Registry, Result, SandboxError, Worker, WorkerMessage};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Evaluate data and trigger bindings in a restricted sandbox.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON file with evaluation settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate one binding and print its result
    Eval {
        binding: String,
        /// Context data tree (JSON object)
        #[arg(long)]
        context: Option<String>,
        /// Callback arguments (JSON array); the binding must be a function
        #[arg(long)]
        args: Option<String>,
        /// Evaluate on the async path and print the response envelope
        #[arg(long = "async")]
        run_async: bool,
        #[arg(long, default_value = "cli")]
        request_id: String,
        #[arg(long)]
        evaluation_version: Option<u32>,
    },
    /// Print whether a binding belongs on the async path
    Classify {
        binding: String,
        #[arg(long)]
        context: Option<String>,
        /// Also run the binding when static inspection finds nothing
        #[arg(long)]
        trial: bool,
    },
    /// Answer JSON-lines requests from stdin on stdout
    Serve,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => EvalConfig::from_file(path)?,
        None => EvalConfig::default(),
    };
    match cli.command {
        Command::Eval {
            binding,
            context,
            args,
            run_async,
            request_id,
            evaluation_version,
        } => {
            if let Some(version) = evaluation_version {
                config.evaluation_version = version;
            }
            let worker = Worker::new(config, Registry::with_builtins());
            let context = parse_context(context.as_deref())?;
            if run_async {
                let (tx, mut rx) = mpsc::unbounded_channel();
                worker
                    .evaluate_async(&binding, &context, &request_id, &tx)
                    .await?;
                drop(tx);
                let mut answered = false;
                while let Some(message) = rx.recv().await {
                    println!("{}", serde_json::to_string_pretty(&message)?);
                    answered = true;
                }
                if !answered {
                    warn!(request_id, "no response: the binding never settled");
                }
                return Ok(());
            }
            let args = match args.as_deref() {
                Some(raw) => Some(serde_json::from_str::<Vec<Value>>(raw)?),
                None => None,
            };
            let out = worker.evaluate(&binding, &context, args.as_deref());
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Command::Classify {
            binding,
            context,
            trial,
        } => {
            if trial {
                config.classifier = binding_sandbox::ClassifierMode::Trial;
            }
            let worker = Worker::new(config, Registry::with_builtins());
            let context = parse_context(context.as_deref())?;
            println!("{}", worker.is_async(&binding, &context));
            Ok(())
        }
        Command::Serve => serve(Worker::new(config, Registry::with_builtins())).await,
    }
}

fn parse_context(raw: Option<&str>) -> Result<DataTree> {
    match raw {
        None => Ok(DataTree::new()),
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(SandboxError::Config("--context must be a JSON object".into())),
        },
    }
}

/// One request per stdin line; every reply, `ERROR` replies included, is
/// written as one stdout line.
async fn serve(mut worker: Worker) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        worker.handle_line(&line, &tx).await?;
        while let Ok(message) = rx.try_recv() {
            println!("{}", serde_json::to_string(&message)?);
        }
    }
    Ok(())
}
