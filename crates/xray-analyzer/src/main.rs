//! `xray-analyzer`: judge a recorded pipeline run from the command line.
//!
//! ```bash
//! # Find the first faulty step (needs XRAY_API_KEY or CEREBRAS_API_KEY)
//! xray-analyzer analyze run.json
//!
//! # Print the prompt each window would send, without calling the judge
//! xray-analyzer prompts run.json
//!
//! # Print the run with oversized payloads summarized
//! xray-analyzer --config xray.toml summarize run.json
//! ```
//!
//! The JSON result goes to stdout. Logs go to stderr (`RUST_LOG` to tune).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xray_analyzer::{AnalyzerConfig, DiagnosisOrchestrator, OpenAiJudge, PipelineRun};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file (defaults are used for missing keys)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Judge every window of a run and print the outcome
    Analyze {
        /// Run JSON file
        run: PathBuf,

        /// Override the run's sample size for payload summaries
        #[arg(long)]
        sample_size: Option<usize>,

        /// Include per-window prompt digests and the transition log
        #[arg(long, default_value_t = false)]
        trace: bool,
    },
    /// Print the bounded prompt for every window without calling the judge
    Prompts {
        /// Run JSON file
        run: PathBuf,
    },
    /// Print the run with oversized payloads summarized
    Summarize {
        /// Run JSON file
        run: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<AnalyzerConfig> {
    let config = match path {
        Some(path) => AnalyzerConfig::from_toml_file(path)?,
        None => AnalyzerConfig::default(),
    }
    .with_env_overrides();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

fn load_run(path: &Path) -> Result<PipelineRun> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read run file {}", path.display()))?;
    PipelineRun::from_json(&raw)
        .with_context(|| format!("failed to parse run file {}", path.display()))
}

fn orchestrator(config: AnalyzerConfig) -> Result<DiagnosisOrchestrator> {
    let backend = Arc::new(OpenAiJudge::new(config.backend.clone()));
    Ok(DiagnosisOrchestrator::new(config, backend)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Analyze {
            run,
            sample_size,
            trace,
        } => {
            if config.backend.api_key.is_empty() {
                bail!("no API key configured: set XRAY_API_KEY or CEREBRAS_API_KEY");
            }
            let mut run = load_run(&run)?;
            if let Some(n) = sample_size {
                run.sample_size = Some(n);
            }

            info!(
                model = %config.backend.model,
                base_url = %config.backend.base_url,
                steps = run.steps.len(),
                "Analyzer starting"
            );
            let orchestrator = orchestrator(config)?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; stopping after the current window");
                    on_signal.cancel();
                }
            });

            let traced = orchestrator.analyze_traced(&run, &cancel).await?;
            let output = if trace {
                json!({
                    "outcome": traced.outcome,
                    "windows": traced.windows,
                    "transitions": traced.transitions,
                })
            } else {
                serde_json::to_value(&traced.outcome)?
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Prompts { run } => {
            let run = load_run(&run)?;
            let orchestrator = orchestrator(config)?;
            let previews = orchestrator.preview_prompts(&run)?;
            if previews.is_empty() {
                info!("run has no transition to judge; no prompts");
            }
            for (index, prepared) in previews {
                match prepared {
                    Ok(bounded) => {
                        println!(
                            "==== window {} | {} chars | sample_size {} | blake3 {} ====",
                            index + 1,
                            bounded.prompt.char_len(),
                            bounded.params.sample_size,
                            bounded.prompt.digest()
                        );
                        println!("{}", bounded.prompt.user);
                    }
                    Err(e) => println!("==== window {} | {e} ====", index + 1),
                }
            }
        }
        Command::Summarize { run } => {
            let run = load_run(&run)?;
            let params = config.summary.params_for(run.sample_size);
            let summarized = run.summarized(params);
            println!("{}", serde_json::to_string_pretty(&summarized)?);
        }
    }

    Ok(())
}
