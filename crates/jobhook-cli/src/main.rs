//! Jobhook CLI - replay a job descriptor through a submission policy
//!
//! Usage:
//!   jobhook --script-dir DIR job.json    Run the policy on a descriptor file
//!   jobhook --config jobhook.json         Read the descriptor from stdin
//!   jobhook --iterations 1000 job.json    Repeat the submission, e.g. to
//!                                         check for leaks across reloads

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use jobhook::{JobDescriptor, PolicyConfig, PolicyEngine};

/// Jobhook - run a job submission policy script against a job descriptor
#[derive(Parser, Debug)]
#[command(name = "jobhook")]
#[command(about = "Replay a job descriptor through a job submission policy script")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding job_submit.rhai (overrides the config file)
    #[arg(long)]
    script_dir: Option<PathBuf>,

    /// Submitting user id
    #[arg(long, default_value_t = 0)]
    uid: u32,

    /// Number of times to submit the descriptor
    #[arg(long, default_value_t = 1)]
    iterations: u64,

    /// Keep the compiled script between submissions
    #[arg(long)]
    cache_module: bool,

    /// Job descriptor JSON file (stdin if omitted)
    descriptor: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PolicyConfig::from_file(path)?,
        None => PolicyConfig::default(),
    };
    if let Some(dir) = args.script_dir {
        config.script_dir = dir;
    }
    if args.cache_module {
        config.reload_each_call = false;
    }

    let input = match &args.descriptor {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            input
        }
    };
    let original: JobDescriptor =
        serde_json::from_str(&input).context("failed to parse job descriptor")?;

    let engine = PolicyEngine::new(config);
    let mut last = None;
    for iteration in 0..args.iterations.max(1) {
        let mut desc = original.clone();
        let outcome = engine.submit(&mut desc, args.uid);
        tracing::debug!(iteration, status = outcome.status_code(), "submission done");
        last = Some((desc, outcome));
    }
    engine.shutdown();

    let Some((desc, outcome)) = last else {
        return Ok(());
    };
    let (error, report) = match &outcome.result {
        Ok(report) => (
            None,
            Some(json!({
                "applied": report.applied,
                "errors": report.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "unknown": report.unknown,
            })),
        ),
        Err(e) => (Some(e.to_string()), None),
    };
    let summary = json!({
        "status": outcome.status_code(),
        "rejection_code": outcome.rejection_code(),
        "error": error,
        "user_msg": outcome.user_msg,
        "merge": report,
        "descriptor": desc,
        "stats": engine.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if outcome.status_code() != 0 {
        std::process::exit(1);
    }
    Ok(())
}
