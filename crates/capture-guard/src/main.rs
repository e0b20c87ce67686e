mod cli;
mod config;
mod pipeline;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use body_capture::CaptureRuntime;
use request_policy::{registry, PolicyPoller, RequestHeaders, SnapshotCell};
use span_log::SpanLog;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::pipeline::{Pipeline, RequestRecord};

/// Sweep orphaned capture contexts after this many replayed requests.
const SWEEP_EVERY: u64 = 256;

const BLOCKED_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let (mut cfg, source) = config::load(&cli.config)?;

    if let Some(ref endpoint) = cli.policy_endpoint {
        cfg.policy.endpoint = endpoint.clone();
    }
    if let Some(ref token) = cli.policy_token {
        cfg.policy.auth_token = Some(token.clone());
    }
    if let Some(ref path) = cli.span_log {
        cfg.logging.span_log_path = path.clone();
    }

    // 3. Init tracing-subscriber with JSON format on stderr; stdout carries
    //    command output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    config::report(&cli.config, source);

    info!(
        config_file = %cli.config.display(),
        body_max_size_bytes = cfg.capture.body_max_size_bytes,
        evaluators = cfg.filters.evaluators.len(),
        "capture-guard starting"
    );

    match cli.command {
        Command::Check {
            headers,
            body,
            content_type,
            snapshot,
        } => run_check(&cfg, &headers, body, content_type, snapshot),
        Command::Replay => run_replay(cfg).await,
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn run_check(
    cfg: &Config,
    headers: &str,
    body: Option<std::path::PathBuf>,
    content_type: Option<String>,
    snapshot: Option<std::path::PathBuf>,
) -> Result<ExitCode> {
    let mut headers: RequestHeaders =
        serde_json::from_str(headers).context("--headers must be a JSON object of strings")?;
    if let Some(content_type) = content_type {
        headers.insert("content-type", content_type);
    }

    let body = body
        .map(|path| {
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read body file {}", path.display()))
        })
        .transpose()?;

    let cell = match snapshot {
        Some(path) => SnapshotCell::with_snapshot(
            request_policy::loader::load_snapshot(&path).context("failed to load snapshot")?,
        ),
        None => SnapshotCell::new(),
    };

    let chain = registry::build_chain(&cfg.filters, Arc::new(cell));
    let runtime = Arc::new(CaptureRuntime::new(cfg.capture.clone(), chain));
    let pipeline = Pipeline::new(runtime);

    let request = RequestRecord {
        name: Some("check".to_string()),
        headers,
        body,
        ..RequestRecord::default()
    };
    let (outcome, _) = pipeline.process(&request)?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(if outcome.blocked {
        ExitCode::from(BLOCKED_EXIT_CODE)
    } else {
        ExitCode::SUCCESS
    })
}

// ---------------------------------------------------------------------------
// replay
// ---------------------------------------------------------------------------

async fn run_replay(cfg: Config) -> Result<ExitCode> {
    // Span log.
    let (span_log, span_log_handle) = SpanLog::start(&cfg.logging.span_log_path)
        .await
        .context("failed to start span log")?;

    // Policy snapshot and poller. Evaluation fails open until the first
    // successful fetch.
    let snapshot = Arc::new(SnapshotCell::new());
    let cancel = CancellationToken::new();
    let poller = PolicyPoller::new(&cfg.policy, Arc::clone(&snapshot))
        .context("failed to build policy poller")?;
    info!(url = poller.url(), "starting policy poller");
    let poller_handle = poller.spawn(cancel.clone());

    let chain = registry::build_chain(&cfg.filters, snapshot);
    let pipeline = Pipeline::new(Arc::new(CaptureRuntime::new(cfg.capture.clone(), chain)));

    // Shutdown on ctrl-c.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT (ctrl-c)");
        }
        signal_cancel.cancel();
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut processed: u64 = 0;
    let mut blocked: u64 = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let request: RequestRecord = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "skipping malformed request line");
                continue;
            }
        };

        let (outcome, record) = match pipeline.process(&request) {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "request processing failed");
                continue;
            }
        };

        processed += 1;
        if outcome.blocked {
            blocked += 1;
        }

        let mut out = serde_json::to_vec(&outcome)?;
        out.push(b'\n');
        stdout.write_all(&out).await.context("failed to write outcome")?;
        span_log.log(record).await;

        if processed % SWEEP_EVERY == 0 {
            pipeline.runtime().sweep();
        }
    }

    stdout.flush().await.ok();
    info!(processed, blocked, "replay finished");

    // Stop the poller, then drain the span log.
    cancel.cancel();
    if let Err(err) = poller_handle.await {
        warn!(%err, "policy poller task failed");
    }
    drop(span_log);
    match span_log_handle.await {
        Ok(spans) => info!(spans, "span log drained"),
        Err(err) => warn!(%err, "span log task failed"),
    }

    info!("capture-guard shutting down");
    Ok(ExitCode::SUCCESS)
}
