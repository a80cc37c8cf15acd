//! CLI binary for weighticket-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, wires the store and meter from the environment, and
//! prints the saved record.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use weighticket_extract::{
    inspect_document, load_events, ConvexStore, DocumentSourceMode, ExtractionConfig, JobRunner,
    MemoryStore, ProcessReceiptEvent, ReceiptStore, RecordingMeter, RunObserver, SchematicMeter,
    UsageMeter,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner plus one log line per agent dispatch.
struct CliObserver {
    bar: ProgressBar,
    failed_steps: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failed_steps: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl RunObserver for CliObserver {
    fn on_run_start(&self, receipt_id: &str, _task: &str) {
        self.bar.set_prefix(receipt_id.to_string());
    }

    fn on_agent_start(&self, _receipt_id: &str, step: usize, agent: &str) {
        self.bar.set_message(format!("step {step}: {agent}"));
    }

    fn on_agent_complete(&self, receipt_id: &str, step: usize, agent: &str, summary: &str) {
        let failed = summary.starts_with("save failed");
        if failed {
            self.failed_steps.fetch_add(1, Ordering::SeqCst);
        }
        self.bar.println(format!(
            "  {} {}  {:>2}  {:<24} {}",
            if failed { red("✗") } else { green("✓") },
            dim(receipt_id),
            step,
            agent,
            dim(summary),
        ));
    }

    fn on_agent_error(&self, receipt_id: &str, step: usize, agent: &str, error: &str) {
        let msg = match error.char_indices().nth(100) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} {}  {:>2}  {:<24} {}",
            red("✗"),
            dim(receipt_id),
            step,
            agent,
            red(&msg),
        ));
    }

    fn on_run_complete(&self, receipt_id: &str, receipt: Option<&str>, steps: usize) {
        match receipt {
            Some(r) => self.bar.println(format!(
                "{} {} saved in {} steps",
                green("✔"),
                bold(r),
                steps
            )),
            None => self.bar.println(format!(
                "{} {} not saved after {} steps",
                red("✘"),
                bold(receipt_id),
                steps
            )),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one ticket (dry run against an in-memory store)
  ticket2json https://files.example.com/ticket-48213.jpg --receipt-id rcpt_1

  # Save to a Convex deployment and meter usage in Schematic
  CONVEX_URL=https://happy-otter-123.convex.cloud SCHEMATIC_API_KEY=... \
    ticket2json https://files.example.com/t.pdf --receipt-id k17abc --mime-type application/pdf

  # Process a JSON-lines file of {"url","receiptId","mimeType"} events
  ticket2json --events batch.jsonl --concurrency 8

  # Check what the model would receive (no API key needed)
  ticket2json --inspect-only https://files.example.com/scan.png

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (native client, PDF documents)
  ANTHROPIC_BASE_URL      Override the Anthropic API base URL
  OPENAI_API_KEY          OpenAI API key (via edgequake-llm)
  EDGEQUAKE_LLM_PROVIDER  Provider for edgequake-llm auto-detection
  EDGEQUAKE_MODEL         Model ID
  CONVEX_URL              Convex deployment URL; without it the run is a dry run
  CONVEX_DEPLOY_KEY       Convex deploy key sent as `Authorization: Convex <key>`
  SCHEMATIC_API_KEY       Schematic key; without it usage events are only logged
  SCHEMATIC_EVENTS_URL    Override the Schematic events endpoint
"#;

/// Extract structured data from weigh-ticket scans with multimodal LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "ticket2json",
    version,
    about = "Extract structured data from weigh-ticket scans with multimodal LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP/HTTPS URL of the ticket (PDF, PNG or JPEG).
    #[arg(required_unless_present = "events")]
    url: Option<String>,

    /// Receipt id to save under. Defaults to a dry-run id.
    #[arg(long, env = "TICKET2JSON_RECEIPT_ID")]
    receipt_id: Option<String>,

    /// MIME type reported by the uploader (advisory).
    #[arg(long)]
    mime_type: Option<String>,

    /// JSON-lines file of trigger events to process as a batch.
    #[arg(long, conflicts_with = "url")]
    events: Option<PathBuf>,

    /// LLM model ID (e.g. claude-3-5-haiku-latest, gpt-4o-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: anthropic, openai, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Let the provider fetch PDF URLs itself instead of downloading them.
    #[arg(long)]
    remote_pdf: bool,

    /// Maximum agent dispatches per job.
    #[arg(long, env = "TICKET2JSON_MAX_STEPS", default_value_t = 6)]
    max_steps: usize,

    /// Concurrent jobs in batch mode.
    #[arg(short, long, env = "TICKET2JSON_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Path to a text file containing a custom extraction system prompt.
    #[arg(long)]
    system_prompt: Option<PathBuf>,

    /// Print JSON instead of a human summary.
    #[arg(long)]
    json: bool,

    /// Normalise the document only; no model call, no save.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the progress spinner.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Inference call timeout in seconds.
    #[arg(long, default_value_t = 60)]
    api_timeout: u64,
}

const DRY_RUN_OWNER: &str = "dry-run";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let observer = show_progress.then(CliObserver::new);
    let config = build_config(&cli, observer.clone()).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let Some(ref url) = cli.url else {
            bail!("--inspect-only needs a URL");
        };
        let info = inspect_document(url, cli.mime_type.as_deref(), &config)
            .await
            .context("Failed to inspect document")?;
        if let Some(ref o) = observer {
            o.finish();
        }
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise document info")?
            );
        } else {
            println!("URL:          {}", info.url);
            match info.detected {
                Some(f) => println!("Detected:     {}", f.as_str()),
                None => println!("Detected:     (passed by reference)"),
            }
            println!("Source bytes: {}", info.source_bytes);
            println!("PDF bytes:    {}", info.pdf_bytes);
            println!("Pages:        {}", info.page_count);
            if let Some((w, h)) = info.first_page_size {
                println!("Page size:    {w} x {h} pt");
            }
        }
        return Ok(());
    }

    // ── Collaborators ────────────────────────────────────────────────────
    let events = match cli.events {
        Some(ref path) => load_events(path)
            .await
            .with_context(|| format!("Failed to read events from {}", path.display()))?,
        None => {
            let Some(url) = cli.url.clone() else {
                bail!("a URL or --events is required");
            };
            let receipt_id = cli
                .receipt_id
                .clone()
                .unwrap_or_else(|| "dry-run-receipt".to_string());
            vec![ProcessReceiptEvent::new(url, receipt_id, cli.mime_type.clone())]
        }
    };

    let memory = Arc::new(MemoryStore::new());
    let convex = ConvexStore::from_env().context("Failed to set up the Convex store")?;
    let store: Arc<dyn ReceiptStore> = match convex {
        Some(convex) => Arc::new(convex),
        None => {
            if !cli.quiet {
                eprintln!("{}", dim("CONVEX_URL not set: saving to an in-memory store"));
            }
            for event in &events {
                memory.insert_pending(event.receipt_id.as_str(), DRY_RUN_OWNER);
            }
            memory.clone()
        }
    };
    let schematic = SchematicMeter::from_env().context("Failed to set up the Schematic meter")?;
    let meter: Arc<dyn UsageMeter> = match schematic {
        Some(schematic) => Arc::new(schematic),
        None => Arc::new(RecordingMeter::new()),
    };

    let runner = JobRunner::new(config, store, meter).context("Failed to set up the extraction network")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let outcomes = runner.process_batch(&events).await;
    if let Some(ref o) = observer {
        o.finish();
    }

    let mut failures = 0usize;
    let mut report = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let record = memory
            .get(&outcome.receipt_id)
            .and_then(|r| r.parsed_data);
        match outcome.result {
            Ok(receipt) => {
                if receipt.is_none() {
                    failures += 1;
                }
                report.push(json!({
                    "receiptId": outcome.receipt_id,
                    "receipt": receipt,
                    "parsedData": record,
                }));
            }
            Err(e) => {
                failures += 1;
                report.push(json!({
                    "receiptId": outcome.receipt_id,
                    "receipt": null,
                    "error": e.to_string(),
                }));
                if !cli.quiet && !cli.json {
                    eprintln!("{} {}: {}", red("✘"), outcome.receipt_id, e);
                }
            }
        }
    }

    if cli.json {
        let out = if report.len() == 1 {
            report.remove(0)
        } else {
            serde_json::Value::Array(report)
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("Failed to serialise output")?
        );
    } else {
        for entry in &report {
            if let Some(data) = entry.get("parsedData").filter(|d| !d.is_null()) {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).context("Failed to serialise record")?
                );
            }
        }
        if !cli.quiet {
            eprintln!(
                "{} {}/{} receipts saved",
                if failures == 0 { green("✔") } else { red("⚠") },
                events.len() - failures,
                events.len()
            );
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .max_steps(cli.max_steps)
        .concurrency(cli.concurrency)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if cli.remote_pdf {
        builder = builder.document_source(DocumentSourceMode::RemoteUrl);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(o) = observer {
        builder = builder.observer(o);
    }

    builder.build().context("Invalid configuration")
}
