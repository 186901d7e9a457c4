//! Nullscan - scan-lifecycle orchestrator for autonomous web security scans
//!
//! Runs the worker that drives the scanning engine, and exposes the
//! request-facing operations (submit, progress, results, payments, admin)
//! as subcommands over the shared state file.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (configuration, storage, invalid request, etc.)
//!   2 - The requested scan or results are not available (not found,
//!       not completed, expired)

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use nullscan::billing::{Billing, PaymentConfirmation, PaymentOutcome};
use nullscan::cli::{Args, Command, OutputFormat};
use nullscan::config::{Config, DEFAULT_CONFIG_FILE};
use nullscan::engine::{DockerSandbox, ProcessEngine, Sandbox};
use nullscan::error::ServiceError;
use nullscan::notify::{Notifications, WebhookNotifier};
use nullscan::report::render::{generate_json_results, generate_markdown_results};
use nullscan::report::LlmReportExtractor;
use nullscan::run::{ExecutorSettings, ReprocessOptions, Reprocessor, ScanExecutor};
use nullscan::scheduler::Scheduler;
use nullscan::service::{Availability, ScanService, SubmitRequest};
use nullscan::store::{ScanStore, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Nullscan v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command: {:?}", args.command);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default nullscan.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", DEFAULT_CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set tier budgets, limits, and the extraction endpoint.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags.
fn init_logging(args: &Args) {
    let level = args.log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Dispatch a subcommand. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let store: Arc<dyn ScanStore> = Arc::new(StateStore::open(config.storage.path.clone()));
    debug!("State file: {}", config.storage.path.display());

    let service = ScanService::new(
        store.clone(),
        config.limits.clone(),
        config.admin.api_key.clone(),
    );

    let outcome = match args.command {
        Command::Worker { once } => return run_worker(&config, store, once).await,
        Command::InitConfig => return handle_init_config().map(|_| 0),
        Command::Submit {
            email,
            target,
            authorized,
        } => {
            let scan = service
                .submit(SubmitRequest {
                    requester: email,
                    target,
                    consent: authorized,
                })
                .await;
            scan.map(|scan| {
                println!("📥 Queued scan {}", scan.id);
                println!("   Target: {}", scan.target);
                println!("   Track it with: nullscan watch {}", scan.id);
            })
        }
        Command::Progress { scan_id } => service.progress(scan_id).await.and_then(|view| {
            println!("{}", to_json(&view)?);
            Ok(())
        }),
        Command::Watch { scan_id, interval } => {
            watch(&service, scan_id, Duration::from_secs(interval)).await
        }
        Command::Results {
            scan_id,
            format,
            output,
        } => match service.results(scan_id).await {
            Ok(view) => {
                let rendered = match format {
                    OutputFormat::Json => generate_json_results(&view)?,
                    OutputFormat::Markdown => generate_markdown_results(&view),
                };
                match output {
                    Some(path) => {
                        std::fs::write(&path, &rendered)
                            .with_context(|| format!("Failed to write results to {}", path.display()))?;
                        println!("✅ Results saved to: {}", path.display());
                    }
                    None => println!("{}", rendered),
                }
                if view.availability == Availability::Expired {
                    eprintln!("⚠️  These results have expired.");
                    return Ok(2);
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::ChildStatus { scan_id } => service.child_status(scan_id).await.and_then(|child| {
            match child {
                Some(child) => println!("{}", to_json(&child)?),
                None => println!("No upgrade rescan for scan {}", scan_id),
            }
            Ok(())
        }),
        Command::Cancel { scan_id } => service.cancel(scan_id).await.map(|status| {
            println!("🛑 Scan {} is now {}", scan_id, status);
        }),
        Command::Quote { scan_id, tier } => {
            let billing = Billing::new(store.clone(), build_notifications(&config)?);
            billing.quote(scan_id, tier).await.map(|quote| {
                println!(
                    "💳 {} for scan {}: ${}.{:02}",
                    quote.tier,
                    quote.scan_id,
                    quote.amount_cents / 100,
                    quote.amount_cents % 100
                );
            })
        }
        Command::RecordPayment {
            scan_id,
            tier,
            payment_ref,
            amount_cents,
        } => {
            let billing = Billing::new(store.clone(), build_notifications(&config)?);
            let confirmation = PaymentConfirmation::new(scan_id, tier, payment_ref, amount_cents);
            billing.record_payment(confirmation).await.map(|outcome| match outcome {
                PaymentOutcome::Upgraded { scan, rescan } => {
                    println!("✅ Scan {} upgraded to {}", scan.id, tier);
                    if let Some(child) = rescan {
                        println!("   Queued {} rescan {}", child.tier, child.id);
                    }
                }
                PaymentOutcome::AlreadyProcessed => println!("Payment already processed."),
                PaymentOutcome::NotAnUpgrade { current } => println!(
                    "⚠️  {} does not outrank the paid tier ({}); nothing changed.",
                    tier,
                    current.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string())
                ),
            })
        }
        Command::Reprocess {
            scan_id,
            run_dir,
            keep_report,
            dry_run,
        } => {
            let extractor = Arc::new(
                LlmReportExtractor::new(config.extraction.clone())
                    .context("Failed to set up report extraction")?,
            );
            let reprocessor = Reprocessor::new(store.clone(), extractor, config.engine.runs_dir.clone());
            let options = ReprocessOptions {
                run_dir,
                keep_report,
                dry_run,
            };
            reprocessor.reprocess(scan_id, options).await.map(|outcome| {
                println!("🔁 Reprocessed scan {} from {}", scan_id, outcome.run_dir.display());
                println!(
                    "   Findings: {} (was {})",
                    outcome.results.findings.len(),
                    outcome.previous_findings
                );
                for finding in &outcome.results.findings {
                    println!("   {} {}", finding.severity.emoji(), finding.title);
                }
                println!(
                    "   Structured report: {}",
                    if outcome.results.structured_report.is_some() { "yes" } else { "no" }
                );
                if outcome.stored {
                    println!("✅ Stored new results.");
                } else {
                    println!("Dry run; nothing stored.");
                }
            })
        }
        Command::Admin { key } => {
            let presented = key.or_else(|| args.admin_key.clone()).unwrap_or_default();
            service.admin_summary(&presented).await.and_then(|summary| {
                println!("{}", to_json(&summary)?);
                Ok(())
            })
        }
    };

    match outcome {
        Ok(()) => Ok(0),
        Err(e @ ServiceError::NotFound)
        | Err(e @ ServiceError::NotCompleted { .. }) => {
            eprintln!("⚠️  {}", e);
            Ok(2)
        }
        Err(e) => Err(e.into()),
    }
}

/// Run the worker until Ctrl-C, or once over the current queue.
async fn run_worker(config: &Config, store: Arc<dyn ScanStore>, once: bool) -> Result<i32> {
    let engine = Arc::new(ProcessEngine::new(config.engine.clone()));
    let sandbox: Arc<dyn Sandbox> = Arc::new(DockerSandbox::new(
        config.engine.docker_command.clone(),
        config.engine.sandbox_label.clone(),
    ));
    let extractor = Arc::new(
        LlmReportExtractor::new(config.extraction.clone())
            .context("Failed to set up report extraction")?,
    );
    if config.extraction.api_key.is_none() {
        warn!("No extraction API key configured; reports will use the fallback");
    }

    let executor = Arc::new(ScanExecutor::new(
        store.clone(),
        engine,
        sandbox.clone(),
        extractor,
        build_notifications(config)?,
        ExecutorSettings::from_config(config),
    ));
    let scheduler = Scheduler::new(store, executor.clone(), sandbox, config.worker.poll_interval());

    println!("🤖 Nullscan worker");
    println!("   Engine: {}", config.engine.command);
    println!("   Runs: {}", config.engine.runs_dir.display());
    println!("   State: {}", config.storage.path.display());

    if once {
        scheduler.recover().await?;
        let processed = scheduler.poll_once().await?;
        executor.flush_notifications().await;
        println!("\n✅ Processed {} scan(s).", processed);
        return Ok(0);
    }

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            trigger.cancel();
        }
    });

    scheduler.run(shutdown).await?;
    Ok(0)
}

/// Follow a scan with a spinner until it reaches a terminal status.
async fn watch(service: &ScanService, scan_id: Uuid, interval: Duration) -> Result<(), ServiceError> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    loop {
        let view = service.progress(scan_id).await?;
        let message = match view.progress {
            Some(ref p) => format!(
                "{} | {:?} | agents {}/{} | tools {} | ${:.2} | {} finding(s)",
                view.status,
                p.current_phase,
                p.active_agents,
                p.agents,
                p.tools,
                p.cost,
                p.vulnerabilities_found
            ),
            None => view.status.to_string(),
        };

        if view.status.is_terminal() {
            let suffix = view
                .failure
                .map(|cause| format!(" ({})", cause))
                .unwrap_or_default();
            spinner.finish_with_message(format!("{}{}", message, suffix));
            return Ok(());
        }

        spinner.set_message(message);
        tokio::time::sleep(interval).await;
    }
}

fn build_notifications(config: &Config) -> Result<Notifications> {
    let timeout = config.worker.notify_timeout();
    match config.notifications.webhook_url {
        Some(ref url) => {
            let notifier = WebhookNotifier::new(url.clone())
                .context("Failed to set up webhook notifications")?;
            Ok(Notifications::new(Arc::new(notifier), timeout))
        }
        None => Ok(Notifications::log_only()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ServiceError> {
    serde_json::to_string_pretty(value).map_err(|e| ServiceError::Invalid(e.to_string()))
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
