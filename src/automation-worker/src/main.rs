//! Automation worker: runs the marketing workflow scheduler tick.
//!
//! Loads configuration, wires the engine to its channels and drives
//! `process_pending_actions` on a fixed interval until interrupted.

use std::sync::Arc;
use std::time::Duration;

use automation_channels::{
    EmailOutbox, HttpWebhookDispatcher, InMemoryCustomerDirectory, SmsOutbox, WebhookDispatcher,
    WebhookOutbox,
};
use automation_core::config::AppConfig;
use automation_core::types::Customer;
use automation_workflow::demo::seed_demo_workflows;
use automation_workflow::{AutomationEngine, Channels, MemoryStore};
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "automation-worker")]
#[command(about = "Scheduler worker for marketing automation workflows")]
#[command(version)]
struct Cli {
    /// Path to a configuration file (defaults to ./automation.toml if present)
    #[arg(long, env = "AUTOMATION_CONFIG")]
    config: Option<String>,

    /// Members claimed per tick (overrides config)
    #[arg(long, env = "AUTOMATION__SCHEDULER__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Seconds between ticks (overrides config)
    #[arg(long, env = "AUTOMATION__SCHEDULER__TICK_INTERVAL_SECS")]
    tick_interval_secs: Option<u64>,

    /// Run a single tick and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Seed demo workflows and customers into the in-memory store
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "automation_worker=info,automation_workflow=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Automation worker starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(batch_size) = cli.batch_size {
        config.scheduler.batch_size = batch_size;
    }
    if let Some(secs) = cli.tick_interval_secs {
        config.scheduler.tick_interval_secs = secs;
    }

    info!(
        node_id = %config.node_id,
        batch_size = config.scheduler.batch_size,
        tick_interval_secs = config.scheduler.tick_interval_secs,
        worker_concurrency = config.scheduler.worker_concurrency,
        "Configuration loaded"
    );

    let customers = Arc::new(InMemoryCustomerDirectory::new());
    let email = Arc::new(EmailOutbox::new());
    let sms = Arc::new(SmsOutbox::new());
    // Demo workflows point at placeholder hosts, so their webhooks are only
    // recorded.
    let webhooks: Arc<dyn WebhookDispatcher> = if cli.seed_demo {
        Arc::new(WebhookOutbox::new())
    } else {
        Arc::new(HttpWebhookDispatcher::new(Duration::from_millis(
            config.channels.timeout_ms,
        ))?)
    };

    let batch_size = config.scheduler.batch_size;
    let tick_interval = Duration::from_secs(config.scheduler.tick_interval_secs.max(1));
    let engine = AutomationEngine::new(
        Arc::new(MemoryStore::new()),
        Channels {
            customers: customers.clone(),
            email: email.clone(),
            sms: sms.clone(),
            webhooks,
        },
        config,
    );

    if cli.seed_demo {
        seed_demo(&engine, &customers).await?;
    }

    if cli.once {
        let report = engine.process_pending_actions(batch_size).await?;
        info!(
            report = %serde_json::to_string(&report)?,
            emails = email.count(),
            sms = sms.count(),
            "Single tick complete"
        );
        return Ok(());
    }

    info!(interval_secs = tick_interval.as_secs(), "Automation worker is running");
    let mut interval = tokio::time::interval(tick_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match engine.process_pending_actions(batch_size).await {
                    Ok(report) if !report.errors.is_empty() => warn!(
                        processed = report.processed,
                        failed = report.errors.len(),
                        "Tick finished with member failures"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Tick aborted"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!(emails = email.count(), sms = sms.count(), "Automation worker stopped");
    Ok(())
}

async fn seed_demo(
    engine: &AutomationEngine,
    customers: &InMemoryCustomerDirectory,
) -> anyhow::Result<()> {
    let demo_customers = [
        Customer::new("demo-1")
            .with_name("Ada", "Lovelace")
            .with_email("ada@example.com")
            .with_phone("+15550101")
            .with_attribute("total_purchases", serde_json::json!(12)),
        Customer::new("demo-2")
            .with_name("Grace", "Hopper")
            .with_email("grace@example.com")
            .with_attribute("total_purchases", serde_json::json!(1)),
        Customer::new("demo-3")
            .with_name("Alan", "Turing")
            .with_phone("+15550103"),
    ];

    let workflows = seed_demo_workflows(engine, "demo").await?;
    for customer in demo_customers {
        let customer_id = customer.id.clone();
        customers.upsert(customer);
        for workflow in &workflows {
            engine
                .enroll_customer(workflow.id, &customer_id, &workflow.tenant_id, "demo_seed")
                .await?;
        }
    }
    info!(
        workflows = workflows.len(),
        customers = customers.len(),
        "Demo data seeded"
    );
    Ok(())
}
